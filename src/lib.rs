//! A minimal, single-threaded cooperative concurrency runtime.
//!
//! The core covers a scheduler tick loop, a [`task::Task`] object, an I/O
//! readiness layer over byte-oriented [`io::Stream`]s, a linearly-scanned
//! timer list, and structured-concurrency helpers (`spawn`/`run`/`all`/
//! `race`/`timeout`). An HTTP/HTTPS client collaborator ([`http`]) is built
//! strictly on top of these primitives as a regular user of `write`/
//! `read_all`/`delay`.
//!
//! Grounded throughout on `kasync`/`async-exec` (JonasKruckenberg/k23), with
//! the multi-threaded, atomics-based plumbing those crates need for a
//! kernel scheduler replaced by the much smaller single-threaded shape this
//! runtime's non-goals call for (see `DESIGN.md`).

mod combinators;
mod error;
pub mod http;
mod io;
mod reactor;
mod runtime;
mod task;
mod time;

pub use combinators::{all, race, run, spawn, timeout, Work};
pub use error::{Error, IoFailure, ProtocolFailure, Result};
pub use io::{read_all, write, ReadAll, Stream, Write};
pub use runtime::{Runtime, RuntimeGuard};
pub use task::{Task, TaskId};
pub use time::{delay, sleep, Delay};

//! Crate-wide error taxonomy.
//!
//! Grounded on `kasync::error` (JonasKruckenberg/k23): small, flat enums with
//! hand-written `Display` rather than a generic "anyhow-everything" style.
//! Here the variant count is large enough (spec §7's taxonomy) that we lean
//! on `thiserror` for the boilerplate, the way macwilam-linksense does.

use std::fmt;

/// Everything that can cross a suspension point or a helper boundary.
///
/// Variant names mirror spec.md §7's error taxonomy by kind: `CallerBug`,
/// `Deadlock`, `Cancelled`, `Io`, `Protocol`, `Status`.
#[derive(Debug, thiserror::Error, Clone)]
pub enum Error {
    /// Misuse of the runtime API: circular await, a suspending primitive
    /// called outside any execution, invalid `fetch` options, a
    /// non-positive `max_bytes`, or similar. Never recovered.
    #[error("caller bug: {0}")]
    CallerBug(String),

    /// `drive` had nothing to do (no pending I/O or timers) while its
    /// predicate was still false.
    #[error("deadlock: no pending I/O or timers, but condition not met")]
    Deadlock,

    /// Delivered as a throw-in to a cancelled task.
    #[error("task cancelled")]
    Cancelled,

    /// A watched stream failed at the OS layer, or a capped read
    /// accumulated more bytes than its cap allowed.
    #[error(transparent)]
    Io(#[from] IoFailure),

    /// The HTTP wire format was malformed in a way the parser can't
    /// recover from.
    #[error(transparent)]
    Protocol(#[from] ProtocolFailure),

    /// The HTTP response carried a status code >= 400.
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },
}

impl Error {
    pub fn caller_bug(msg: impl Into<String>) -> Self {
        Error::CallerBug(msg.into())
    }
}

/// I/O-layer failures (spec.md §4.2's write/read/cap handling).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoFailure {
    WriteFailed,
    ReadFailed,
    ResponseTooLarge,
}

impl fmt::Display for IoFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IoFailure::WriteFailed => f.write_str("write failed"),
            IoFailure::ReadFailed => f.write_str("read failed"),
            IoFailure::ResponseTooLarge => f.write_str("response too large"),
        }
    }
}

impl std::error::Error for IoFailure {}

/// Malformed-wire-format failures raised by the HTTP client collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolFailure {
    MissingHeaderSeparator,
    MalformedChunkSize(String),
    MalformedChunk,
    MalformedTrailer,
    InvalidUrl(String),
}

impl fmt::Display for ProtocolFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolFailure::MissingHeaderSeparator => {
                f.write_str("malformed response: missing header/body separator")
            }
            ProtocolFailure::MalformedChunkSize(s) => {
                write!(f, "malformed chunk size: {s:?}")
            }
            ProtocolFailure::MalformedChunk => f.write_str("malformed chunk: missing CRLF"),
            ProtocolFailure::MalformedTrailer => {
                f.write_str("malformed trailer: trailing bytes after terminator")
            }
            ProtocolFailure::InvalidUrl(s) => write!(f, "invalid url: {s}"),
        }
    }
}

impl std::error::Error for ProtocolFailure {}

pub type Result<T> = std::result::Result<T, Error>;

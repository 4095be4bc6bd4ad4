//! The HTTP/HTTPS client collaborator: specified only for wire
//! compatibility (spec.md §1, §6), built as an ordinary user of the core's
//! `write`/`read_all` primitives.

mod chunked;
mod client;
mod request;
mod response;
mod url;

pub use client::{fetch, FetchOptions};
pub use response::Response;
pub use url::{ParsedUrl, Scheme};

pub use chunked::{decode as decode_chunked, encode as encode_chunked};

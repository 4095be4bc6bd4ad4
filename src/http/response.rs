//! Response parsing: status line, headers and (optionally chunked) body
//! (spec.md §6).

use super::chunked;
use crate::error::{Error, ProtocolFailure};

#[derive(Debug, Clone)]
pub struct Response {
    pub status: Option<u16>,
    pub body: Vec<u8>,
}

/// Parses a raw HTTP response per spec.md §6.
///
/// Finds the first `\r\n\r\n` separator (a missing one is a malformed-
/// response failure), reads the status line (an unmatched status line is
/// treated as "no status known" rather than an error — spec.md §9's Open
/// Question, decided here in favor of the source's lenient behavior), and
/// decodes the body if `Transfer-Encoding: chunked` is present (case-
/// insensitive search) or takes it verbatim otherwise.
///
/// # Errors
/// Returns [`Error::Status`] if a status line was found and its code is
/// `>= 400`, or a [`Error::Protocol`] failure for a malformed chunked body
/// or missing header separator.
pub fn parse(raw: &[u8], url: &str) -> Result<Response, Error> {
    let sep = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .ok_or(Error::Protocol(ProtocolFailure::MissingHeaderSeparator))?;

    let header_bytes = &raw[..sep];
    let body_bytes = &raw[sep + 4..];
    let headers = String::from_utf8_lossy(header_bytes);

    let status = status_line(&headers);
    if let Some(code) = status {
        if code >= 400 {
            return Err(Error::Status {
                status: code,
                url: url.to_string(),
            });
        }
    }

    let chunked = headers
        .to_ascii_lowercase()
        .contains("transfer-encoding: chunked");

    let body = if chunked {
        chunked::decode(body_bytes)?
    } else {
        body_bytes.to_vec()
    };

    Ok(Response { status, body })
}

/// Matches `HTTP/1.[01]\s+(\d{3})` case-insensitively against the first
/// line of the header block.
fn status_line(headers: &str) -> Option<u16> {
    let first_line = headers.lines().next()?;
    let lower = first_line.to_ascii_lowercase();
    let rest = lower.strip_prefix("http/1.0").or_else(|| lower.strip_prefix("http/1.1"))?;
    let code_str: String = rest.trim_start().chars().take_while(|c| c.is_ascii_digit()).collect();
    if code_str.len() == 3 {
        code_str.parse().ok()
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_chunked_body_from_spec_example() {
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nabc\r\n0\r\n\r\n";
        let resp = parse(raw, "http://x").unwrap();
        assert_eq!(resp.body, b"abc");
        assert_eq!(resp.status, Some(200));
    }

    #[test]
    fn verbatim_body_without_chunking() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello";
        let resp = parse(raw, "http://x").unwrap();
        assert_eq!(resp.body, b"hello");
    }

    #[test]
    fn status_ge_400_is_a_failure() {
        let raw = b"HTTP/1.1 404 Not Found\r\n\r\n";
        let err = parse(raw, "http://x").unwrap_err();
        assert!(matches!(err, Error::Status { status: 404, .. }));
    }

    #[test]
    fn missing_separator_is_malformed() {
        let raw = b"HTTP/1.1 200 OK\r\nno-blank-line-here";
        assert!(parse(raw, "http://x").is_err());
    }

    #[test]
    fn unmatched_status_line_is_lenient() {
        let raw = b"NOT A STATUS LINE\r\n\r\nbody";
        let resp = parse(raw, "http://x").unwrap();
        assert_eq!(resp.status, None);
        assert_eq!(resp.body, b"body");
    }
}

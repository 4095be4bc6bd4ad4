//! URL parsing for the HTTP client collaborator.
//!
//! Builds on the `url` crate (the pack's standard choice for this, see
//! `reqwest`-style examples) and layers spec.md §6's extra constraints on
//! top: only `http`/`https` schemes, default ports, a rejected-if-0 port
//! range, and a host requirement the `url` crate alone doesn't enforce for
//! every malformed input we care about.

use crate::error::{Error, ProtocolFailure};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    fn default_port(self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParsedUrl {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
    /// Path plus query string, already joined as it appears on the wire
    /// (e.g. `/search?q=rust`).
    pub path_and_query: String,
    pub raw: String,
}

/// Parses and validates `raw` per spec.md §6: `http`/`https` only, default
/// ports 80/443, ports outside `(0, 65535]` rejected, host required.
pub fn parse(raw: &str) -> Result<ParsedUrl, Error> {
    let parsed = url::Url::parse(raw)
        .map_err(|_| Error::Protocol(ProtocolFailure::InvalidUrl(raw.to_string())))?;

    let scheme = match parsed.scheme() {
        "http" => Scheme::Http,
        "https" => Scheme::Https,
        _ => return Err(Error::Protocol(ProtocolFailure::InvalidUrl(raw.to_string()))),
    };

    let host = parsed
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| Error::Protocol(ProtocolFailure::InvalidUrl(raw.to_string())))?
        .to_string();

    let port = match parsed.port() {
        Some(0) => {
            return Err(Error::Protocol(ProtocolFailure::InvalidUrl(raw.to_string())))
        }
        Some(p) => p,
        None => scheme.default_port(),
    };

    let mut path_and_query = parsed.path().to_string();
    if let Some(q) = parsed.query() {
        path_and_query.push('?');
        path_and_query.push_str(q);
    }
    if path_and_query.is_empty() {
        path_and_query.push('/');
    }

    Ok(ParsedUrl {
        scheme,
        host,
        port,
        path_and_query,
        raw: raw.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_port_from_scheme() {
        let u = parse("http://example.com/foo").unwrap();
        assert_eq!(u.port, 80);
        assert_eq!(u.path_and_query, "/foo");

        let u = parse("https://example.com").unwrap();
        assert_eq!(u.port, 443);
        assert_eq!(u.path_and_query, "/");
    }

    #[test]
    fn keeps_query_string() {
        let u = parse("http://example.com/search?q=rust").unwrap();
        assert_eq!(u.path_and_query, "/search?q=rust");
    }

    #[test]
    fn rejects_other_schemes() {
        assert!(parse("ftp://example.com").is_err());
    }

    #[test]
    fn rejects_port_zero() {
        assert!(parse("http://example.com:0/").is_err());
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse("not a url").is_err());
    }
}

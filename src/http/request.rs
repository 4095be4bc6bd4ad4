//! Outgoing request-line and header synthesis (spec.md §6).

use super::url::ParsedUrl;
use std::collections::HashMap;

/// Builds the raw HTTP/1.1 request bytes for one request.
///
/// Always sets `Host` and `Connection: close`. Synthesizes `Content-Length`
/// when `body` is non-empty and the caller didn't already supply one
/// (case-insensitively). Adds `Accept: application/json` when `json` is
/// set.
pub fn build(
    method: &str,
    url: &ParsedUrl,
    headers: &HashMap<String, String>,
    body: Option<&[u8]>,
    json: bool,
) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(method.as_bytes());
    out.push(b' ');
    out.extend_from_slice(url.path_and_query.as_bytes());
    out.extend_from_slice(b" HTTP/1.1\r\n");

    let host_header = if is_default_port(url) {
        url.host.clone()
    } else {
        format!("{}:{}", url.host, url.port)
    };
    push_header(&mut out, "Host", &host_header);
    push_header(&mut out, "Connection", "close");

    let has_content_length = headers.keys().any(|k| k.eq_ignore_ascii_case("content-length"));
    let body = body.unwrap_or(&[]);
    if !body.is_empty() && !has_content_length {
        push_header(&mut out, "Content-Length", &body.len().to_string());
    }

    if json {
        push_header(&mut out, "Accept", "application/json");
    }

    for (name, value) in headers {
        push_header(&mut out, name, value);
    }

    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(body);
    out
}

fn is_default_port(url: &ParsedUrl) -> bool {
    matches!(
        (url.scheme, url.port),
        (super::url::Scheme::Http, 80) | (super::url::Scheme::Https, 443)
    )
}

fn push_header(out: &mut Vec<u8>, name: &str, value: &str) {
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(b": ");
    out.extend_from_slice(value.as_bytes());
    out.extend_from_slice(b"\r\n");
}

//! Chunked transfer-coding: decoder (spec.md §6) plus an encoder used by
//! the decoder's inverse-property test (spec.md §8) and by the in-process
//! test server.

use crate::error::{Error, ProtocolFailure};

/// Decodes a chunked body per spec.md §6: each chunk is a CRLF-terminated
/// hex size (optional `;ext…` ignored, whitespace trimmed) followed by
/// exactly that many data bytes and a CRLF; size 0 starts trailer mode,
/// terminated by an empty line, with nothing permitted after it.
pub fn decode(input: &[u8]) -> Result<Vec<u8>, Error> {
    let mut out = Vec::new();
    let mut pos = 0;

    loop {
        let (size_line, next) = read_line(input, pos)
            .ok_or(Error::Protocol(ProtocolFailure::MalformedChunk))?;
        pos = next;

        let size_str = size_line
            .split(';')
            .next()
            .unwrap_or("")
            .trim();
        let size = usize::from_str_radix(size_str, 16).map_err(|_| {
            Error::Protocol(ProtocolFailure::MalformedChunkSize(size_line.to_string()))
        })?;

        if size == 0 {
            loop {
                let (line, next) = read_line(input, pos)
                    .ok_or(Error::Protocol(ProtocolFailure::MalformedTrailer))?;
                pos = next;
                if line.is_empty() {
                    break;
                }
            }
            if pos != input.len() {
                return Err(Error::Protocol(ProtocolFailure::MalformedTrailer));
            }
            return Ok(out);
        }

        if pos + size + 2 > input.len() {
            return Err(Error::Protocol(ProtocolFailure::MalformedChunk));
        }
        out.extend_from_slice(&input[pos..pos + size]);
        pos += size;
        if &input[pos..pos + 2] != b"\r\n" {
            return Err(Error::Protocol(ProtocolFailure::MalformedChunk));
        }
        pos += 2;
    }
}

/// Reads one CRLF-terminated line starting at `pos`, returning the line
/// (without the CRLF) and the position right after it.
fn read_line(input: &[u8], pos: usize) -> Option<(&str, usize)> {
    let rest = &input[pos..];
    let idx = rest.windows(2).position(|w| w == b"\r\n")?;
    let line = std::str::from_utf8(&rest[..idx]).ok()?;
    Some((line, pos + idx + 2))
}

/// Splits `data` into `chunk_size`-sized chunks and encodes them in
/// chunked transfer-coding, terminator included. The left-inverse of
/// [`decode`] for well-formed inputs (spec.md §8).
pub fn encode(data: &[u8], chunk_size: usize) -> Vec<u8> {
    assert!(chunk_size > 0, "chunk_size must be positive");
    let mut out = Vec::new();
    for chunk in data.chunks(chunk_size) {
        out.extend_from_slice(format!("{:x}\r\n", chunk.len()).as_bytes());
        out.extend_from_slice(chunk);
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"0\r\n\r\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_spec_example() {
        let raw = b"3\r\nabc\r\n0\r\n\r\n";
        assert_eq!(decode(raw).unwrap(), b"abc");
    }

    #[test]
    fn decode_is_left_inverse_of_encode() {
        let data = b"the quick brown fox jumps over the lazy dog".to_vec();
        for chunk_size in [1, 3, 7, 64] {
            let encoded = encode(&data, chunk_size);
            assert_eq!(decode(&encoded).unwrap(), data);
        }
    }

    #[test]
    fn rejects_missing_crlf_after_chunk() {
        let raw = b"3\r\nabcX0\r\n\r\n";
        assert!(decode(raw).is_err());
    }

    #[test]
    fn rejects_trailing_bytes_after_terminator() {
        let raw = b"3\r\nabc\r\n0\r\n\r\ntrailing garbage";
        assert!(decode(raw).is_err());
    }

    #[test]
    fn ignores_chunk_extension() {
        let raw = b"3;foo=bar\r\nabc\r\n0\r\n\r\n";
        assert_eq!(decode(raw).unwrap(), b"abc");
    }
}

//! Chunked transfer coding for streamed responses.
//!
//! Every item a stream handler produces travels as exactly one chunk:
//!
//! ```text
//! <hex length>[;error]\r\n
//! <payload>\r\n
//! ...
//! 0\r\n
//! \r\n
//! ```
//!
//! A chunk carrying the `error` extension holds an encoded error description
//! instead of an item. It is always followed by the zero-length terminator.

use bytes::{Buf, Bytes, BytesMut};

use crate::error::{CatwireError, Result};

/// Chunk extension marking an error chunk.
pub const ERROR_EXTENSION: &str = "error";

/// CRLF written after each chunk's payload.
pub const CHUNK_SUFFIX: &[u8] = b"\r\n";

/// Zero-length chunk plus the empty trailer.
pub const LAST_CHUNK: &[u8] = b"0\r\n\r\n";

/// Longest size line accepted, extensions included.
const MAX_SIZE_LINE: usize = 1024;

/// Size line for a chunk of `len` bytes.
pub fn encode_chunk_prefix(len: usize, is_error: bool) -> Bytes {
    if is_error {
        Bytes::from(format!("{:x};{}\r\n", len, ERROR_EXTENSION))
    } else {
        Bytes::from(format!("{:x}\r\n", len))
    }
}

/// One decoded chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Chunk payload.
    pub data: Bytes,
    /// True when the chunk carried the `error` extension.
    pub is_error: bool,
}

/// Output of [`ChunkDecoder::decode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkEvent {
    /// A complete non-empty chunk.
    Chunk(Chunk),
    /// Terminator and trailer consumed.
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Size,
    Data { remaining: usize, is_error: bool },
    Trailer,
    Done,
}

/// Incremental decoder for a chunked body.
#[derive(Debug)]
pub struct ChunkDecoder {
    state: State,
}

impl ChunkDecoder {
    /// Create a decoder positioned before the first chunk.
    pub fn new() -> Self {
        Self { state: State::Size }
    }

    /// True once the terminator has been consumed.
    pub fn is_done(&self) -> bool {
        self.state == State::Done
    }

    /// Decode the next event from `buf`, consuming the bytes it spans.
    ///
    /// Returns `Ok(None)` when more data is needed. Bytes after the
    /// terminator are left in `buf`.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<ChunkEvent>> {
        loop {
            match self.state {
                State::Size => {
                    let Some(line) = take_line(buf, MAX_SIZE_LINE)? else {
                        return Ok(None);
                    };
                    let (size, is_error) = parse_size_line(&line)?;

                    self.state = if size == 0 {
                        State::Trailer
                    } else {
                        State::Data {
                            remaining: size,
                            is_error,
                        }
                    };
                }

                State::Data {
                    remaining,
                    is_error,
                } => {
                    // Payload plus at least a bare LF.
                    if buf.len() < remaining + 1 {
                        return Ok(None);
                    }

                    let line_end = match &buf[remaining..] {
                        [b'\n', ..] => 1,
                        [b'\r', b'\n', ..] => 2,
                        [b'\r'] => return Ok(None),
                        _ => {
                            return Err(CatwireError::Protocol(
                                "Chunk payload not followed by a line ending".to_string(),
                            ))
                        }
                    };

                    let data = buf.split_to(remaining).freeze();
                    buf.advance(line_end);
                    self.state = State::Size;

                    return Ok(Some(ChunkEvent::Chunk(Chunk { data, is_error })));
                }

                State::Trailer => {
                    let Some(line) = take_line(buf, MAX_SIZE_LINE)? else {
                        return Ok(None);
                    };
                    if line.is_empty() {
                        self.state = State::Done;
                        return Ok(Some(ChunkEvent::End));
                    }
                }

                State::Done => return Ok(None),
            }
        }
    }
}

impl Default for ChunkDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Remove one line from the front of `buf`, without its line ending.
fn take_line(buf: &mut BytesMut, max: usize) -> Result<Option<BytesMut>> {
    match buf.iter().position(|&b| b == b'\n') {
        Some(nl) => {
            let mut line = buf.split_to(nl + 1);
            line.truncate(nl);
            if line.last() == Some(&b'\r') {
                line.truncate(nl - 1);
            }
            Ok(Some(line))
        }
        None if buf.len() > max => Err(CatwireError::Protocol(
            "Chunk size line too long".to_string(),
        )),
        None => Ok(None),
    }
}

fn parse_size_line(line: &[u8]) -> Result<(usize, bool)> {
    let text = std::str::from_utf8(line)
        .map_err(|_| CatwireError::Protocol("Chunk size line is not UTF-8".to_string()))?;

    let mut parts = text.split(';');
    let size_text = parts.next().unwrap_or_default().trim();
    let size = usize::from_str_radix(size_text, 16)
        .map_err(|_| CatwireError::Protocol(format!("Bad chunk size: {:?}", size_text)))?;

    let is_error = parts.any(|ext| {
        ext.split('=')
            .next()
            .map(|name| name.trim().eq_ignore_ascii_case(ERROR_EXTENSION))
            .unwrap_or(false)
    });

    Ok((size, is_error))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(items: &[(&[u8], bool)]) -> BytesMut {
        let mut out = BytesMut::new();
        for (data, is_error) in items {
            out.extend_from_slice(&encode_chunk_prefix(data.len(), *is_error));
            out.extend_from_slice(data);
            out.extend_from_slice(CHUNK_SUFFIX);
        }
        out.extend_from_slice(LAST_CHUNK);
        out
    }

    fn drain(decoder: &mut ChunkDecoder, buf: &mut BytesMut) -> Vec<ChunkEvent> {
        let mut events = Vec::new();
        while let Some(event) = decoder.decode(buf).unwrap() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_prefix_encoding() {
        assert_eq!(&encode_chunk_prefix(26, false)[..], b"1a\r\n");
        assert_eq!(&encode_chunk_prefix(3, true)[..], b"3;error\r\n");
    }

    #[test]
    fn test_decode_items_then_end() {
        let mut buf = encode(&[(b"purr", false), (b"purrpurr", false)]);
        let mut decoder = ChunkDecoder::new();

        let events = drain(&mut decoder, &mut buf);

        assert_eq!(events.len(), 3);
        assert_eq!(
            events[0],
            ChunkEvent::Chunk(Chunk {
                data: Bytes::from_static(b"purr"),
                is_error: false
            })
        );
        assert_eq!(events[2], ChunkEvent::End);
        assert!(decoder.is_done());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_error_chunk_flag() {
        let mut buf = encode(&[(b"ok", false), (b"boom", true)]);
        let events = drain(&mut ChunkDecoder::new(), &mut buf);

        match &events[1] {
            ChunkEvent::Chunk(chunk) => {
                assert!(chunk.is_error);
                assert_eq!(&chunk.data[..], b"boom");
            }
            other => panic!("expected chunk, got {:?}", other),
        }
    }

    #[test]
    fn test_byte_at_a_time() {
        let full = encode(&[(b"hello", false), (b"world!", false)]);
        let mut decoder = ChunkDecoder::new();
        let mut buf = BytesMut::new();
        let mut events = Vec::new();

        for byte in full.iter() {
            buf.extend_from_slice(&[*byte]);
            events.extend(drain(&mut decoder, &mut buf));
        }

        assert_eq!(events.len(), 3);
        assert!(decoder.is_done());
    }

    #[test]
    fn test_extensions_and_trailers_tolerated() {
        let mut buf = BytesMut::from(&b"4;name=value\r\nmeow\r\n0\r\nX-Trailer: 1\r\n\r\n"[..]);
        let events = drain(&mut ChunkDecoder::new(), &mut buf);

        assert_eq!(events.len(), 2);
        assert_eq!(events[1], ChunkEvent::End);
    }

    #[test]
    fn test_bare_lf_line_endings() {
        let mut buf = BytesMut::from(&b"4\nmeow\n0\n\n"[..]);
        let events = drain(&mut ChunkDecoder::new(), &mut buf);
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn test_bytes_after_terminator_left_alone() {
        let mut buf = encode(&[(b"x", false)]);
        buf.extend_from_slice(b"HTTP/1.1");
        let mut decoder = ChunkDecoder::new();

        drain(&mut decoder, &mut buf);

        assert_eq!(&buf[..], b"HTTP/1.1");
    }

    #[test]
    fn test_bad_size_is_protocol_error() {
        let mut buf = BytesMut::from(&b"zz\r\n"[..]);
        let result = ChunkDecoder::new().decode(&mut buf);
        assert!(matches!(result, Err(CatwireError::Protocol(_))));
    }

    #[test]
    fn test_missing_payload_terminator() {
        let mut buf = BytesMut::from(&b"2\r\nabc\r\n"[..]);
        let result = ChunkDecoder::new().decode(&mut buf);
        assert!(matches!(result, Err(CatwireError::Protocol(_))));
    }

    #[test]
    fn test_partial_chunk_waits() {
        let mut buf = BytesMut::from(&b"a\r\n01234"[..]);
        let mut decoder = ChunkDecoder::new();

        assert!(decoder.decode(&mut buf).unwrap().is_none());
        assert!(!decoder.is_done());
    }
}

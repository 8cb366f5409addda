//! Message buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management.
//! Implements a state machine for handling fragmented messages:
//! - `WaitingForHead`: need a blank line ending the head
//! - `WaitingForBody`: head parsed, need N more body bytes
//! - `UntilClose`: response without framing, body runs to EOF
//!
//! Chunked responses are not assembled here: the head is returned with an
//! empty body and the caller drains the rest with [`MessageBuffer::take_remaining`]
//! into a [`ChunkDecoder`](super::ChunkDecoder).
//!
//! # Example
//!
//! ```
//! use catwire::protocol::MessageBuffer;
//!
//! let mut buffer = MessageBuffer::for_requests();
//! buffer.push(b"POST /meow HTTP/1.1\r\nContent-Length: 2\r\n\r\n{}");
//!
//! let message = buffer.try_next().unwrap().unwrap();
//! assert_eq!(&message.body[..], b"{}");
//! ```

use bytes::{Bytes, BytesMut};

use super::Head;
use crate::error::{CatwireError, Result};

/// Default maximum head size: 64KB.
pub const DEFAULT_MAX_HEAD_SIZE: usize = 64 * 1024;

/// Default maximum body size: 1MB.
pub const DEFAULT_MAX_BODY_SIZE: usize = 1024 * 1024;

/// A head plus its (possibly empty) body.
#[derive(Debug, Clone)]
pub struct Message {
    /// Parsed start line and headers.
    pub head: Head,
    /// Body bytes. Empty for chunked responses.
    pub body: Bytes,
}

/// Which side of the exchange is being parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Request,
    Response,
}

/// State machine for message parsing.
#[derive(Debug, Clone)]
enum State {
    /// Waiting for the blank line that ends the head.
    WaitingForHead,
    /// Head parsed, waiting for body bytes.
    WaitingForBody { head: Head, remaining: usize },
    /// Head parsed, body ends when the peer closes.
    UntilClose { head: Head },
}

/// Buffer for accumulating incoming bytes and extracting complete messages.
pub struct MessageBuffer {
    /// Accumulated bytes from socket reads.
    buffer: BytesMut,
    /// Current parsing state.
    state: State,
    role: Role,
    max_head_size: usize,
    max_body_size: usize,
}

impl MessageBuffer {
    /// Buffer for server-side request parsing with default limits.
    ///
    /// Chunked request bodies are rejected; a missing `Content-Length`
    /// means an empty body.
    pub fn for_requests() -> Self {
        Self::with_limits(Role::Request, DEFAULT_MAX_HEAD_SIZE, DEFAULT_MAX_BODY_SIZE)
    }

    /// Buffer for client-side response parsing.
    ///
    /// Response bodies are not size-limited.
    pub fn for_responses() -> Self {
        Self::with_limits(Role::Response, DEFAULT_MAX_HEAD_SIZE, usize::MAX)
    }

    /// Request buffer with custom limits.
    pub fn for_requests_with_limits(max_head_size: usize, max_body_size: usize) -> Self {
        Self::with_limits(Role::Request, max_head_size, max_body_size)
    }

    fn with_limits(role: Role, max_head_size: usize, max_body_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(8 * 1024),
            state: State::WaitingForHead,
            role,
            max_head_size,
            max_body_size,
        }
    }

    /// Append data from a socket read.
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Mutable access to the raw buffer, for reading straight into it.
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }

    /// Try to extract one complete message.
    ///
    /// Returns:
    /// - `Ok(Some(message))` if a complete message was extracted
    /// - `Ok(None)` if more data is needed
    /// - `Err(...)` on a protocol violation (bad head, size limit, ...)
    pub fn try_next(&mut self) -> Result<Option<Message>> {
        match &self.state {
            State::WaitingForHead => {
                let Some((head_len, consumed)) = find_head_end(&self.buffer) else {
                    if self.buffer.len() > self.max_head_size {
                        return Err(self.violation(format!(
                            "Head exceeds maximum {} bytes",
                            self.max_head_size
                        )));
                    }
                    return Ok(None);
                };

                if head_len > self.max_head_size {
                    return Err(self.violation(format!(
                        "Head size {} exceeds maximum {}",
                        head_len, self.max_head_size
                    )));
                }

                let raw = self.buffer.split_to(consumed);
                let head = Head::parse(&raw[..head_len]).map_err(|e| self.reclassify(e))?;

                if head.headers.is_chunked() {
                    if self.role == Role::Request {
                        return Err(CatwireError::MalformedRequest(
                            "Chunked request bodies are not supported".to_string(),
                        ));
                    }
                    return Ok(Some(Message {
                        head,
                        body: Bytes::new(),
                    }));
                }

                let length = head
                    .headers
                    .content_length()
                    .map_err(|e| self.reclassify(e))?;

                match (length, self.role) {
                    (Some(0), _) | (None, Role::Request) => Ok(Some(Message {
                        head,
                        body: Bytes::new(),
                    })),
                    (Some(n), _) => {
                        if n > self.max_body_size {
                            return Err(self.violation(format!(
                                "Body size {} exceeds maximum {}",
                                n, self.max_body_size
                            )));
                        }
                        self.state = State::WaitingForBody { head, remaining: n };
                        self.try_next()
                    }
                    (None, Role::Response) => {
                        self.state = State::UntilClose { head };
                        Ok(None)
                    }
                }
            }

            State::WaitingForBody { remaining, .. } if self.buffer.len() < *remaining => Ok(None),

            State::WaitingForBody { .. } => {
                match std::mem::replace(&mut self.state, State::WaitingForHead) {
                    State::WaitingForBody { head, remaining } => {
                        let body = self.buffer.split_to(remaining).freeze();
                        Ok(Some(Message { head, body }))
                    }
                    other => {
                        self.state = other;
                        Ok(None)
                    }
                }
            }

            State::UntilClose { .. } => Ok(None),
        }
    }

    /// Signal EOF from the peer.
    ///
    /// Completes an until-close response. Returns `ConnectionClosed` if a
    /// partial message is buffered, `Ok(None)` on a clean boundary.
    pub fn finish(&mut self) -> Result<Option<Message>> {
        match std::mem::replace(&mut self.state, State::WaitingForHead) {
            State::UntilClose { head } => {
                let body = self.buffer.split().freeze();
                Ok(Some(Message { head, body }))
            }
            State::WaitingForHead if self.buffer.iter().all(u8::is_ascii_whitespace) => {
                self.buffer.clear();
                Ok(None)
            }
            _ => Err(CatwireError::ConnectionClosed),
        }
    }

    /// Take all buffered bytes not yet consumed by a message.
    pub fn take_remaining(&mut self) -> BytesMut {
        self.buffer.split()
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// True once more is buffered than one head and body may take.
    pub fn is_overfull(&self) -> bool {
        self.buffer.len() > self.max_head_size.saturating_add(self.max_body_size)
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Clear the buffer and reset state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::WaitingForHead;
    }

    fn violation(&self, message: String) -> CatwireError {
        match self.role {
            Role::Request => CatwireError::MalformedRequest(message),
            Role::Response => CatwireError::Protocol(message),
        }
    }

    fn reclassify(&self, err: CatwireError) -> CatwireError {
        match (self.role, err) {
            (Role::Response, CatwireError::MalformedRequest(m)) => CatwireError::Protocol(m),
            (_, err) => err,
        }
    }

    /// Get the current state for debugging.
    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match &self.state {
            State::WaitingForHead => "WaitingForHead",
            State::WaitingForBody { .. } => "WaitingForBody",
            State::UntilClose { .. } => "UntilClose",
        }
    }
}

/// Locate the blank line ending a head.
///
/// Returns `(head_len, consumed)`: the head bytes without the blank line,
/// and the total including it. Accepts CRLF and bare LF line endings.
fn find_head_end(buf: &[u8]) -> Option<(usize, usize)> {
    let mut pos = 0;
    while let Some(offset) = buf[pos..].iter().position(|&b| b == b'\n') {
        let nl = pos + offset;
        match &buf[nl + 1..] {
            [b'\n', ..] => return Some((nl, nl + 2)),
            [b'\r', b'\n', ..] => return Some((nl, nl + 3)),
            _ => pos = nl + 1,
        }
    }
    None
}

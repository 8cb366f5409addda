//! Protocol module - message heads, framing, and status codes.
//!
//! This module implements the HTTP/1.1 subset spoken on the wire:
//! - Head parsing and encoding (start line + headers)
//! - Message buffer for accumulating partial reads
//! - Chunked coding for streamed responses
//! - Status classification

mod chunked;
mod head;
mod message_buffer;
mod status;

pub use chunked::{
    encode_chunk_prefix, Chunk, ChunkDecoder, ChunkEvent, CHUNK_SUFFIX, ERROR_EXTENSION,
    LAST_CHUNK,
};
pub use head::{
    encode_request_head, encode_response_head, Framing, Head, Headers, RequestLine, HTTP_VERSION,
};
pub use message_buffer::{Message, MessageBuffer, DEFAULT_MAX_BODY_SIZE, DEFAULT_MAX_HEAD_SIZE};
pub use status::Status;

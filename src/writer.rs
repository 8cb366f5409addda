//! Batched frame writing with scatter/gather I/O.
//!
//! Every outgoing message is expressed as one or more [`OutboundFrame`]s:
//! a head, a payload and a static tail. A single response is one frame; a
//! streamed item is one chunk frame; an error chunk and the terminator go
//! out together as a batch of two.
//!
//! ```text
//! OutboundFrame { head: "HTTP/1.1 200 OK\r\n...\r\n", payload: body,  tail: "" }
//! OutboundFrame { head: "1a\r\n",                      payload: item,  tail: "\r\n" }
//! OutboundFrame { head: "",                            payload: "0\r\n\r\n", tail: "" }
//! ```
//!
//! All frames of a batch are handed to the kernel with `write_vectored`, so
//! a head and its payload never need to be copied into one buffer.

use std::io::IoSlice;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::{CatwireError, Result};
use crate::protocol::{encode_chunk_prefix, CHUNK_SUFFIX, LAST_CHUNK};

/// A frame ready to be written to the socket.
#[derive(Debug, Clone)]
pub struct OutboundFrame {
    /// Pre-encoded head (message head or chunk size line).
    pub head: Bytes,
    /// Payload bytes (can be empty).
    pub payload: Bytes,
    /// Static tail written after the payload.
    pub tail: &'static [u8],
}

impl OutboundFrame {
    /// A complete message: head followed by its body.
    #[inline]
    pub fn message(head: Bytes, payload: Bytes) -> Self {
        Self {
            head,
            payload,
            tail: b"",
        }
    }

    /// One chunk of a chunked body.
    #[inline]
    pub fn chunk(payload: Bytes, is_error: bool) -> Self {
        Self {
            head: encode_chunk_prefix(payload.len(), is_error),
            payload,
            tail: CHUNK_SUFFIX,
        }
    }

    /// The zero-length terminating chunk.
    #[inline]
    pub fn last_chunk() -> Self {
        Self {
            head: Bytes::new(),
            payload: Bytes::from_static(LAST_CHUNK),
            tail: b"",
        }
    }

    /// Total size of this frame (head + payload + tail).
    #[inline]
    pub fn size(&self) -> usize {
        self.head.len() + self.payload.len() + self.tail.len()
    }

    /// Non-empty parts in write order.
    fn parts(&self) -> impl Iterator<Item = &[u8]> {
        [&self.head[..], &self.payload[..], self.tail]
            .into_iter()
            .filter(|part| !part.is_empty())
    }
}

/// Total size of a batch.
#[inline]
pub fn batch_size(batch: &[OutboundFrame]) -> usize {
    batch.iter().map(OutboundFrame::size).sum()
}

/// Write a batch of frames using scatter/gather I/O (write_vectored).
pub async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    write_batch_from(writer, batch, 0).await
}

/// Write what is left of a batch after `already_written` bytes went out.
///
/// Used after a partial `sendmsg` that carried descriptors.
pub async fn write_batch_from<W>(
    writer: &mut W,
    batch: &[OutboundFrame],
    already_written: usize,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let total_size = batch_size(batch);
    let mut total_written = already_written;

    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        if slices.is_empty() {
            break;
        }

        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(CatwireError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }

        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Build IoSlice array for remaining data after partial write.
pub fn build_remaining_slices(batch: &[OutboundFrame], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len() * 3);
    let mut skipped = 0;

    for part in batch.iter().flat_map(|frame| frame.parts()) {
        let part_start = skipped;
        let part_end = skipped + part.len();

        if skip_bytes < part_end {
            let start_in_part = skip_bytes.saturating_sub(part_start);
            slices.push(IoSlice::new(&part[start_in_part..]));
        }
        skipped = part_end;
    }

    slices
}

//! A connected byte stream, TCP or unix.
//!
//! [`Connection`] wraps either socket kind behind one API: reads land in a
//! caller-owned `BytesMut`, writes go out as [`OutboundFrame`] batches. On
//! unix sockets every read also collects descriptors passed with
//! `SCM_RIGHTS`; they queue on the connection until taken.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;

use super::{Descriptor, Endpoint, PeerKind};
use crate::error::{CatwireError, Result};
use crate::writer::{write_batch, OutboundFrame};

/// Bytes requested per read.
const READ_CHUNK: usize = 16 * 1024;

enum Stream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Local(UnixStream),
}

/// A live connection plus the descriptors received on it.
pub struct Connection {
    stream: Stream,
    peer: String,
    received_fds: Vec<Descriptor>,
    #[cfg(unix)]
    scratch: Vec<u8>,
}

impl Connection {
    /// Wrap an accepted or connected TCP stream.
    pub fn tcp(stream: TcpStream) -> Self {
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "tcp:?".to_string());
        let _ = stream.set_nodelay(true);
        Self::new(Stream::Tcp(stream), peer)
    }

    /// Wrap an accepted or connected unix stream.
    #[cfg(unix)]
    pub fn local(stream: UnixStream) -> Self {
        Self::new(Stream::Local(stream), "unix".to_string())
    }

    fn new(stream: Stream, peer: String) -> Self {
        Self {
            stream,
            peer,
            received_fds: Vec::new(),
            #[cfg(unix)]
            scratch: Vec::new(),
        }
    }

    /// Connect to a worker endpoint.
    pub async fn connect(endpoint: &Endpoint) -> Result<Self> {
        match endpoint {
            Endpoint::Tcp(addr) => Ok(Self::tcp(TcpStream::connect(addr).await?)),
            #[cfg(unix)]
            Endpoint::Local(path) => Ok(Self::local(UnixStream::connect(path).await?)),
            #[cfg(not(unix))]
            Endpoint::Local(_) => Err(CatwireError::Io(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "unix sockets are not available on this platform",
            ))),
        }
    }

    /// Which socket family this connection uses.
    pub fn kind(&self) -> PeerKind {
        match self.stream {
            Stream::Tcp(_) => PeerKind::Tcp,
            #[cfg(unix)]
            Stream::Local(_) => PeerKind::Local,
        }
    }

    /// Peer description for logs.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Local address, rendered for display.
    pub fn local_addr(&self) -> String {
        match &self.stream {
            Stream::Tcp(s) => s
                .local_addr()
                .map(|a| a.to_string())
                .unwrap_or_default(),
            #[cfg(unix)]
            Stream::Local(s) => s
                .local_addr()
                .ok()
                .and_then(|a| a.as_pathname().map(|p| p.display().to_string()))
                .unwrap_or_else(|| "unix".to_string()),
        }
    }

    /// Read whatever is available into `buf`.
    ///
    /// Returns the byte count; 0 means the peer closed. Cancel safe.
    pub async fn read_into(&mut self, buf: &mut BytesMut) -> Result<usize> {
        match &mut self.stream {
            Stream::Tcp(s) => {
                buf.reserve(READ_CHUNK);
                Ok(s.read_buf(buf).await?)
            }
            #[cfg(unix)]
            Stream::Local(s) => {
                use std::os::fd::AsRawFd;
                use tokio::io::Interest;

                if self.scratch.is_empty() {
                    self.scratch.resize(READ_CHUNK, 0);
                }
                let socket = s.as_raw_fd();
                let scratch = &mut self.scratch;

                let (n, fds) = s
                    .async_io(Interest::READABLE, || {
                        super::fd::recv_with_fds(socket, &mut scratch[..])
                    })
                    .await?;

                buf.extend_from_slice(&scratch[..n]);
                if !fds.is_empty() {
                    tracing::trace!(count = fds.len(), "Received descriptors");
                }
                self.received_fds.extend(fds);
                Ok(n)
            }
        }
    }

    /// Take every descriptor received so far.
    pub fn take_fds(&mut self) -> Vec<Descriptor> {
        std::mem::take(&mut self.received_fds)
    }

    /// Write a batch of frames, attaching `fds` to the first bytes.
    ///
    /// # Errors
    ///
    /// [`CatwireError::DescriptorPassing`] when `fds` is non-empty on a TCP
    /// connection; nothing is written in that case.
    pub async fn send(&mut self, batch: &[OutboundFrame], fds: &[Descriptor]) -> Result<()> {
        if fds.is_empty() {
            return write_batch(self, batch).await;
        }

        match &self.stream {
            Stream::Tcp(_) => Err(CatwireError::DescriptorPassing(
                "descriptors can only be sent over unix sockets".to_string(),
            )),
            #[cfg(unix)]
            Stream::Local(s) => {
                use std::os::fd::{AsRawFd, RawFd};
                use tokio::io::Interest;

                let raw: Vec<RawFd> = fds.iter().map(AsRawFd::as_raw_fd).collect();
                let slices = crate::writer::build_remaining_slices(batch, 0);
                let socket = s.as_raw_fd();

                let written = s
                    .async_io(Interest::WRITABLE, || {
                        super::fd::send_with_fds(socket, &slices, &raw)
                    })
                    .await?;
                drop(slices);

                tracing::trace!(count = raw.len(), written, "Sent descriptors");
                crate::writer::write_batch_from(self, batch, written).await
            }
        }
    }
}

impl AsyncRead for Connection {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match &mut self.stream {
            Stream::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            #[cfg(unix)]
            Stream::Local(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Connection {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match &mut self.stream {
            Stream::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            #[cfg(unix)]
            Stream::Local(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_write_vectored(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[std::io::IoSlice<'_>],
    ) -> Poll<std::io::Result<usize>> {
        match &mut self.stream {
            Stream::Tcp(s) => Pin::new(s).poll_write_vectored(cx, bufs),
            #[cfg(unix)]
            Stream::Local(s) => Pin::new(s).poll_write_vectored(cx, bufs),
        }
    }

    fn is_write_vectored(&self) -> bool {
        true
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match &mut self.stream {
            Stream::Tcp(s) => Pin::new(s).poll_flush(cx),
            #[cfg(unix)]
            Stream::Local(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match &mut self.stream {
            Stream::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            #[cfg(unix)]
            Stream::Local(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

//! Transport module - sockets, listeners and descriptor passing.
//!
//! Provides abstraction over:
//! - TCP sockets
//! - Unix domain sockets (with `SCM_RIGHTS` descriptor passing)

mod connection;
#[cfg(unix)]
mod fd;
mod listener;

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;

use serde::Serialize;

pub use connection::Connection;
pub use listener::{generate_socket_path, Listener};

/// An open file descriptor passed alongside a message.
#[cfg(unix)]
pub type Descriptor = std::os::fd::OwnedFd;

/// Descriptors cannot be passed on this platform.
#[cfg(not(unix))]
#[derive(Debug)]
pub enum Descriptor {}

/// Socket family of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerKind {
    /// TCP.
    Tcp,
    /// Unix domain socket.
    Local,
}

/// Address of a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// `host:port`.
    Tcp(SocketAddr),
    /// Unix socket path.
    Local(PathBuf),
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp(addr) => write!(f, "{}", addr),
            Endpoint::Local(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

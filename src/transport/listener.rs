//! Listeners: TCP and unix domain sockets.
//!
//! The unix listener owns its socket file: a stale file left by a previous
//! run is removed before binding, and the file is removed again on drop.
//!
//! # Example
//!
//! ```no_run
//! # async fn demo() -> catwire::error::Result<()> {
//! use catwire::transport::{generate_socket_path, Listener};
//!
//! let path = generate_socket_path();
//! let listener = Listener::bind_local(&path)?;
//! let connection = listener.accept().await?;
//! # Ok(())
//! # }
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use tokio::net::TcpListener;

use super::{Connection, Endpoint};
use crate::error::Result;

/// Generate a unique socket path for this process.
///
/// Format: `{tmp}/catwire-{pid}-{random}.sock`
pub fn generate_socket_path() -> PathBuf {
    let pid = std::process::id();
    let rand = uuid::Uuid::new_v4().simple().to_string();

    std::env::temp_dir().join(format!("catwire-{}-{}.sock", pid, &rand[..16]))
}

/// A bound listener of either kind.
pub enum Listener {
    /// TCP listener.
    Tcp(TcpListener),
    /// Unix domain socket listener.
    #[cfg(unix)]
    Local(unix_impl::LocalListener),
}

impl Listener {
    /// Bind a TCP listener. Port 0 picks a free port.
    pub async fn bind_tcp(addr: SocketAddr) -> Result<Self> {
        Ok(Listener::Tcp(TcpListener::bind(addr).await?))
    }

    /// Bind a unix listener at `path`, replacing a stale socket file.
    #[cfg(unix)]
    pub fn bind_local(path: &Path) -> Result<Self> {
        Ok(Listener::Local(unix_impl::LocalListener::bind(path)?))
    }

    /// Accept a single connection.
    pub async fn accept(&self) -> Result<Connection> {
        match self {
            Listener::Tcp(listener) => {
                let (stream, _addr) = listener.accept().await?;
                Ok(Connection::tcp(stream))
            }
            #[cfg(unix)]
            Listener::Local(listener) => listener.accept().await,
        }
    }

    /// Where clients should connect.
    pub fn endpoint(&self) -> Result<Endpoint> {
        match self {
            Listener::Tcp(listener) => Ok(Endpoint::Tcp(listener.local_addr()?)),
            #[cfg(unix)]
            Listener::Local(listener) => Ok(Endpoint::Local(listener.path().to_path_buf())),
        }
    }
}

#[cfg(unix)]
mod unix_impl {
    use super::*;
    use tokio::net::UnixListener;

    /// Unix domain socket listener that cleans up its socket file.
    pub struct LocalListener {
        listener: UnixListener,
        path: PathBuf,
    }

    impl LocalListener {
        /// Bind to a unix socket path.
        ///
        /// Removes any existing socket file at the path before binding.
        pub fn bind(path: &Path) -> Result<Self> {
            if path.exists() {
                std::fs::remove_file(path)?;
            }

            let listener = UnixListener::bind(path)?;
            tracing::debug!(path = %path.display(), "Bound unix socket");

            Ok(Self {
                listener,
                path: path.to_path_buf(),
            })
        }

        /// Accept a single connection.
        pub async fn accept(&self) -> Result<Connection> {
            let (stream, _addr) = self.listener.accept().await?;
            Ok(Connection::local(stream))
        }

        /// Get the socket path.
        pub fn path(&self) -> &Path {
            &self.path
        }
    }

    impl Drop for LocalListener {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

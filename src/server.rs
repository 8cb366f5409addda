//! Server builder and accept loops.
//!
//! The [`ServerBuilder`] provides a fluent API for registering methods and
//! configuring listeners. [`ServerBuilder::start`] then:
//! 1. Binds the TCP listener and the unix socket listener
//! 2. Freezes the registry and its descriptor catalogue
//! 3. Spawns one accept loop per listener and one task per connection
//!
//! # Example
//!
//! ```no_run
//! use catwire::{Output, ServerBuilder, Signature};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = ServerBuilder::new()
//!         .method(Signature::public("meow"), |_ctx, _args| async {
//!             Ok(Output::text("Meow world, meow!\n"))
//!         })
//!         .start()
//!         .await?;
//!
//!     server.announce()?;
//!     server.wait_for_shutdown().await;
//!     Ok(())
//! }
//! ```

use std::future::Future;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::ServerConfig;
use crate::control::{build_announcement, write_announcement};
use crate::dispatch::Dispatcher;
use crate::error::{CatwireError, Result};
use crate::handler::{
    register_builtins, BoundArgs, HandlerResult, MethodDescriptor, MethodRegistry, RequestContext,
    Signature,
};
use crate::shutdown::Shutdown;
use crate::transport::{Endpoint, Listener};

/// How long [`Server::wait_for_shutdown`] lets open connections finish.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Pause after a failed accept, so a persistent error does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Builder for configuring and starting a server.
///
/// `ping`, `help` and `quitquitquit` are registered up front; a method
/// registered under the same name replaces the built-in.
pub struct ServerBuilder<S = ()> {
    registry: MethodRegistry<S>,
    state: Arc<S>,
    config: ServerConfig,
}

impl ServerBuilder<()> {
    /// A builder without shared state.
    pub fn new() -> Self {
        Self::with_state(())
    }
}

impl Default for ServerBuilder<()> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Send + Sync + 'static> ServerBuilder<S> {
    /// A builder whose handlers see `state` through
    /// [`RequestContext::state`].
    pub fn with_state(state: S) -> Self {
        Self::with_shared_state(Arc::new(state))
    }

    /// Like [`with_state`](Self::with_state), for state the caller keeps a
    /// handle to.
    pub fn with_shared_state(state: Arc<S>) -> Self {
        let mut registry = MethodRegistry::new();
        register_builtins(&mut registry);

        Self {
            registry,
            state,
            config: ServerConfig::default(),
        }
    }

    /// Register a method returning one output.
    pub fn method<F, Fut>(mut self, signature: Signature, handler: F) -> Self
    where
        F: Fn(RequestContext<S>, BoundArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.registry.register_single(signature, handler);
        self
    }

    /// Register a method returning a stream of outputs.
    ///
    /// See [`StreamHandler`](crate::handler::StreamHandler) for how items
    /// are framed.
    pub fn stream<F, St>(mut self, signature: Signature, handler: F) -> Self
    where
        F: Fn(RequestContext<S>, BoundArgs) -> St + Send + Sync + 'static,
        St: Stream<Item = HandlerResult> + Send + 'static,
    {
        self.registry.register_stream(signature, handler);
        self
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the TCP listen address. Port 0 picks a free port.
    pub fn tcp_addr(mut self, addr: SocketAddr) -> Self {
        self.config.tcp_addr = Some(addr);
        self
    }

    /// Do not listen on TCP.
    pub fn no_tcp(mut self) -> Self {
        self.config.tcp_addr = None;
        self
    }

    /// Set the unix socket path.
    pub fn socket_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.local_socket = true;
        self.config.socket_path = Some(path.into());
        self
    }

    /// Do not listen on a unix socket.
    pub fn no_local_socket(mut self) -> Self {
        self.config.local_socket = false;
        self
    }

    /// Set the token instead of generating one.
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.config.token = Some(token.into());
        self
    }

    /// Require every request path to start with `/<prefix>`.
    pub fn url_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.url_prefix = prefix.into();
        self
    }

    /// Largest accepted request body.
    ///
    /// Default: 1 MiB
    pub fn max_request_size(mut self, bytes: usize) -> Self {
        self.config.max_request_size = bytes;
        self
    }

    /// Largest accepted request head.
    ///
    /// Default: 64 KiB
    pub fn max_head_size(mut self, bytes: usize) -> Self {
        self.config.max_head_size = bytes;
        self
    }

    /// Close connections whose request cycle takes longer than `timeout`.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = Some(timeout);
        self
    }

    /// Honour `Connection: keep-alive` (default) or always close.
    pub fn keep_alive(mut self, enabled: bool) -> Self {
        self.config.keep_alive = enabled;
        self
    }

    /// Bind the listeners and start serving.
    pub async fn start(self) -> Result<Server> {
        let ServerBuilder {
            registry,
            state,
            config,
        } = self;

        let token = config.token.clone().unwrap_or_else(generate_token);

        let mut listeners = Vec::new();
        if let Some(addr) = config.tcp_addr {
            listeners.push(Listener::bind_tcp(addr).await?);
        }
        if let Some(listener) = bind_local(&config)? {
            listeners.push(listener);
        }
        if listeners.is_empty() {
            return Err(CatwireError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "no listener configured",
            )));
        }

        let mut tcp_addr = None;
        let mut socket_path = None;
        for listener in &listeners {
            match listener.endpoint()? {
                Endpoint::Tcp(addr) => tcp_addr = Some(addr),
                Endpoint::Local(path) => socket_path = Some(path),
            }
        }

        let config = ServerConfig {
            tcp_addr,
            socket_path: socket_path.clone(),
            ..config
        };

        let shutdown = Shutdown::new();
        let dispatcher = Arc::new(Dispatcher::new(
            registry,
            state,
            token.clone(),
            &config,
            shutdown.clone(),
        ));
        let catalog = dispatcher.catalog().clone();

        let (drain_tx, drain_rx) = mpsc::channel(1);
        let accept_tasks = listeners
            .into_iter()
            .map(|listener| {
                tokio::spawn(accept_loop(
                    listener,
                    dispatcher.clone(),
                    shutdown.clone(),
                    drain_tx.clone(),
                ))
            })
            .collect();

        tracing::info!(
            tcp = ?tcp_addr,
            socket = ?socket_path,
            methods = catalog.len(),
            "Server started"
        );

        Ok(Server {
            tcp_addr,
            socket_path,
            token,
            prefix: config.normalized_prefix().to_string(),
            catalog,
            shutdown,
            accept_tasks,
            drain_tx,
            drain_rx,
        })
    }
}

/// A running server.
///
/// Dropping it does not stop the listeners; call
/// [`shutdown`](Self::shutdown) or let a caller invoke `quitquitquit`.
pub struct Server {
    tcp_addr: Option<SocketAddr>,
    socket_path: Option<PathBuf>,
    token: String,
    prefix: String,
    catalog: Arc<[MethodDescriptor]>,
    shutdown: Shutdown,
    accept_tasks: Vec<JoinHandle<()>>,
    /// Held by every accept loop and connection task.
    drain_tx: mpsc::Sender<()>,
    drain_rx: mpsc::Receiver<()>,
}

impl Server {
    /// Bound TCP address, if listening on TCP.
    pub fn tcp_addr(&self) -> Option<SocketAddr> {
        self.tcp_addr
    }

    /// Unix socket path, if listening on one.
    pub fn socket_path(&self) -> Option<&Path> {
        self.socket_path.as_deref()
    }

    /// The shared secret private methods require.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Descriptors of every registered method.
    pub fn catalog(&self) -> &[MethodDescriptor] {
        &self.catalog
    }

    /// `http://<host:port>/<prefix/><token>`, if listening on TCP.
    pub fn url(&self) -> Option<String> {
        let addr = self.tcp_addr?;
        let prefix = if self.prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", self.prefix)
        };
        Some(format!("http://{}/{}{}", addr, prefix, self.token))
    }

    /// Where clients can connect, unix socket first.
    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.socket_path
            .iter()
            .map(|p| Endpoint::Local(p.clone()))
            .chain(self.tcp_addr.map(Endpoint::Tcp))
            .collect()
    }

    /// The `$ready` line describing this server.
    pub fn announcement(&self) -> String {
        build_announcement(self.url().as_deref(), self.socket_path(), &self.catalog)
    }

    /// Write the `$ready` line to stdout.
    pub fn announce(&self) -> std::io::Result<()> {
        write_announcement(&mut std::io::stdout().lock(), &self.announcement())
    }

    /// Stop accepting connections.
    pub fn shutdown(&self) {
        self.shutdown.trigger();
    }

    /// A handle that can stop the server from elsewhere.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Wait until shutdown is requested, the listeners have stopped and open
    /// connections have finished (or [`SHUTDOWN_GRACE`] has passed).
    pub async fn wait_for_shutdown(self) {
        let Server {
            shutdown,
            accept_tasks,
            drain_tx,
            mut drain_rx,
            ..
        } = self;

        shutdown.wait().await;
        for task in accept_tasks {
            if let Err(err) = task.await {
                tracing::error!(error = %err, "Accept loop failed");
            }
        }

        drop(drain_tx);
        if tokio::time::timeout(SHUTDOWN_GRACE, drain_rx.recv())
            .await
            .is_err()
        {
            tracing::warn!("Connections still open after shutdown grace period");
        }
        tracing::info!("Server stopped");
    }
}

async fn accept_loop<S: Send + Sync + 'static>(
    listener: Listener,
    dispatcher: Arc<Dispatcher<S>>,
    shutdown: Shutdown,
    drain: mpsc::Sender<()>,
) {
    let endpoint = listener
        .endpoint()
        .map(|e| e.to_string())
        .unwrap_or_default();

    loop {
        tokio::select! {
            _ = shutdown.wait() => break,
            accepted = listener.accept() => match accepted {
                Ok(conn) => {
                    tracing::trace!(peer = %conn.peer(), endpoint = %endpoint, "Accepted connection");
                    let dispatcher = dispatcher.clone();
                    let drain = drain.clone();
                    tokio::spawn(async move {
                        dispatcher.serve(conn).await;
                        drop(drain);
                    });
                }
                Err(err) => {
                    tracing::error!(endpoint = %endpoint, error = %err, "Accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
        }
    }

    tracing::debug!(endpoint = %endpoint, "Listener stopped");
}

#[cfg(unix)]
fn bind_local(config: &ServerConfig) -> Result<Option<Listener>> {
    if !config.local_socket {
        return Ok(None);
    }
    let path = config
        .socket_path
        .clone()
        .unwrap_or_else(crate::transport::generate_socket_path);
    Listener::bind_local(&path).map(Some)
}

#[cfg(not(unix))]
fn bind_local(_config: &ServerConfig) -> Result<Option<Listener>> {
    Ok(None)
}

/// A fresh random token.
pub fn generate_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::Output;

    #[test]
    fn test_builder_registers_builtins() {
        let builder = ServerBuilder::new();

        assert!(builder.registry.contains("ping"));
        assert!(builder.registry.contains("help"));
        assert!(builder.registry.contains("quitquitquit"));
    }

    #[test]
    fn test_builder_method_chaining() {
        let builder = ServerBuilder::new()
            .method(Signature::public("meow"), |_ctx, _args| async {
                Ok(Output::text("Meow world, meow!\n"))
            })
            .stream(Signature::private("purr").optional("count", 1), |_ctx, _args| {
                futures::stream::empty()
            });

        assert!(builder.registry.descriptor("meow").unwrap().is_public());
        assert!(builder.registry.descriptor("purr").unwrap().is_stream());
    }

    #[test]
    fn test_builder_configuration() {
        let builder = ServerBuilder::new()
            .no_tcp()
            .socket_path("/tmp/kitten.sock")
            .token("s3cret")
            .url_prefix("kitten")
            .max_request_size(4096)
            .max_head_size(512)
            .request_timeout(Duration::from_secs(10))
            .keep_alive(false);

        let config = &builder.config;
        assert!(config.tcp_addr.is_none());
        assert!(config.local_socket);
        assert_eq!(config.socket_path, Some(PathBuf::from("/tmp/kitten.sock")));
        assert_eq!(config.token.as_deref(), Some("s3cret"));
        assert_eq!(config.url_prefix, "kitten");
        assert_eq!(config.max_request_size, 4096);
        assert_eq!(config.max_head_size, 512);
        assert_eq!(config.request_timeout, Some(Duration::from_secs(10)));
        assert!(!config.keep_alive);
    }

    #[test]
    fn test_generated_tokens_differ() {
        let a = generate_token();
        let b = generate_token();

        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_start_without_listeners_fails() {
        let result = ServerBuilder::new().no_tcp().no_local_socket().start().await;
        assert!(matches!(result, Err(CatwireError::Io(_))));
    }

    #[tokio::test]
    async fn test_url_includes_prefix_and_token() {
        let server = ServerBuilder::new()
            .no_local_socket()
            .token("s3cret")
            .url_prefix("/kitten/")
            .start()
            .await
            .unwrap();

        let addr = server.tcp_addr().unwrap();
        assert_eq!(
            server.url().unwrap(),
            format!("http://{}/kitten/s3cret", addr)
        );
        assert_eq!(server.endpoints(), vec![Endpoint::Tcp(addr)]);

        server.shutdown();
        server.wait_for_shutdown().await;
    }

    #[tokio::test]
    async fn test_announcement_lists_catalog() {
        let server = ServerBuilder::new()
            .no_local_socket()
            .start()
            .await
            .unwrap();

        let parsed: serde_json::Value = serde_json::from_str(&server.announcement()).unwrap();
        assert_eq!(parsed["params"]["url"], server.url().unwrap());
        assert_eq!(parsed["params"]["methods"]["ping"]["access"], "public");

        server.shutdown();
        server.wait_for_shutdown().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_socket_file_removed_after_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kitten.sock");

        let server = ServerBuilder::new()
            .no_tcp()
            .socket_path(&path)
            .start()
            .await
            .unwrap();
        assert!(path.exists());
        assert!(server.url().is_none());

        server.shutdown();
        server.wait_for_shutdown().await;
        assert!(!path.exists());
    }
}

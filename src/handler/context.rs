//! Request context for handlers.
//!
//! Everything a handler may need besides its arguments travels here:
//! - `state` - the worker's shared state, supplied once at startup
//! - `is_authenticated` - whether the caller presented the token
//! - `take_fds` - descriptors received with the request
//! - `request_shutdown` - stop accepting connections
//!
//! # Example
//!
//! ```
//! use catwire::handler::{BoundArgs, RequestContext};
//! use catwire::{Output, Result};
//!
//! struct Counter {
//!     greeting: String,
//! }
//!
//! async fn greet(ctx: RequestContext<Counter>, _args: BoundArgs) -> Result<Output> {
//!     Ok(Output::text(ctx.state().greeting.clone()))
//! }
//! ```

use std::sync::Arc;

use super::MethodDescriptor;
use crate::codec::Codec;
use crate::config::ServerConfig;
use crate::shutdown::Shutdown;
use crate::transport::{Descriptor, PeerKind};

/// Context passed to request handlers.
///
/// Owned by the handler for the duration of one call. Not `Clone`: received
/// descriptors have exactly one owner.
pub struct RequestContext<S> {
    method: String,
    authenticated: bool,
    peer_kind: PeerKind,
    local_addr: String,
    codec: Codec,
    state: Arc<S>,
    fds: Vec<Descriptor>,
    catalog: Arc<[MethodDescriptor]>,
    config: Arc<ServerConfig>,
    shutdown: Shutdown,
}

impl<S> RequestContext<S> {
    /// Create a context for a call to `method`.
    ///
    /// The dispatcher builds these; handlers only consume them.
    pub fn new(method: impl Into<String>, state: Arc<S>) -> Self {
        Self {
            method: method.into(),
            authenticated: false,
            peer_kind: PeerKind::Tcp,
            local_addr: String::new(),
            codec: Codec::default(),
            state,
            fds: Vec::new(),
            catalog: Arc::from(Vec::new()),
            config: Arc::default(),
            shutdown: Shutdown::new(),
        }
    }

    pub(crate) fn with_auth(mut self, authenticated: bool) -> Self {
        self.authenticated = authenticated;
        self
    }

    pub(crate) fn with_peer(mut self, kind: PeerKind, local_addr: String) -> Self {
        self.peer_kind = kind;
        self.local_addr = local_addr;
        self
    }

    pub(crate) fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }

    pub(crate) fn with_fds(mut self, fds: Vec<Descriptor>) -> Self {
        self.fds = fds;
        self
    }

    pub(crate) fn with_catalog(mut self, catalog: Arc<[MethodDescriptor]>) -> Self {
        self.catalog = catalog;
        self
    }

    pub(crate) fn with_config(mut self, config: Arc<ServerConfig>) -> Self {
        self.config = config;
        self
    }

    pub(crate) fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Name of the method being called.
    #[inline]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Shared worker state.
    #[inline]
    pub fn state(&self) -> &Arc<S> {
        &self.state
    }

    /// True if the caller presented the token.
    #[inline]
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Socket family the request arrived on.
    #[inline]
    pub fn peer_kind(&self) -> PeerKind {
        self.peer_kind
    }

    /// Local address of the connection.
    pub fn local_addr(&self) -> &str {
        &self.local_addr
    }

    /// Codec negotiated for this request.
    #[inline]
    pub fn codec(&self) -> Codec {
        self.codec
    }

    /// Take the descriptors received with the request.
    pub fn take_fds(&mut self) -> Vec<Descriptor> {
        std::mem::take(&mut self.fds)
    }

    /// Descriptors of every registered method.
    pub fn catalog(&self) -> &[MethodDescriptor] {
        &self.catalog
    }

    /// Configuration of the serving worker, with bound addresses filled in.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Stop accepting connections once in-flight replies are written.
    pub fn request_shutdown(&self) {
        self.shutdown.trigger();
    }
}

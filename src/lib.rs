//! # catwire
//!
//! RPC engine for single-worker services.
//!
//! A worker process registers a fixed set of named methods and serves them
//! over a small HTTP/1.1 subset, on TCP and on a unix domain socket at the
//! same time. Clients built against the same registry call them through a
//! [`RemoteInvoker`].
//!
//! ## Architecture
//!
//! - **Wire codec**: MessagePack or JSON, chosen per request by `Content-Type`
//! - **Frame transport**: `Content-Length` replies, chunked streams,
//!   `SCM_RIGHTS` descriptor passing on unix sockets
//! - **Method registry**: explicit registration with access level and
//!   parameter table
//! - **Dispatcher**: token check, argument binding, invocation
//! - **Remote invoker**: single calls and lazily read streams
//!
//! ## Example
//!
//! ```no_run
//! use catwire::{Args, Output, RemoteInvoker, ServerBuilder, Signature};
//! use futures::stream;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> catwire::Result<()> {
//!     let server = ServerBuilder::new()
//!         .method(Signature::public("meow"), |_ctx, _args| async {
//!             Ok(Output::text("Meow world, meow!\n"))
//!         })
//!         .stream(
//!             Signature::private("purr").optional("count", 1),
//!             |_ctx, args| {
//!                 let count: usize = args.get("count").unwrap_or(1);
//!                 stream::iter((0..count).map(|i| Ok(Output::value("purr".repeat(i + 1)))))
//!             },
//!         )
//!         .start()
//!         .await?;
//!
//!     let url = server.url().unwrap_or_default();
//!     let invoker = RemoteInvoker::from_url(&url)?;
//!     let purrs = invoker
//!         .call_stream("purr", Args::new().kwarg("count", 3))
//!         .await?
//!         .collect()
//!         .await?;
//!     assert_eq!(purrs.len(), 3);
//!
//!     server.shutdown();
//!     server.wait_for_shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod config;
pub mod control;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod transport;
pub mod writer;

mod client;
mod dispatch;
mod server;
mod shutdown;

pub use client::{RemoteInvoker, RemoteMethod, RemoteStream, Response};
pub use codec::{Codec, Value};
pub use config::ServerConfig;
pub use error::{CatwireError, Result};
pub use handler::{Args, BoundArgs, Output, RequestContext, Signature};
pub use server::{generate_token, Server, ServerBuilder, SHUTDOWN_GRACE};
pub use shutdown::Shutdown;

//! Handler module - method registration, argument binding and outputs.
//!
//! Provides:
//! - [`MethodRegistry`] - maps method names to descriptors and handlers
//! - [`Signature`] - builder for a method's name, access level and parameters
//! - [`RequestContext`] - shared state, auth result and descriptors for one call
//! - [`Output`] - what a handler returns (or yields, for streams)
//!
//! # Example
//!
//! ```
//! use catwire::handler::{MethodRegistry, Signature};
//! use catwire::Output;
//!
//! let mut registry = MethodRegistry::<()>::new();
//!
//! registry.register_single(
//!     Signature::private("scratch").required("target"),
//!     |_ctx, args| async move {
//!         let target: String = args.get("target")?;
//!         Ok(Output::text(format!("scratched {}", target)))
//!     },
//! );
//!
//! assert!(registry.contains("scratch"));
//! ```

mod args;
mod builtin;
mod context;
mod descriptor;
mod output;
mod registry;

pub use args::{Args, BoundArgs, POSITIONAL_KEY};
pub use builtin::{register_builtins, GOODBYE, STATIC_PONG};
pub use context::RequestContext;
pub use descriptor::{Access, MethodDescriptor, MethodKind, Param, Signature};
pub use output::{Body, Mime, Output, Rendered};
pub use registry::{
    BoxFuture, BoxStream, Handler, HandlerResult, MethodRegistry, Reply, SingleHandler,
    StreamHandler,
};

//! Method registry: explicit, tagged registration of handlers.
//!
//! Each method is registered once at startup with a [`Signature`] (name,
//! access level, parameters) and a handler closure. The registry never
//! changes after the server starts; lookups are exact and case-sensitive.
//!
//! # Example
//!
//! ```
//! use catwire::handler::{MethodRegistry, Signature};
//! use catwire::Output;
//! use futures::stream;
//!
//! let mut registry = MethodRegistry::<()>::new();
//!
//! registry.register_single(Signature::public("meow"), |_ctx, _args| async {
//!     Ok(Output::text("Meow world, meow!\n"))
//! });
//!
//! registry.register_stream(
//!     Signature::private("purr").optional("count", 1),
//!     |_ctx, args| {
//!         let count: usize = args.get("count").unwrap_or(1);
//!         stream::iter((0..count).map(|i| Ok(Output::value("purr".repeat(i + 1)))))
//!     },
//! );
//!
//! assert_eq!(registry.len(), 2);
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;

use futures::Stream;

use super::{BoundArgs, MethodDescriptor, MethodKind, Output, RequestContext, Signature};
use crate::error::Result;

/// Result type for handler functions and stream items.
pub type HandlerResult = Result<Output>;

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Boxed stream for streaming handler results.
pub type BoxStream<'a, T> = Pin<Box<dyn Stream<Item = T> + Send + 'a>>;

/// What a handler hands back to the dispatcher.
pub enum Reply {
    /// One output, once the future resolves.
    Single(BoxFuture<'static, HandlerResult>),
    /// Outputs pulled one at a time until the stream ends.
    Stream(BoxStream<'static, HandlerResult>),
}

/// Trait for handler functions.
pub trait Handler<S>: Send + Sync + 'static {
    /// Start a call with bound arguments.
    fn call(&self, ctx: RequestContext<S>, args: BoundArgs) -> Reply;
}

/// Wrapper for an async function returning one output.
pub struct SingleHandler<F, Fut> {
    handler: F,
    _phantom: PhantomData<fn() -> Fut>,
}

impl<F, Fut> SingleHandler<F, Fut> {
    /// Create a new single-output handler.
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<S, F, Fut> Handler<S> for SingleHandler<F, Fut>
where
    S: Send + Sync + 'static,
    F: Fn(RequestContext<S>, BoundArgs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, ctx: RequestContext<S>, args: BoundArgs) -> Reply {
        Reply::Single(Box::pin((self.handler)(ctx, args)))
    }
}

/// Wrapper for a function returning a stream of outputs.
///
/// Each item goes out as one chunk, encoded like the first item. An item
/// that renders to an empty body is dropped, since a zero-length chunk ends
/// the stream; callers then see fewer items than were produced.
pub struct StreamHandler<F, St> {
    handler: F,
    _phantom: PhantomData<fn() -> St>,
}

impl<F, St> StreamHandler<F, St> {
    /// Create a new streaming handler.
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<S, F, St> Handler<S> for StreamHandler<F, St>
where
    S: Send + Sync + 'static,
    F: Fn(RequestContext<S>, BoundArgs) -> St + Send + Sync + 'static,
    St: Stream<Item = HandlerResult> + Send + 'static,
{
    fn call(&self, ctx: RequestContext<S>, args: BoundArgs) -> Reply {
        Reply::Stream(Box::pin((self.handler)(ctx, args)))
    }
}

/// Entry for a registered method.
struct MethodEntry<S> {
    descriptor: MethodDescriptor,
    handler: Box<dyn Handler<S>>,
}

/// Registry mapping method names to descriptors and handlers.
pub struct MethodRegistry<S> {
    methods: HashMap<String, MethodEntry<S>>,
    /// Names in registration order, for the catalogue.
    order: Vec<String>,
}

impl<S: Send + Sync + 'static> MethodRegistry<S> {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            methods: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Register a method returning one output.
    pub fn register_single<F, Fut>(&mut self, signature: Signature, handler: F)
    where
        F: Fn(RequestContext<S>, BoundArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.register(
            signature.into_descriptor(MethodKind::Single),
            Box::new(SingleHandler::new(handler)),
        );
    }

    /// Register a method returning a stream of outputs.
    pub fn register_stream<F, St>(&mut self, signature: Signature, handler: F)
    where
        F: Fn(RequestContext<S>, BoundArgs) -> St + Send + Sync + 'static,
        St: Stream<Item = HandlerResult> + Send + 'static,
    {
        self.register(
            signature.into_descriptor(MethodKind::Stream),
            Box::new(StreamHandler::new(handler)),
        );
    }

    /// Register a prebuilt descriptor and handler.
    ///
    /// A method registered under an existing name replaces it.
    pub fn register(&mut self, descriptor: MethodDescriptor, handler: Box<dyn Handler<S>>) {
        let name = descriptor.name.clone();
        let previous = self
            .methods
            .insert(name.clone(), MethodEntry { descriptor, handler });

        if previous.is_some() {
            tracing::debug!(method = %name, "Replaced registered method");
        } else {
            self.order.push(name);
        }
    }

    /// Look up a method by exact name.
    pub fn get(&self, name: &str) -> Option<(&MethodDescriptor, &dyn Handler<S>)> {
        self.methods
            .get(name)
            .map(|e| (&e.descriptor, e.handler.as_ref()))
    }

    /// Get a descriptor by name.
    pub fn descriptor(&self, name: &str) -> Option<&MethodDescriptor> {
        self.methods.get(name).map(|e| &e.descriptor)
    }

    /// True if `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// All descriptors in registration order.
    pub fn descriptors(&self) -> Vec<MethodDescriptor> {
        self.order
            .iter()
            .filter_map(|name| self.descriptor(name))
            .cloned()
            .collect()
    }

    /// Number of registered methods.
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

impl<S: Send + Sync + 'static> Default for MethodRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CatwireError;
    use crate::handler::{Access, Args};
    use futures::StreamExt;
    use serde_json::json;
    use std::sync::Arc;

    fn registry() -> MethodRegistry<()> {
        let mut registry = MethodRegistry::new();

        registry.register_single(Signature::public("meow"), |_ctx, _args| async {
            Ok(Output::text("Meow world, meow!\n"))
        });
        registry.register_stream(
            Signature::private("purr")
                .optional("count", 1)
                .optional("purr", "purr"),
            |_ctx, args| {
                let count: usize = args.get("count").unwrap_or(0);
                let purr: String = args.get("purr").unwrap_or_default();
                futures::stream::iter(
                    (0..count).map(move |i| Ok(Output::value(json!({"purr": purr.repeat(i + 1)})))),
                )
            },
        );

        registry
    }

    fn call(registry: &MethodRegistry<()>, name: &str, args: Args) -> Reply {
        let (descriptor, handler) = registry.get(name).unwrap();
        let bound = args.bind(descriptor).unwrap();
        handler.call(RequestContext::new(name, Arc::new(())), bound)
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = registry();

        let meow = registry.descriptor("meow").unwrap();
        assert_eq!(meow.access, Access::Public);
        assert_eq!(meow.kind, MethodKind::Single);

        let purr = registry.descriptor("purr").unwrap();
        assert_eq!(purr.access, Access::Private);
        assert_eq!(purr.kind, MethodKind::Stream);
        assert_eq!(purr.params.len(), 2);
    }

    #[test]
    fn test_lookup_is_case_sensitive() {
        let registry = registry();

        assert!(registry.contains("meow"));
        assert!(!registry.contains("Meow"));
        assert!(registry.get("MEOW").is_none());
    }

    #[test]
    fn test_descriptors_in_registration_order() {
        let names: Vec<_> = registry()
            .descriptors()
            .into_iter()
            .map(|d| d.name)
            .collect();

        assert_eq!(names, vec!["meow", "purr"]);
    }

    #[test]
    fn test_reregistration_replaces() {
        let mut registry = registry();
        registry.register_single(Signature::private("meow"), |_ctx, _args| async {
            Ok(Output::text("hiss"))
        });

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.descriptors()[0].access, Access::Private);
    }

    #[tokio::test]
    async fn test_single_call() {
        let registry = registry();

        match call(&registry, "meow", Args::new()) {
            Reply::Single(fut) => {
                let output = fut.await.unwrap();
                assert_eq!(output.as_text(), Some("Meow world, meow!\n"));
            }
            Reply::Stream(_) => panic!("meow is not a stream"),
        }
    }

    #[tokio::test]
    async fn test_stream_call() {
        let registry = registry();

        let Reply::Stream(stream) = call(&registry, "purr", Args::new().kwarg("count", 3)) else {
            panic!("purr is a stream");
        };
        let items: Vec<_> = stream.map(|item| item.unwrap().into_value()).collect().await;

        assert_eq!(
            items,
            vec![
                json!({"purr": "purr"}),
                json!({"purr": "purrpurr"}),
                json!({"purr": "purrpurrpurr"}),
            ]
        );
    }

    #[tokio::test]
    async fn test_handler_error_is_returned() {
        let mut registry = MethodRegistry::<()>::new();
        registry.register_single(Signature::public("hiss"), |_ctx, _args| async {
            Err(CatwireError::handler("no"))
        });

        let Reply::Single(fut) = call(&registry, "hiss", Args::new()) else {
            panic!("hiss is single");
        };
        assert!(matches!(fut.await, Err(CatwireError::Handler(_))));
    }
}

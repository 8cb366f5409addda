//! Shared fixture: a kitten worker with a method for every test scenario.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use catwire::handler::Signature;
use catwire::{CatwireError, Output, ServerBuilder};
use futures::{stream, StreamExt};
use serde_json::json;

pub const TOKEN: &str = "s3cret";
pub const MEOW: &str = "Meow world, meow!\n";

/// Worker state shared by every handler.
#[derive(Default)]
pub struct Kitten {
    /// Incremented whenever an `endless_purr` producer is dropped.
    pub abandoned_purrs: AtomicUsize,
}

/// Dropped together with the producer that owns it.
struct PurrGuard(Arc<Kitten>);

impl Drop for PurrGuard {
    fn drop(&mut self) {
        self.0.abandoned_purrs.fetch_add(1, Ordering::SeqCst);
    }
}

/// A kitten worker on TCP only, token [`TOKEN`].
pub fn kitten(state: Arc<Kitten>) -> ServerBuilder<Kitten> {
    ServerBuilder::with_shared_state(state)
        .no_local_socket()
        .token(TOKEN)
        .method(
            Signature::public("meow").doc("No authentication needed."),
            |_ctx, _args| async { Ok(Output::text(MEOW)) },
        )
        .stream(
            Signature::private("purr")
                .optional("count", 1)
                .optional("purr", "purr"),
            |_ctx, args| {
                let count: usize = args.get("count").unwrap_or(1);
                let purr: String = args.get("purr").unwrap_or_default();
                stream::iter(
                    (0..count).map(move |i| Ok(Output::value(json!({"purr": purr.repeat(i + 1)})))),
                )
            },
        )
        .method(
            Signature::private("slow_meow").optional("delay", 0.0),
            |_ctx, args| async move {
                let delay: f64 = args.get("delay")?;
                tokio::time::sleep(Duration::from_secs_f64(delay)).await;
                Ok(Output::value(format!("meow after {}", delay)))
            },
        )
        .method(
            Signature::private("add").required("a").optional("b", 0),
            |_ctx, args| async move {
                let a: i64 = args.get("a")?;
                let b: i64 = args.get("b")?;
                Ok(Output::value(a + b))
            },
        )
        .method(Signature::private("hiss"), |_ctx, _args| async {
            Err(CatwireError::handler("hiss!"))
        })
        .method(
            Signature::private("scratch").optional("depth", 0),
            |_ctx, args| async move {
                let depth: u32 = args.get("depth")?;
                if depth == 0 {
                    panic!("claws out");
                }
                Ok(Output::value(depth))
            },
        )
        .stream(
            Signature::private("purr_then_hiss").optional("count", 2),
            |_ctx, args| {
                let count: usize = args.get("count").unwrap_or(0);
                stream::iter((0..count).map(|i| Ok(Output::value(i))))
                    .chain(stream::once(async { Err(CatwireError::handler("hiss!")) }))
            },
        )
        .stream(Signature::private("mixed_purr"), |_ctx, _args| {
            stream::iter([
                Ok(Output::value(json!({"purr": 1}))),
                Ok(Output::text("purr")),
                Ok(Output::value(json!({"purr": 3}))),
            ])
        })
        .stream(Signature::private("text_then_value"), |_ctx, _args| {
            stream::iter([
                Ok(Output::text("first")),
                Ok(Output::value(json!({"x": 1}))),
            ])
        })
        .stream(Signature::private("endless_purr"), |ctx, _args| {
            let guard = PurrGuard(ctx.state().clone());
            stream::unfold(guard, |guard| async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Some((Ok(Output::value("purr")), guard))
            })
        })
}

/// Poll `check` until it holds or a second passes.
pub async fn eventually(check: impl Fn() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

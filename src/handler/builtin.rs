//! Methods every worker answers: `ping`, `help`, `quitquitquit` and `config`.

use serde_json::json;

use super::{MethodRegistry, Output, RequestContext, Signature};
use crate::codec::Value;
use crate::error::CatwireError;

/// Static reply to an unauthenticated `ping`.
pub const STATIC_PONG: &str = "Pong\n";

/// Reply to `quitquitquit`.
pub const GOODBYE: &str = "Goodbye forever";

/// Register the built-in methods. Later registrations may replace them.
pub fn register_builtins<S: Send + Sync + 'static>(registry: &mut MethodRegistry<S>) {
    registry.register_single(
        Signature::public("ping").doc("Check whether the worker is running."),
        |ctx: RequestContext<S>, _args| async move {
            if !ctx.is_authenticated() {
                return Ok(Output::text(STATIC_PONG));
            }
            Ok(Output::value(json!({
                "pong": true,
                "conn": ctx.local_addr(),
            })))
        },
    );

    registry.register_single(
        Signature::private("help")
            .optional("command", Value::Null)
            .doc("Describe every method, or only `command`."),
        |ctx: RequestContext<S>, args| async move {
            let command: Option<String> = args.get("command")?;

            let described = match command {
                None => serde_json::to_value(ctx.catalog()),
                Some(name) => {
                    let descriptor = ctx
                        .catalog()
                        .iter()
                        .find(|d| d.name == name)
                        .ok_or(CatwireError::UnknownMethod(name))?;
                    serde_json::to_value(descriptor)
                }
            };

            described
                .map(Output::value)
                .map_err(|e| CatwireError::Encode(e.to_string()))
        },
    );

    registry.register_single(
        Signature::private("quitquitquit").doc("Shut down the worker."),
        |ctx: RequestContext<S>, _args| async move {
            tracing::info!("Shutdown requested by caller");
            ctx.request_shutdown();
            Ok(Output::value(GOODBYE))
        },
    );

    registry.register_single(
        Signature::private("config").doc("Return the current configuration, without the token."),
        |ctx: RequestContext<S>, _args| async move {
            serde_json::to_value(ctx.config())
                .map(Output::value)
                .map_err(|e| CatwireError::Encode(e.to_string()))
        },
    );
}

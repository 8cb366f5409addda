//! Kitten worker - the smallest useful catwire service, plus a caller.
//!
//! ```text
//! cargo run --example kitten -- serve --token s3cret
//! cargo run --example kitten -- call --url http://127.0.0.1:4000/s3cret purr count=3
//! ```
//!
//! `serve` prints one `$ready` JSON line on stdout; logs go to stderr.
//! `call` prints every output of the reply, one per line.

use std::net::SocketAddr;
use std::path::PathBuf;

use catwire::{Args, Codec, Output, RemoteInvoker, ServerBuilder, Signature, Value};
use clap::{Parser, Subcommand};
use futures::stream;

#[derive(Parser, Debug)]
#[command(name = "kitten")]
#[command(about = "Meow and purr over catwire")]
struct Cli {
    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the worker
    Serve {
        /// TCP address to listen on
        #[arg(long, default_value = "127.0.0.1:0")]
        tcp: SocketAddr,

        /// Do not listen on TCP
        #[arg(long, conflicts_with = "tcp")]
        no_tcp: bool,

        /// Unix socket path (generated if absent)
        #[arg(long)]
        socket: Option<PathBuf>,

        /// Token for private methods (generated if absent)
        #[arg(long)]
        token: Option<String>,

        /// URL prefix
        #[arg(long, default_value = "")]
        prefix: String,
    },

    /// Call a method on a running worker
    Call {
        /// Worker URL, as announced
        #[arg(long)]
        url: String,

        /// Send JSON instead of MessagePack
        #[arg(long)]
        json: bool,

        /// Method name
        method: String,

        /// Arguments: `value` or `name=value`, values parsed as JSON when possible
        args: Vec<String>,
    },
}

fn init_logging(debug: bool) {
    let fallback = if debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(fallback)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

fn kitten() -> ServerBuilder {
    ServerBuilder::new()
        .method(
            Signature::public("meow").doc("Say hello, no token needed."),
            |_ctx, _args| async { Ok(Output::text("Meow world, meow!\n")) },
        )
        .stream(
            Signature::private("purr")
                .optional("count", 1)
                .optional("purr", "purr")
                .doc("Purr `count` times, each purr longer than the last."),
            |_ctx, args| {
                let count: usize = args.get("count").unwrap_or(1);
                let purr: String = args.get("purr").unwrap_or_else(|_| "purr".to_string());
                stream::iter((1..=count).map(move |i| {
                    Ok(Output::value(serde_json::json!({ "purr": purr.repeat(i) })))
                }))
            },
        )
}

fn parse_value(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

fn parse_args(raw: &[String]) -> Args {
    raw.iter().fold(Args::new(), |args, item| match item.split_once('=') {
        Some((name, value)) => args.kwarg(name, parse_value(value)),
        None => args.arg(parse_value(item)),
    })
}

fn print_output(output: Output) {
    match output.as_text() {
        Some(text) => print!("{}", text),
        None => println!("{}", output.into_value()),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    match cli.command {
        Command::Serve {
            tcp,
            no_tcp,
            socket,
            token,
            prefix,
        } => {
            let mut builder = kitten().url_prefix(prefix);
            builder = if no_tcp {
                builder.no_tcp()
            } else {
                builder.tcp_addr(tcp)
            };
            if let Some(path) = socket {
                builder = builder.socket_path(path);
            }
            if let Some(token) = token {
                builder = builder.token(token);
            }

            let server = builder.start().await?;
            server.announce()?;

            let shutdown = server.shutdown_handle();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("Interrupted");
                    shutdown.trigger();
                }
            });

            server.wait_for_shutdown().await;
        }

        Command::Call {
            url,
            json,
            method,
            args,
        } => {
            let codec = if json { Codec::Json } else { Codec::MsgPack };
            let invoker = RemoteInvoker::from_url(&url)?.with_codec(codec);

            for output in invoker
                .call(&method, parse_args(&args))
                .await?
                .into_outputs()
                .await?
            {
                print_output(output);
            }
        }
    }

    Ok(())
}

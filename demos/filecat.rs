//! Filecat - passing open files over a unix socket.
//!
//! ```text
//! cargo run --example filecat -- serve --socket /tmp/filecat.sock --token s3cret
//! cargo run --example filecat -- cat --socket /tmp/filecat.sock --token s3cret Cargo.toml
//! cargo run --example filecat -- open --socket /tmp/filecat.sock --token s3cret Cargo.toml
//! ```
//!
//! `cat` hands an open file to the worker, which reads it. `open` asks the
//! worker to open a file and hand the descriptor back.

#[cfg(unix)]
mod unix_demo {
    use std::fs::File;
    use std::io::Read;
    use std::path::PathBuf;

    use catwire::transport::Descriptor;
    use catwire::{Args, CatwireError, Output, RemoteInvoker, ServerBuilder, Signature};
    use clap::{Parser, Subcommand};

    #[derive(Parser, Debug)]
    #[command(name = "filecat")]
    #[command(about = "Descriptor passing over catwire")]
    struct Cli {
        /// Unix socket path
        #[arg(long, global = true, default_value = "/tmp/filecat.sock")]
        socket: PathBuf,

        /// Token for private methods
        #[arg(long, global = true, default_value = "s3cret")]
        token: String,

        #[command(subcommand)]
        command: Command,
    }

    #[derive(Subcommand, Debug)]
    enum Command {
        /// Run the worker on the unix socket only
        Serve,
        /// Send a file to the worker and print what it read
        Cat { file: PathBuf },
        /// Have the worker open a file and read the returned descriptor
        Open { file: PathBuf },
    }

    fn read_all(fd: Descriptor) -> std::io::Result<String> {
        let mut contents = String::new();
        File::from(fd).read_to_string(&mut contents)?;
        Ok(contents)
    }

    async fn serve(socket: PathBuf, token: String) -> catwire::Result<()> {
        let server = ServerBuilder::new()
            .no_tcp()
            .socket_path(socket)
            .token(token)
            .method(
                Signature::private("cat").doc("Read every file passed with the request."),
                |mut ctx, _args| async move {
                    let fds = ctx.take_fds();
                    tracing::info!(count = fds.len(), "Reading passed files");

                    let mut contents = String::new();
                    for fd in fds {
                        contents.push_str(&read_all(fd).map_err(CatwireError::handler)?);
                    }
                    Ok(Output::text(contents))
                },
            )
            .method(
                Signature::private("open")
                    .required("path")
                    .doc("Open `path` and return its descriptor."),
                |_ctx, args| async move {
                    let path: String = args.get("path")?;
                    let file = File::open(&path).map_err(CatwireError::handler)?;
                    Ok(Output::value(path).with_fds([Descriptor::from(file)]))
                },
            )
            .start()
            .await?;

        server.announce()?;
        server.wait_for_shutdown().await;
        Ok(())
    }

    pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
        let cli = Cli::parse();
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .with_writer(std::io::stderr)
            .init();

        let invoker = RemoteInvoker::local(&cli.socket).with_token(cli.token.as_str());

        match cli.command {
            Command::Serve => serve(cli.socket, cli.token).await?,

            Command::Cat { file } => {
                let fd = Descriptor::from(File::open(&file)?);
                let output = invoker
                    .call_with_fds("cat", Args::new(), vec![fd])
                    .await?
                    .into_outputs()
                    .await?;
                for item in output {
                    print!("{}", item.as_text().unwrap_or_default());
                }
            }

            Command::Open { file } => {
                let path = std::fs::canonicalize(&file)?;
                let mut output = invoker
                    .call_single("open", Args::new().arg(path.display().to_string()))
                    .await?;
                for fd in output.take_fds() {
                    print!("{}", read_all(fd)?);
                }
            }
        }

        Ok(())
    }
}

#[cfg(unix)]
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    unix_demo::run().await
}

#[cfg(not(unix))]
fn main() {
    eprintln!("filecat needs unix domain sockets");
}

//! Entry point for `tftp-server`.
//!
//! Parses CLI arguments and dispatches into either **serve** or **get** mode.
//! All protocol work is delegated to library modules; `main.rs` owns only
//! process setup (logging, signal handling, argument parsing).

use std::future::Future;
use std::io::{self, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};

use tftp_server::server::{Server, ServerConfig, DEFAULT_RETRIES};
use tftp_server::socket::Socket;

/// Read-only TFTP server for a single in-memory payload.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Serve the contents of a file to every client that asks.
    Serve {
        /// Local address to bind (e.g. 0.0.0.0:69).
        #[arg(short, long, default_value = "0.0.0.0:69")]
        bind: SocketAddr,
        /// File whose contents become the payload (read once at startup).
        #[arg(short, long)]
        file: PathBuf,
        /// Transmissions per block before a transfer is abandoned.
        #[arg(long, default_value_t = DEFAULT_RETRIES)]
        retries: u8,
        /// Milliseconds to wait for each ACK.
        #[arg(long, default_value_t = 6000)]
        timeout_ms: u64,
        /// Abort a transfer after this many stray datagrams in one ACK wait.
        #[arg(long)]
        max_ignored: Option<u32>,
    },
    /// Download a file from a server.
    Get {
        /// Remote server address (e.g. 127.0.0.1:69).
        #[arg(short, long)]
        server: SocketAddr,
        /// Filename to request.
        #[arg(short, long)]
        name: String,
        /// Where to write the payload (stdout when omitted).
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Milliseconds to wait for each datagram.
        #[arg(long, default_value_t = 6000)]
        timeout_ms: u64,
    },
}

/// Resolve once `signal` fires.  If the handler cannot be installed, log it
/// and never resolve, so the listener keeps serving.
async fn shutdown_on(signal: impl Future<Output = io::Result<()>>) {
    match signal.await {
        Ok(()) => log::info!("Received Ctrl-C"),
        Err(e) => {
            log::error!("Unable to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();

    match cli.mode {
        Mode::Serve {
            bind,
            file,
            retries,
            timeout_ms,
            max_ignored,
        } => {
            let payload = tokio::fs::read(&file)
                .await
                .with_context(|| format!("reading payload from {}", file.display()))?;
            let config = ServerConfig {
                retries,
                timeout: Duration::from_millis(timeout_ms),
                max_ignored,
            };
            let server = Server::with_config(payload, config);
            let socket = Socket::bind(bind)
                .await
                .with_context(|| format!("binding {bind}"))?;
            log::info!("Listening on {} ...", socket.local_addr);

            server
                .serve_with_shutdown(socket, shutdown_on(tokio::signal::ctrl_c()))
                .await?;
        }
        Mode::Get {
            server,
            name,
            output,
            timeout_ms,
        } => {
            log::info!("Fetching {name} from {server}");
            let data = tftp_server::client::fetch(server, &name, Duration::from_millis(timeout_ms)).await?;
            match output {
                Some(path) => tokio::fs::write(&path, &data)
                    .await
                    .with_context(|| format!("writing {}", path.display()))?,
                None => io::stdout().write_all(&data)?,
            }
            log::info!("Received {} bytes", data.len());
        }
    }
    Ok(())
}

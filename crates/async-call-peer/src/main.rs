//! Async Call Peer - JSON-RPC over TCP from the command line.
//!
//! `serve` exposes a small demo implementation on a TCP port; `call` connects
//! to any peer speaking length-prefixed JSON frames and issues one call.

mod client;
mod demo;
mod server;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "async-call-peer")]
#[command(about = "JSON-RPC peer over TCP")]
struct Args {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the demo methods until interrupted
    Serve {
        /// Port to listen on (0 = auto-assign)
        #[arg(short, long, default_value = "0")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Silently ignore unknown methods and malformed messages
        #[arg(long)]
        lenient: bool,
    },

    /// Call a method on a remote peer and print the result
    Call {
        /// Address of the remote peer
        #[arg(long, default_value = "127.0.0.1:7700")]
        addr: String,

        /// Method name
        method: String,

        /// Parameters as JSON (array, object or a single value)
        params: Option<String>,

        /// Send a notification instead of a call
        #[arg(long, conflicts_with = "iterate")]
        notify: bool,

        /// Treat the method as a generator and print every yielded value
        #[arg(long)]
        iterate: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr; stdout carries results and the port line.
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    match args.command {
        Command::Serve {
            port,
            host,
            lenient,
        } => server::serve(&host, port, !lenient).await,
        Command::Call {
            addr,
            method,
            params,
            notify,
            iterate,
        } => {
            let params = client::parse_params(params.as_deref())?;
            let mode = if notify {
                client::Mode::Notify
            } else if iterate {
                client::Mode::Iterate
            } else {
                client::Mode::Call
            };
            client::run(&addr, &method, params, mode).await
        }
    }
}

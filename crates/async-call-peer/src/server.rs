//! TCP server: one engine per connection.

use crate::demo;
use anyhow::Result;
use async_call::channel::framed::framed;
use async_call::AsyncGeneratorCall;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info};

/// Listen on `host:port` and serve the demo methods until Ctrl-C.
pub async fn serve(host: &str, port: u16, strict: bool) -> Result<()> {
    let listener = TcpListener::bind((host, port)).await?;
    let addr = listener.local_addr()?;

    // Print port for scripts to read (intentional stdout)
    println!("RPC_PORT={}", addr.port());
    info!("Serving on {} (strict: {})", addr, strict);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received, exiting");
                return Ok(());
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tokio::spawn(handle_connection(stream, peer, strict));
                }
                Err(e) => {
                    error!("Accept error: {}", e);
                }
            }
        }
    }
}

async fn handle_connection(stream: TcpStream, peer: SocketAddr, strict: bool) {
    debug!("Connection from {}", peer);
    if let Err(e) = stream.set_nodelay(true) {
        debug!("Could not disable Nagle for {}: {}", peer, e);
    }

    let (sender, receiver) = framed(stream);
    let (_engine, driver) = AsyncGeneratorCall::builder()
        .implementation(demo::methods())
        .name(peer.to_string())
        .strict(strict)
        .build(sender, receiver);

    match driver.run().await {
        Ok(()) => debug!("Connection {} closed", peer),
        Err(e) => debug!("Connection {} ended: {}", peer, e),
    }
}

//! One-shot client for `async-call-peer call`.

use anyhow::{anyhow, Context, Result};
use async_call::channel::framed::framed;
use async_call::config::ChannelConfig;
use async_call::{AsyncGeneratorCall, Params, RpcError};
use futures::StreamExt;
use serde_json::Value;
use tokio::net::TcpStream;
use tracing::debug;

/// What to do with the method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Call,
    Notify,
    Iterate,
}

/// Parse the command-line parameters. Missing means no arguments.
pub fn parse_params(raw: Option<&str>) -> Result<Params> {
    match raw {
        None => Ok(Params::empty()),
        Some(raw) => {
            let value: Value =
                serde_json::from_str(raw).with_context(|| format!("Invalid params JSON: {}", raw))?;
            Ok(Params::from(value))
        }
    }
}

pub async fn run(addr: &str, method: &str, params: Params, mode: Mode) -> Result<()> {
    let stream = tokio::time::timeout(ChannelConfig::CONNECT_TIMEOUT, TcpStream::connect(addr))
        .await
        .map_err(|_| anyhow!("Timed out connecting to {}", addr))?
        .with_context(|| format!("Failed to connect to {}", addr))?;
    stream.set_nodelay(true)?;
    debug!("Connected to {}", addr);

    let (sender, receiver) = framed(stream);
    let (peer, driver) = AsyncGeneratorCall::builder()
        .name(addr.to_string())
        .build(sender, receiver);
    let driver = driver.spawn();

    let outcome = match mode {
        Mode::Call => call(&peer, method, params).await,
        Mode::Notify => notify(&peer, method, params).await,
        Mode::Iterate => iterate(&peer, method, params).await,
    };

    driver.abort();
    outcome
}

async fn call(peer: &AsyncGeneratorCall, method: &str, params: Params) -> Result<()> {
    let result = peer
        .remote()
        .call_optional(method, params)
        .await
        .map_err(describe)?;
    match result {
        Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        None => println!("undefined"),
    }
    Ok(())
}

async fn notify(peer: &AsyncGeneratorCall, method: &str, params: Params) -> Result<()> {
    let remote = peer.remote();
    remote.notify(method, params)?;
    remote.flush().await?;
    Ok(())
}

async fn iterate(peer: &AsyncGeneratorCall, method: &str, params: Params) -> Result<()> {
    let mut values = std::pin::pin!(peer.call(method, params)?.into_stream());
    while let Some(value) = values.next().await {
        println!("{}", serde_json::to_string(&value.map_err(describe)?)?);
    }
    Ok(())
}

/// Render remote errors with their stitched stack.
fn describe(err: RpcError) -> anyhow::Error {
    match err.as_remote() {
        Some(remote) if !remote.stack().is_empty() => {
            anyhow!("{} (code {})\n{}", remote, remote.code(), remote.stack())
        }
        Some(remote) => anyhow!("{} (code {})", remote, remote.code()),
        None => anyhow::Error::new(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_params() {
        assert!(parse_params(None).unwrap().is_empty());
        assert_eq!(
            parse_params(Some("[1, 2]")).unwrap(),
            Params::from(json!([1, 2]))
        );
        assert_eq!(
            parse_params(Some(r#""solo""#)).unwrap(),
            Params::from(vec![json!("solo")])
        );
        assert!(parse_params(Some("{oops")).is_err());
    }
}

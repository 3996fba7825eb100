//! End-to-end tests for the async-call-peer binary.
//!
//! A server process is spawned on an auto-assigned port and exercised both
//! through the library over TCP and through the `call` subcommand.

use async_call::channel::framed::framed;
use async_call::{AsyncGeneratorCall, Driver, ErrorKind};
use futures::StreamExt;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tokio::net::TcpStream;

struct PeerServerHandle {
    child: tokio::process::Child,
    port: u16,
    stdout_drain: Option<tokio::task::JoinHandle<()>>,
}

impl PeerServerHandle {
    fn addr(&self) -> String {
        format!("127.0.0.1:{}", self.port)
    }

    async fn stop(mut self) {
        if let Some(drain) = self.stdout_drain.take() {
            drain.abort();
        }
        let _ = self.child.kill().await;
        let _ = self.child.wait().await;
    }
}

impl Drop for PeerServerHandle {
    fn drop(&mut self) {
        if let Some(drain) = self.stdout_drain.take() {
            drain.abort();
        }
        let _ = self.child.start_kill();
    }
}

fn peer_binary() -> Result<PathBuf, String> {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_async-call-peer") {
        return Ok(PathBuf::from(path));
    }

    let current_exe = std::env::current_exe()
        .map_err(|e| format!("failed to resolve current_exe for fallback: {e}"))?;
    let target_debug_dir = current_exe
        .parent()
        .and_then(|p| p.parent())
        .ok_or_else(|| "failed to resolve target/debug directory for fallback".to_string())?;

    let mut fallback = target_debug_dir.join("async-call-peer");
    if cfg!(target_os = "windows") {
        fallback.set_extension("exe");
    }
    if !fallback.exists() {
        return Err(format!(
            "CARGO_BIN_EXE_async-call-peer not set and fallback binary not found at {}",
            fallback.display()
        ));
    }
    Ok(fallback)
}

/// Start `async-call-peer serve` and wait for its `RPC_PORT=` line.
async fn start_peer_server() -> Result<PeerServerHandle, String> {
    let binary = peer_binary()?;
    let mut child = tokio::process::Command::new(&binary)
        .arg("serve")
        .arg("--host")
        .arg("127.0.0.1")
        .arg("--port")
        .arg("0")
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| format!("failed to spawn async-call-peer: {e}"))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| "failed to capture stdout".to_string())?;
    let mut lines = tokio::io::BufReader::new(stdout).lines();

    let mut discovered_port: Option<u16> = None;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
    while tokio::time::Instant::now() < deadline {
        match tokio::time::timeout(Duration::from_millis(250), lines.next_line()).await {
            Ok(Ok(Some(line))) => {
                if let Some(value) = line.strip_prefix("RPC_PORT=") {
                    let parsed = value
                        .trim()
                        .parse::<u16>()
                        .map_err(|e| format!("invalid RPC_PORT value '{value}': {e}"))?;
                    discovered_port = Some(parsed);
                    break;
                }
            }
            Ok(Ok(None)) => break,
            Ok(Err(err)) => return Err(format!("failed to read async-call-peer stdout: {err}")),
            Err(_) => continue,
        }
    }

    let port = discovered_port
        .ok_or_else(|| "RPC_PORT line not emitted by async-call-peer".to_string())?;
    let stdout_drain =
        tokio::spawn(async move { while let Ok(Some(_)) = lines.next_line().await {} });

    Ok(PeerServerHandle {
        child,
        port,
        stdout_drain: Some(stdout_drain),
    })
}

async fn connect(server: &PeerServerHandle) -> (AsyncGeneratorCall, Driver) {
    let stream = TcpStream::connect(server.addr())
        .await
        .expect("Failed to connect to peer server");
    let (sender, receiver) = framed(stream);
    AsyncGeneratorCall::builder()
        .name("cli-test")
        .build(sender, receiver)
}

/// Run the `call` subcommand against the server and capture its output.
async fn run_call(server: &PeerServerHandle, args: &[&str]) -> std::process::Output {
    let binary = peer_binary().expect("peer binary");
    let addr = server.addr();
    let mut command = tokio::process::Command::new(binary);
    command.arg("call").arg("--addr").arg(&addr).args(args);
    tokio::time::timeout(Duration::from_secs(20), command.output())
        .await
        .expect("call subcommand timed out")
        .expect("failed to run call subcommand")
}

#[tokio::test]
async fn test_plain_methods_over_tcp() {
    let server = start_peer_server().await.expect("start server");
    let (peer, driver) = connect(&server).await;
    let driver = driver.spawn();
    let remote = peer.remote();

    assert_eq!(remote.call("add", json!([1, 2, 39])).await.unwrap(), json!(42));
    assert_eq!(
        remote.call("echo", json!({"hello": "world"})).await.unwrap(),
        json!({"hello": "world"})
    );
    assert_eq!(remote.call_optional("nothing", ()).await.unwrap(), None);

    let err = remote.call("fail", json!(["nope"])).await.unwrap_err();
    let remote_err = err.as_remote().expect("remote error");
    assert_eq!(remote_err.message(), "nope");
    assert!(remote_err.is(ErrorKind::Error));

    let err = remote.call("missing", ()).await.unwrap_err();
    assert_eq!(err.as_remote().map(|e| e.code()), Some(-32601));

    driver.abort();
    server.stop().await;
}

#[tokio::test]
async fn test_count_generator_over_tcp() {
    let server = start_peer_server().await.expect("start server");
    let (peer, driver) = connect(&server).await;
    let driver = driver.spawn();

    let values: Vec<Value> = peer
        .call("count", json!([4]))
        .unwrap()
        .into_stream()
        .map(|v| v.unwrap())
        .collect()
        .await;
    assert_eq!(values, vec![json!(0), json!(1), json!(2), json!(3)]);

    driver.abort();
    server.stop().await;
}

#[tokio::test]
async fn test_server_outlives_a_client() {
    let server = start_peer_server().await.expect("start server");

    let (first, driver) = connect(&server).await;
    let driver = driver.spawn();
    assert_eq!(first.remote().call("add", json!([1, 1])).await.unwrap(), json!(2));
    driver.abort();
    let _ = driver.await;
    drop(first);

    let (second, driver) = connect(&server).await;
    let driver = driver.spawn();
    assert_eq!(second.remote().call("add", json!([2, 2])).await.unwrap(), json!(4));
    driver.abort();

    server.stop().await;
}

#[tokio::test]
async fn test_call_subcommand_prints_result() {
    let server = start_peer_server().await.expect("start server");

    let output = run_call(&server, &["add", "[20, 22]"]).await;
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "42");

    let output = run_call(&server, &["nothing"]).await;
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "undefined");

    let output = run_call(&server, &["--iterate", "count", "[3]"]).await;
    assert!(output.status.success());
    let lines: Vec<String> = String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::to_string)
        .collect();
    assert_eq!(lines, vec!["0", "1", "2"]);

    server.stop().await;
}

#[tokio::test]
async fn test_call_subcommand_reports_failure() {
    let server = start_peer_server().await.expect("start server");

    let output = run_call(&server, &["fail", r#"["bad input"]"#]).await;
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("bad input"));

    let output = run_call(&server, &["--notify", "echo", "[1]"]).await;
    assert!(output.status.success());
    assert!(output.stdout.is_empty());

    server.stop().await;
}

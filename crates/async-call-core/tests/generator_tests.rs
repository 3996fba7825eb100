//! Integration tests for remote async iterators.

use async_call::channel::memory::{self, MemoryReceiver, MemorySender};
use async_call::channel::{ChannelReceiver, ChannelSender};
use async_call::{
    AsyncGeneratorCall, AsyncGeneratorCallBuilder, ErrorKind, IteratorResult, Methods, Params,
    Payload, RemoteError, RemoteIterator, RpcError,
};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use std::time::Duration;

/// Sums the values passed in and yields the running total.
struct Accumulator {
    total: i64,
}

#[async_trait]
impl RemoteIterator for Accumulator {
    async fn next(&mut self, value: Value) -> Result<IteratorResult, RemoteError> {
        self.total += value.as_i64().unwrap_or(0);
        Ok(IteratorResult::yielded(json!(self.total)))
    }

    async fn throw(&mut self, value: Value) -> Option<Result<IteratorResult, RemoteError>> {
        Some(Err(RemoteError::range_error(format!("thrown: {}", value))))
    }
}

fn demo_methods() -> Methods {
    Methods::new()
        .method("add", |params: Params| async move {
            let (a, b): (i64, i64) = params.parse()?;
            Ok(json!(a + b))
        })
        .stream("count", |params: Params| {
            let n = params.get(0).and_then(Value::as_u64).unwrap_or(0);
            futures::stream::iter((0..n).map(|i| Ok(json!(i))))
        })
        .stream("broken", |_params: Params| {
            futures::stream::iter(vec![
                Ok(json!("first")),
                Err(RemoteError::error("stream broke")),
            ])
        })
        .generator("sum", |_params: Params| Ok(Accumulator { total: 0 }))
}

fn connect(server: AsyncGeneratorCallBuilder) -> AsyncGeneratorCall {
    let ((client_tx, client_rx), (server_tx, server_rx)) = memory::pair();

    let (_server, driver) = server.build(server_tx, server_rx);
    driver.spawn();
    let (client, driver) = AsyncGeneratorCall::builder().build(client_tx, client_rx);
    driver.spawn();
    client
}

fn served() -> AsyncGeneratorCall {
    connect(AsyncGeneratorCall::builder().implementation(demo_methods()))
}

#[tokio::test]
async fn test_stream_generator_collects() {
    let client = served();

    let values: Vec<Value> = client
        .call("count", json!([3]))
        .unwrap()
        .into_stream()
        .map(|item| item.unwrap())
        .collect()
        .await;
    assert_eq!(values, vec![json!(0), json!(1), json!(2)]);
}

#[tokio::test]
async fn test_values_flow_into_generator() {
    let client = served();
    let mut sum = client.call("sum", ()).unwrap();

    assert_eq!(sum.next(json!(1)).await.unwrap(), IteratorResult::yielded(json!(1)));
    assert_eq!(sum.next(json!(2)).await.unwrap(), IteratorResult::yielded(json!(3)));
    assert!(!sum.is_done());
}

#[tokio::test]
async fn test_finish_early() {
    let client = served();
    let mut count = client.call("count", json!([10])).unwrap();

    assert_eq!(count.next(Value::Null).await.unwrap().value, json!(0));
    assert_eq!(
        count.finish(json!("bye")).await.unwrap(),
        IteratorResult::finished(json!("bye"))
    );
    assert!(count.is_done());

    // Further steps are answered locally.
    assert_eq!(
        count.next(Value::Null).await.unwrap(),
        IteratorResult::finished(Value::Null)
    );
}

#[tokio::test]
async fn test_throw_into_generator() {
    let client = served();
    let mut sum = client.call("sum", ()).unwrap();
    sum.next(json!(5)).await.unwrap();

    let err = sum.throw(json!("stop")).await.unwrap_err();
    let remote = err.as_remote().expect("remote error");
    assert_eq!(remote.kind(), ErrorKind::RangeError);
    assert!(sum.is_done());

    // Throwing into a finished generator raises the value locally.
    let err = sum.throw(json!("again")).await.unwrap_err();
    assert_eq!(err.as_remote().unwrap().message(), "again");
}

#[tokio::test]
async fn test_stream_error_surfaces_once() {
    let client = served();

    let items: Vec<Result<Value, RpcError>> = client
        .call("broken", ())
        .unwrap()
        .into_stream()
        .collect()
        .await;
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].as_ref().unwrap(), &json!("first"));
    assert_eq!(
        items[1].as_ref().unwrap_err().as_remote().unwrap().message(),
        "stream broke"
    );
}

#[tokio::test]
async fn test_concurrent_sessions_are_independent() {
    let client = served();
    let mut first = client.call("count", json!([2])).unwrap();
    let mut second = client.call("count", json!([3])).unwrap();

    assert_eq!(first.next(Value::Null).await.unwrap().value, json!(0));
    assert_eq!(second.next(Value::Null).await.unwrap().value, json!(0));
    assert_eq!(first.next(Value::Null).await.unwrap().value, json!(1));
    assert!(first.next(Value::Null).await.unwrap().done);
    assert_eq!(second.next(Value::Null).await.unwrap().value, json!(1));

    assert_ne!(first.handle().await.unwrap(), second.handle().await.unwrap());
}

#[tokio::test]
async fn test_unknown_generator_strict() {
    let client = served();
    let mut missing = client.call("missing", ()).unwrap();

    let err = missing.next(Value::Null).await.unwrap_err();
    let remote = err.as_remote().expect("remote error");
    assert_eq!(remote.kind(), ErrorKind::TypeError);
    assert_eq!(remote.code(), -32601);
    assert!(missing.is_done());
}

#[tokio::test]
async fn test_plain_methods_still_served() {
    let client = served();
    assert_eq!(
        client.remote().call("add", json!([1, 2])).await.unwrap(),
        json!(3)
    );
}

#[tokio::test]
async fn test_method_handles() {
    let client = served();

    let count = client.method("count").unwrap();
    assert_eq!(count.name(), "count");
    let mut generator = count.call(json!([1]));
    assert_eq!(generator.next(Value::Null).await.unwrap().value, json!(0));

    assert!(matches!(
        client.method("rpc.async-iterator.start"),
        Err(RpcError::InvalidMethodName(_))
    ));
    assert!(client.call("", ()).is_err());
}

struct RawPeer {
    tx: MemorySender,
    rx: MemoryReceiver,
}

impl RawPeer {
    async fn send(&mut self, value: Value) {
        self.tx.send(Payload::Text(value.to_string())).await.unwrap();
    }

    async fn recv(&mut self) -> Value {
        let payload = tokio::time::timeout(Duration::from_secs(5), self.rx.recv())
            .await
            .expect("timed out waiting for a message")
            .expect("channel closed")
            .unwrap();
        serde_json::from_slice(payload.as_bytes()).unwrap()
    }
}

#[tokio::test]
async fn test_wire_protocol() {
    let ((raw_tx, raw_rx), (tx, rx)) = memory::pair();
    let (client, driver) = AsyncGeneratorCall::builder().build(tx, rx);
    driver.spawn();
    let mut peer = RawPeer { tx: raw_tx, rx: raw_rx };

    let mut generator = client.call("ticks", json!({"every": 5})).unwrap();

    let start = peer.recv().await;
    assert_eq!(start["method"], "rpc.async-iterator.start");
    assert_eq!(start["params"], json!(["ticks", {"every": 5}]));
    peer.send(json!({"jsonrpc": "2.0", "id": start["id"], "result": "h1"})).await;

    let step = tokio::spawn(async move {
        let result = generator.next(json!(7)).await;
        (generator, result)
    });

    let next = peer.recv().await;
    assert_eq!(next["method"], "rpc.async-iterator.next");
    assert_eq!(next["params"], json!(["h1", 7]));
    peer.send(json!({
        "jsonrpc": "2.0",
        "id": next["id"],
        "result": {"value": "tick", "done": false}
    }))
    .await;

    let (mut generator, result) = step.await.unwrap();
    assert_eq!(result.unwrap(), IteratorResult::yielded(json!("tick")));

    let finish = tokio::spawn(async move { generator.finish(Value::Null).await });
    let ret = peer.recv().await;
    assert_eq!(ret["method"], "rpc.async-iterator.return");
    assert_eq!(ret["params"], json!(["h1", null]));
    peer.send(json!({
        "jsonrpc": "2.0",
        "id": ret["id"],
        "result": {"value": null, "done": true}
    }))
    .await;
    assert!(finish.await.unwrap().unwrap().done);
}

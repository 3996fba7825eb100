//! Demo implementation served by `async-call-peer serve`.

use async_call::{Methods, Params, RemoteError};
use serde_json::{json, Value};

/// Upper bound for `count`, so a typo cannot start an endless stream.
const MAX_COUNT: u64 = 10_000;

pub fn methods() -> Methods {
    Methods::new()
        .method("echo", |params: Params| async move {
            Ok::<_, RemoteError>(params.into_value())
        })
        .method("add", add)
        .method("fail", fail)
        .method("nothing", |_params: Params| async move { Ok::<_, RemoteError>(()) })
        .stream("count", |params: Params| {
            let n = params.get(0).and_then(Value::as_u64).unwrap_or(0).min(MAX_COUNT);
            futures::stream::iter((0..n).map(|i| Ok::<_, RemoteError>(json!(i))))
        })
}

/// Sum of all numeric positional arguments.
async fn add(params: Params) -> Result<Value, RemoteError> {
    let numbers: Vec<f64> = params.parse()?;
    let sum: f64 = numbers.iter().sum();
    if sum.fract() == 0.0 && sum.abs() < i64::MAX as f64 {
        Ok(json!(sum as i64))
    } else {
        Ok(json!(sum))
    }
}

/// Always fails, with the first argument as message.
async fn fail(params: Params) -> Result<Value, RemoteError> {
    let message = params
        .get(0)
        .and_then(Value::as_str)
        .unwrap_or("Requested failure");
    Err(RemoteError::error(message))
}

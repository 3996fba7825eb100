//! Async Call - transport-agnostic JSON-RPC 2.0 for async Rust.
//!
//! Two peers connected by any message channel can call each other's methods
//! as if they were local async functions. The crate covers the whole
//! conversation: correlating requests with responses, dispatching inbound
//! calls to a local implementation, rebuilding remote errors as typed local
//! values, remote async iterators, and request batching.
//!
//! The channel is pluggable ([`channel`]), as is the wire codec
//! ([`serializer`]). Nothing here opens sockets or spawns tasks.
//!
//! # Example
//!
//! ```rust,ignore
//! use async_call::{channel::memory, AsyncCall, Methods, Params};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> async_call::Result<()> {
//!     let ((client_tx, client_rx), (server_tx, server_rx)) = memory::pair();
//!
//!     let methods = Methods::new().method("greet", |params: Params| async move {
//!         let (name,): (String,) = params.parse()?;
//!         Ok(json!(format!("Hello, {}", name)))
//!     });
//!     let (_server, driver) = AsyncCall::builder()
//!         .implementation(methods)
//!         .build(server_tx, server_rx);
//!     driver.spawn();
//!
//!     let (client, driver) = AsyncCall::builder().build(client_tx, client_rx);
//!     driver.spawn();
//!
//!     let greeting = client.call("greet", json!(["world"])).await?;
//!     println!("{}", greeting);
//!     Ok(())
//! }
//! ```

pub mod batch;
pub mod channel;
pub mod config;
pub mod engine;
pub mod error;
pub mod generator;
pub mod id;
pub mod protocol;
pub mod recover;
pub mod serializer;

// Re-export commonly used types
pub use batch::Batch;
pub use engine::{
    AsyncCall, AsyncCallBuilder, AsyncCallOptions, Driver, Implementation, InternalMethod,
    Methods, Reply, StrictOptions,
};
pub use error::{Result, RpcError};
pub use generator::{
    AsyncGeneratorCall, AsyncGeneratorCallBuilder, GeneratorMethod, IteratorResult,
    RemoteGenerator, RemoteIterator, StreamIterator,
};
pub use id::{CounterIdGenerator, IdGenerator, RandomIdGenerator};
pub use protocol::{Id, Params};
pub use recover::{ErrorKind, RemoteError};
pub use serializer::{JsonSerializer, Payload, Serializer};

#[cfg(feature = "msgpack")]
pub use serializer::MsgpackSerializer;

//! The call engine.
//!
//! An engine is created with [`AsyncCall::builder`] and consists of two
//! halves:
//! - [`AsyncCall`]: a cheap, cloneable handle used to issue calls
//! - [`Driver`]: the pump that moves messages between the handle, the local
//!   implementation and the channel
//!
//! The engine never spawns tasks of its own. Whoever builds it decides where
//! the driver runs, typically with `tokio::spawn(driver.run())`.
//!
//! # Example
//!
//! ```ignore
//! let (left, right) = channel::memory::pair();
//!
//! let (_server, driver) = AsyncCall::builder()
//!     .implementation(Methods::new().method("add", |p: Params| async move {
//!         let (a, b): (i64, i64) = p.parse()?;
//!         Ok(json!(a + b))
//!     }))
//!     .build(right.0, right.1);
//! tokio::spawn(driver.run());
//!
//! let (client, driver) = AsyncCall::builder().build(left.0, left.1);
//! tokio::spawn(driver.run());
//!
//! assert_eq!(client.call("add", json!([1, 2])).await?, json!(3));
//! ```

mod driver;
mod handler;
mod internal;
mod pending;

pub use driver::Driver;
pub use handler::{
    BoxIterator, GeneratorHandler, Implementation, IntoReply, MethodFuture, MethodHandler,
    MethodResult, Methods,
};
pub use internal::InternalMethod;
pub use pending::{FromReply, Reply};

pub(crate) use internal::{InternalHandler, Outcome, Route};

use crate::batch::Batch;
use crate::channel::{ChannelReceiver, ChannelSender};
use crate::config::ProtocolConfig;
use crate::error::{Result, RpcError};
use crate::id::{IdGenerator, RandomIdGenerator};
use crate::protocol::{Id, Message, Params, Request};
use crate::recover::{call_site_trace, remove_stack_header, RemoteError};
use crate::serializer::{JsonSerializer, Payload, Serializer};
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use pending::{PendingCall, PendingGuard, PendingTable};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::panic::Location;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

/// Hook applied to every error a local method raises, before it is sent.
pub type ErrorMapper = Arc<dyn Fn(RemoteError) -> RemoteError + Send + Sync>;

/// How strictly the engine treats peers that misbehave.
///
/// Strict (the default) answers with JSON-RPC errors. Lenient silently
/// ignores, which suits peers sharing a channel with unrelated traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrictOptions {
    /// Answer calls to unknown methods with "Method not found".
    pub method_not_found: bool,
    /// Answer undecodable or non-JSON-RPC messages with an error.
    pub unknown_message: bool,
}

impl Default for StrictOptions {
    fn default() -> Self {
        Self::from(true)
    }
}

impl From<bool> for StrictOptions {
    fn from(strict: bool) -> Self {
        Self {
            method_not_found: strict,
            unknown_message: strict,
        }
    }
}

/// Per-engine configuration.
#[derive(Clone)]
pub struct AsyncCallOptions {
    /// Prefix for log lines, useful when several engines share a process.
    pub name: String,
    pub strict: StrictOptions,
    /// Keep "no value" distinct from `null` across the wire.
    pub keep_undefined: bool,
    /// Attach the caller's trace to outgoing requests.
    pub send_local_stack: bool,
    /// Give up waiting for a response after this long.
    pub call_timeout: Option<Duration>,
    pub serializer: Arc<dyn Serializer>,
    pub id_generator: Arc<dyn IdGenerator>,
    pub map_error: Option<ErrorMapper>,
}

impl Default for AsyncCallOptions {
    fn default() -> Self {
        Self {
            name: "rpc".to_string(),
            strict: StrictOptions::default(),
            keep_undefined: true,
            send_local_stack: true,
            call_timeout: None,
            serializer: Arc::new(JsonSerializer),
            id_generator: Arc::new(RandomIdGenerator),
            map_error: None,
        }
    }
}

impl fmt::Debug for AsyncCallOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncCallOptions")
            .field("name", &self.name)
            .field("strict", &self.strict)
            .field("keep_undefined", &self.keep_undefined)
            .field("send_local_stack", &self.send_local_stack)
            .field("call_timeout", &self.call_timeout)
            .field("map_error", &self.map_error.is_some())
            .finish_non_exhaustive()
    }
}

/// The local implementation, possibly still being prepared.
#[derive(Clone, Default)]
pub(crate) enum ImplementationSlot {
    #[default]
    Absent,
    Ready(Arc<dyn Implementation>),
    Deferred(Shared<BoxFuture<'static, Option<Arc<dyn Implementation>>>>),
}

impl ImplementationSlot {
    pub fn ready<I: Implementation>(implementation: I) -> Self {
        ImplementationSlot::Ready(Arc::new(implementation))
    }

    pub fn deferred<F, I>(future: F) -> Self
    where
        F: Future<Output = I> + Send + 'static,
        I: Implementation,
    {
        let future = future
            .map(|implementation| Some(Arc::new(implementation) as Arc<dyn Implementation>))
            .boxed()
            .shared();
        ImplementationSlot::Deferred(future)
    }

    /// Wait for the implementation. Requests arriving before a deferred
    /// implementation is ready simply wait here.
    pub async fn resolve(&self) -> Option<Arc<dyn Implementation>> {
        match self {
            ImplementationSlot::Absent => None,
            ImplementationSlot::Ready(implementation) => Some(implementation.clone()),
            ImplementationSlot::Deferred(future) => future.clone().await,
        }
    }
}

/// Work queued for the driver's outbound side, handled in order.
pub(crate) enum Outgoing {
    Message {
        payload: Payload,
        /// Calls to fail if the channel refuses the payload.
        ids: Vec<Id>,
    },
    /// Signalled once everything queued before it was handed to the channel.
    Flush(oneshot::Sender<()>),
}

/// State shared by the handle, the driver and in-flight dispatches.
pub(crate) struct Engine {
    pub options: AsyncCallOptions,
    pub pending: Arc<PendingTable>,
    pub implementation: ImplementationSlot,
    pub internal: Option<Arc<dyn InternalHandler>>,
    outbound: mpsc::UnboundedSender<Outgoing>,
}

impl Engine {
    pub fn name(&self) -> &str {
        &self.options.name
    }

    /// Serialize `value` and queue it for the driver.
    pub fn submit(&self, value: &Value, ids: Vec<Id>) -> Result<()> {
        let payload = self.options.serializer.serialize(value)?;
        self.outbound
            .send(Outgoing::Message { payload, ids })
            .map_err(|_| RpcError::ChannelClosed)
    }

    /// Queue a response. Failures can only be logged: nobody is waiting.
    pub fn respond(&self, value: &Value) {
        if let Err(e) = self.submit(value, Vec::new()) {
            error!("{}: failed to send response: {}", self.name(), e);
        }
    }

    pub fn respond_message(&self, message: Message) {
        match message.to_value() {
            Ok(value) => self.respond(&value),
            Err(e) => error!("{}: failed to encode response: {}", self.name(), e),
        }
    }

    /// Reject every pending call and refuse new ones.
    pub fn shutdown(&self) {
        let rejected = self.pending.close();
        if rejected > 0 {
            debug!(
                "{}: channel closed with {} call(s) still pending",
                self.name(),
                rejected
            );
        }
    }
}

/// Check that `name` can be called as a user method.
pub fn validate_method_name(name: &str) -> Result<()> {
    if name.is_empty() || name.starts_with(ProtocolConfig::INTERNAL_METHOD_PREFIX) {
        return Err(RpcError::InvalidMethodName(name.to_string()));
    }
    Ok(())
}

/// Handle used to call methods on the remote peer.
///
/// Cloning is cheap; all clones share one engine.
#[derive(Clone)]
pub struct AsyncCall {
    engine: Arc<Engine>,
}

impl AsyncCall {
    pub fn builder() -> AsyncCallBuilder {
        AsyncCallBuilder::default()
    }

    /// Call `method` and wait for its result. "No value" resolves to `null`.
    #[track_caller]
    pub fn call(&self, method: &str, params: impl Into<Params>) -> Reply<Value> {
        self.issue(method, params.into(), Location::caller())
    }

    /// Like [`call`](Self::call) but keeps "no value" (`None`) distinct from
    /// `null`.
    #[track_caller]
    pub fn call_optional(&self, method: &str, params: impl Into<Params>) -> Reply<Option<Value>> {
        self.issue(method, params.into(), Location::caller())
    }

    /// Send a notification. No response is expected and none is awaited.
    pub fn notify(&self, method: &str, params: impl Into<Params>) -> Result<()> {
        validate_method_name(method)?;
        let request = Request::notification(method, params.into());
        debug!("{}: notify {}", self.engine.name(), method);
        self.engine.submit(&serde_json::to_value(&request)?, Vec::new())
    }

    /// Wait until every message issued so far was handed to the channel.
    pub async fn flush(&self) -> Result<()> {
        let (done, flushed) = oneshot::channel();
        self.engine
            .outbound
            .send(Outgoing::Flush(done))
            .map_err(|_| RpcError::ChannelClosed)?;
        flushed.await.map_err(|_| RpcError::ChannelClosed)
    }

    /// Start a batch. Calls queued on it are sent together by
    /// [`Batch::send`].
    pub fn batch(&self) -> Batch {
        Batch::new(self.clone())
    }

    /// Number of calls still waiting for a response.
    pub fn pending_calls(&self) -> usize {
        self.engine.pending.len()
    }

    /// Whether the channel is gone. New calls fail immediately once it is.
    pub fn is_closed(&self) -> bool {
        self.engine.pending.is_closed()
    }

    pub fn options(&self) -> &AsyncCallOptions {
        &self.engine.options
    }

    fn issue<T>(&self, method: &str, params: Params, location: &Location<'_>) -> Reply<T> {
        if let Err(e) = validate_method_name(method) {
            return Reply::ready(Err(e));
        }
        self.issue_unchecked(method.to_string(), params, location)
    }

    /// Call a method in the reserved namespace.
    #[track_caller]
    pub(crate) fn call_internal<T>(&self, method: InternalMethod, params: Params) -> Reply<T> {
        self.call_internal_at(method, params, Location::caller())
    }

    pub(crate) fn call_internal_at<T>(
        &self,
        method: InternalMethod,
        params: Params,
        location: &Location<'_>,
    ) -> Reply<T> {
        self.issue_unchecked(method.as_str().to_string(), params, location)
    }

    fn issue_unchecked<T>(
        &self,
        method: String,
        params: Params,
        location: &Location<'_>,
    ) -> Reply<T> {
        let (request, reply) = match self.prepare(method, params, location) {
            Ok(prepared) => prepared,
            Err(e) => return Reply::ready(Err(e)),
        };

        let ids: Vec<Id> = request.id.iter().cloned().collect();
        let submitted = serde_json::to_value(&request)
            .map_err(RpcError::from)
            .and_then(|value| self.engine.submit(&value, ids));
        if let Err(e) = submitted {
            if let Some(id) = &request.id {
                self.engine.pending.settle(id, Err(e));
            }
        }
        reply
    }

    /// Register a call in the pending table without sending it.
    pub(crate) fn prepare<T>(
        &self,
        method: String,
        params: Params,
        location: &Location<'_>,
    ) -> Result<(Request, Reply<T>)> {
        let options = &self.engine.options;
        let id = options.id_generator.next_id();
        let call_site = call_site_trace(location);
        let remote_stack = if options.send_local_stack {
            remove_stack_header(&call_site)
        } else {
            String::new()
        };

        let (sender, receiver) = oneshot::channel();
        self.engine.pending.insert(
            id.clone(),
            PendingCall {
                sender,
                method: method.clone(),
                call_site,
            },
        )?;

        debug!("{}: call {} ({})", self.engine.name(), method, id);
        let request = Request::new(Some(id.clone()), method, params, remote_stack);
        let guard = PendingGuard::new(self.engine.pending.clone(), id);
        Ok((request, Reply::waiting(receiver, guard, options.call_timeout)))
    }

    /// Send already prepared requests as one batch envelope.
    pub(crate) fn submit_batch(&self, requests: &[Request]) -> Result<()> {
        let ids: Vec<Id> = requests.iter().filter_map(|r| r.id.clone()).collect();
        let items = requests
            .iter()
            .map(serde_json::to_value)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        debug!("{}: batch of {} message(s)", self.engine.name(), items.len());
        self.engine.submit(&Value::Array(items), ids)
    }

    /// Fail prepared calls that will never be sent.
    pub(crate) fn reject(&self, ids: impl IntoIterator<Item = Id>, error: RpcError) {
        for id in ids {
            self.engine.pending.settle(&id, Err(error.clone()));
        }
    }
}

impl fmt::Debug for AsyncCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncCall")
            .field("name", &self.engine.options.name)
            .field("pending_calls", &self.pending_calls())
            .finish()
    }
}

/// Builder for an [`AsyncCall`] engine.
#[derive(Default)]
pub struct AsyncCallBuilder {
    options: AsyncCallOptions,
    implementation: ImplementationSlot,
    internal: Option<Arc<dyn InternalHandler>>,
}

impl AsyncCallBuilder {
    /// Expose `implementation` to the peer.
    pub fn implementation<I: Implementation>(mut self, implementation: I) -> Self {
        self.implementation = ImplementationSlot::ready(implementation);
        self
    }

    /// Expose an implementation that becomes available later. Inbound
    /// requests wait for it.
    pub fn deferred_implementation<F, I>(mut self, future: F) -> Self
    where
        F: Future<Output = I> + Send + 'static,
        I: Implementation,
    {
        self.implementation = ImplementationSlot::deferred(future);
        self
    }

    pub fn options(mut self, options: AsyncCallOptions) -> Self {
        self.options = options;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.options.name = name.into();
        self
    }

    pub fn strict(mut self, strict: impl Into<StrictOptions>) -> Self {
        self.options.strict = strict.into();
        self
    }

    pub fn keep_undefined(mut self, keep: bool) -> Self {
        self.options.keep_undefined = keep;
        self
    }

    pub fn send_local_stack(mut self, send: bool) -> Self {
        self.options.send_local_stack = send;
        self
    }

    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.options.call_timeout = Some(timeout);
        self
    }

    pub fn serializer<S: Serializer>(mut self, serializer: S) -> Self {
        self.options.serializer = Arc::new(serializer);
        self
    }

    pub fn id_generator<G: IdGenerator>(mut self, generator: G) -> Self {
        self.options.id_generator = Arc::new(generator);
        self
    }

    pub fn map_error<F>(mut self, map: F) -> Self
    where
        F: Fn(RemoteError) -> RemoteError + Send + Sync + 'static,
    {
        self.options.map_error = Some(Arc::new(map));
        self
    }

    pub(crate) fn implementation_slot(mut self, slot: ImplementationSlot) -> Self {
        self.implementation = slot;
        self
    }

    pub(crate) fn internal_handler(mut self, handler: Arc<dyn InternalHandler>) -> Self {
        self.internal = Some(handler);
        self
    }

    pub(crate) fn options_ref(&self) -> &AsyncCallOptions {
        &self.options
    }

    /// Connect the engine to a channel.
    pub fn build<S, R>(self, sender: S, receiver: R) -> (AsyncCall, Driver)
    where
        S: ChannelSender,
        R: ChannelReceiver,
    {
        let (outbound, queue) = mpsc::unbounded_channel();
        let engine = Arc::new(Engine {
            options: self.options,
            pending: Arc::new(PendingTable::default()),
            implementation: self.implementation,
            internal: self.internal,
            outbound,
        });

        let driver = Driver::new(engine.clone(), Box::new(sender), Box::new(receiver), queue);
        (AsyncCall { engine }, driver)
    }
}

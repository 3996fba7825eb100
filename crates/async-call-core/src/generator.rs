//! Remote async iterators.
//!
//! A generator method runs on the serving side and is consumed step by step
//! by the caller. The two sides talk through the reserved methods
//! `rpc.async-iterator.{start,next,return,throw}`:
//!
//! 1. `start [method, params]` creates a session and returns its handle
//! 2. `next`/`return`/`throw [handle, value]` advance it, each answered with
//!    `{value, done}`
//! 3. A `done` result or a `return` call ends the session and frees the
//!    handle
//!
//! Sessions are keyed by handle, so any number can run at once. A session
//! abandoned by its caller stays registered until the engine is dropped.

use crate::channel::{ChannelReceiver, ChannelSender};
use crate::engine::{
    validate_method_name, AsyncCall, AsyncCallBuilder, AsyncCallOptions, BoxIterator, Driver,
    Implementation, ImplementationSlot, InternalHandler, InternalMethod, Outcome, StrictOptions,
};
use crate::error::{Result, RpcError};
use crate::id::IdGenerator;
use crate::protocol::{codes, Id, Params};
use crate::recover::RemoteError;
use async_trait::async_trait;
use futures::future::{BoxFuture, Shared};
use futures::stream::BoxStream;
use futures::{FutureExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use std::panic::Location;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// One step of an iterator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IteratorResult {
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub done: bool,
}

impl IteratorResult {
    /// A yielded value; the iterator continues.
    pub fn yielded(value: Value) -> Self {
        Self { value, done: false }
    }

    /// The final value; the iterator is finished.
    pub fn finished(value: Value) -> Self {
        Self { value, done: true }
    }

    fn from_reply(reply: Option<Value>) -> Result<Self> {
        match reply {
            None | Some(Value::Null) => Ok(Self::yielded(Value::Null)),
            Some(value) => serde_json::from_value(value).map_err(|e| RpcError::InvalidMessage {
                message: format!("malformed iterator result: {}", e),
            }),
        }
    }
}

/// Server-side iterator session.
///
/// `finish` and `throw` are optional: returning `None` means the operation
/// is not supported and is answered with "no value".
#[async_trait]
pub trait RemoteIterator: Send + 'static {
    /// Advance, passing `value` in.
    async fn next(&mut self, value: Value) -> std::result::Result<IteratorResult, RemoteError>;

    /// Finish early with `value` (the protocol's `return`).
    async fn finish(
        &mut self,
        _value: Value,
    ) -> Option<std::result::Result<IteratorResult, RemoteError>> {
        None
    }

    /// Raise `value` inside the iterator.
    async fn throw(
        &mut self,
        _value: Value,
    ) -> Option<std::result::Result<IteratorResult, RemoteError>> {
        None
    }
}

/// [`RemoteIterator`] over a stream. Values sent in are ignored.
pub struct StreamIterator {
    stream: Option<BoxStream<'static, std::result::Result<Value, RemoteError>>>,
}

impl StreamIterator {
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = std::result::Result<Value, RemoteError>> + Send + 'static,
    {
        Self {
            stream: Some(stream.boxed()),
        }
    }
}

#[async_trait]
impl RemoteIterator for StreamIterator {
    async fn next(&mut self, _value: Value) -> std::result::Result<IteratorResult, RemoteError> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(IteratorResult::finished(Value::Null));
        };
        match stream.next().await {
            Some(Ok(value)) => Ok(IteratorResult::yielded(value)),
            Some(Err(e)) => {
                self.stream = None;
                Err(e)
            }
            None => {
                self.stream = None;
                Ok(IteratorResult::finished(Value::Null))
            }
        }
    }

    async fn finish(
        &mut self,
        value: Value,
    ) -> Option<std::result::Result<IteratorResult, RemoteError>> {
        self.stream = None;
        Some(Ok(IteratorResult::finished(value)))
    }
}

type Session = Arc<tokio::sync::Mutex<BoxIterator>>;

/// Serving side: owns the running sessions.
struct IteratorServer {
    implementation: ImplementationSlot,
    sessions: Mutex<HashMap<Id, Session>>,
    id_generator: Arc<dyn IdGenerator>,
    strict: bool,
}

impl IteratorServer {
    fn sessions(&self) -> std::sync::MutexGuard<'_, HashMap<Id, Session>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn start(&self, params: Params) -> std::result::Result<Outcome, RemoteError> {
        let mut args = params.into_positional().into_iter();
        let method = match args.next() {
            Some(Value::String(method)) => method,
            other => {
                return Err(RemoteError::type_error(format!(
                    "{}: {}",
                    codes::default_message(codes::INVALID_METHOD_NAME),
                    other.unwrap_or(Value::Null)
                ))
                .with_code(codes::INVALID_METHOD_NAME));
            }
        };
        let params = match args.next() {
            None | Some(Value::Null) => Params::empty(),
            Some(value) => Params::from(value),
        };

        let factory = self
            .implementation
            .resolve()
            .await
            .and_then(|implementation| implementation.generator(&method));
        let Some(factory) = factory else {
            if self.strict {
                return Err(RemoteError::type_error(format!("{} is not a generator method", method))
                    .with_code(codes::METHOD_NOT_FOUND));
            }
            debug!("Ignoring start of unknown generator {}", method);
            return Ok(Outcome::Ignore);
        };

        let iterator = factory(params)?;
        let id = self.id_generator.next_id();
        debug!("Iterator {} started for {}", id, method);
        self.sessions()
            .insert(id.clone(), Arc::new(tokio::sync::Mutex::new(iterator)));
        Ok(Outcome::Reply(Some(json!(id))))
    }

    async fn step(
        &self,
        method: InternalMethod,
        params: Params,
    ) -> std::result::Result<Outcome, RemoteError> {
        let mut args = params.into_positional().into_iter();
        let id: Option<Id> = args.next().and_then(|v| serde_json::from_value(v).ok());
        let value = args.next().unwrap_or(Value::Null);

        let session = id
            .as_ref()
            .and_then(|id| self.sessions().get(id).cloned());
        let (Some(id), Some(session)) = (id, session) else {
            if self.strict {
                return Err(RemoteError::error(codes::default_message(codes::ITERATOR_NOT_FOUND))
                    .with_code(codes::ITERATOR_NOT_FOUND));
            }
            return Ok(Outcome::Ignore);
        };

        let result = {
            let mut iterator = session.lock().await;
            match method {
                InternalMethod::IteratorReturn => iterator.finish(value).await,
                InternalMethod::IteratorThrow => iterator.throw(value).await,
                _ => Some(iterator.next(value).await),
            }
        };

        if method == InternalMethod::IteratorReturn {
            self.sessions().remove(&id);
        }

        match result {
            None => Ok(Outcome::Reply(None)),
            Some(Ok(result)) => {
                if result.done {
                    self.sessions().remove(&id);
                    debug!("Iterator {} finished", id);
                }
                Ok(Outcome::Reply(Some(serde_json::to_value(result)?)))
            }
            // The session stays; the iterator decides what a later step sees.
            Some(Err(e)) => Err(e),
        }
    }
}

#[async_trait]
impl InternalHandler for IteratorServer {
    async fn handle(
        &self,
        method: InternalMethod,
        params: Params,
    ) -> std::result::Result<Outcome, RemoteError> {
        match method {
            InternalMethod::IteratorStart => self.start(params).await,
            _ => self.step(method, params).await,
        }
    }
}

/// Engine with the iterator extension installed.
///
/// Plain calls go through [`remote`](Self::remote); generator methods through
/// [`call`](Self::call) or [`method`](Self::method). The implementation
/// serves both its plain methods and its generator methods.
#[derive(Clone)]
pub struct AsyncGeneratorCall {
    remote: AsyncCall,
    cache: Arc<Mutex<HashMap<String, GeneratorMethod>>>,
}

impl AsyncGeneratorCall {
    pub fn builder() -> AsyncGeneratorCallBuilder {
        AsyncGeneratorCallBuilder::default()
    }

    /// Handle for a remote generator method. Handles are cached per name.
    pub fn method(&self, name: &str) -> Result<GeneratorMethod> {
        validate_method_name(name)?;
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        let method = cache.entry(name.to_string()).or_insert_with(|| GeneratorMethod {
            remote: self.remote.clone(),
            name: Arc::from(name),
        });
        Ok(method.clone())
    }

    /// Start a remote generator.
    #[track_caller]
    pub fn call(&self, name: &str, params: impl Into<Params>) -> Result<RemoteGenerator> {
        let location = Location::caller();
        let method = self.method(name)?;
        Ok(method.start(params.into(), location))
    }

    /// The underlying engine, for plain calls.
    pub fn remote(&self) -> &AsyncCall {
        &self.remote
    }
}

/// A named remote generator method.
#[derive(Clone)]
pub struct GeneratorMethod {
    remote: AsyncCall,
    name: Arc<str>,
}

impl GeneratorMethod {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Start a new session.
    #[track_caller]
    pub fn call(&self, params: impl Into<Params>) -> RemoteGenerator {
        self.start(params.into(), Location::caller())
    }

    fn start(&self, params: Params, location: &'static Location<'static>) -> RemoteGenerator {
        let args = Params::from(vec![json!(&*self.name), params.into_value()]);
        let reply = self
            .remote
            .call_internal_at::<Value>(InternalMethod::IteratorStart, args, location);
        let handle = reply
            .map(|reply| {
                reply.and_then(|value| {
                    serde_json::from_value::<Id>(value).map_err(|e| RpcError::InvalidMessage {
                        message: format!("malformed iterator handle: {}", e),
                    })
                })
            })
            .boxed()
            .shared();

        RemoteGenerator {
            remote: self.remote.clone(),
            handle,
            done: false,
        }
    }
}

/// Client side of one remote iterator session.
///
/// The start request is sent as soon as the generator is created, so the
/// remote work begins before the first [`next`](Self::next).
pub struct RemoteGenerator {
    remote: AsyncCall,
    handle: Shared<BoxFuture<'static, Result<Id>>>,
    done: bool,
}

impl RemoteGenerator {
    /// Handle assigned by the serving side, once known.
    pub async fn handle(&self) -> Result<Id> {
        self.handle.clone().await
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Advance the remote iterator, passing `value` in.
    pub async fn next(&mut self, value: Value) -> Result<IteratorResult> {
        if self.done {
            return Ok(IteratorResult::finished(Value::Null));
        }
        let result = self.step(InternalMethod::IteratorNext, value).await?;
        if result.done {
            self.done = true;
        }
        Ok(result)
    }

    /// Finish the remote iterator early.
    pub async fn finish(&mut self, value: Value) -> Result<IteratorResult> {
        if self.done {
            return Ok(IteratorResult::finished(value));
        }
        let result = self.step(InternalMethod::IteratorReturn, value).await;
        self.done = true;
        result
    }

    /// Raise `value` inside the remote iterator.
    pub async fn throw(&mut self, value: Value) -> Result<IteratorResult> {
        if self.done {
            return Err(RemoteError::from_thrown(value).into());
        }
        let result = self.step(InternalMethod::IteratorThrow, value).await?;
        if result.done {
            self.done = true;
        }
        Ok(result)
    }

    async fn step(&mut self, method: InternalMethod, value: Value) -> Result<IteratorResult> {
        let id = match self.handle.clone().await {
            Ok(id) => id,
            Err(e) => {
                self.done = true;
                return Err(e);
            }
        };

        let reply = self
            .remote
            .call_internal::<Option<Value>>(method, Params::from(vec![json!(id), value]))
            .await;
        match reply {
            Ok(reply) => IteratorResult::from_reply(reply),
            Err(e) => {
                // Stop locally; the peer answers later steps on its own terms.
                self.done = true;
                Err(e)
            }
        }
    }

    /// Yielded values as a stream. The final value is not included.
    pub fn into_stream(self) -> impl Stream<Item = Result<Value>> + Send + 'static {
        futures::stream::unfold(self, |mut generator| async move {
            if generator.done {
                return None;
            }
            match generator.next(Value::Null).await {
                Ok(result) if result.done => None,
                Ok(result) => Some((Ok(result.value), generator)),
                Err(e) => Some((Err(e), generator)),
            }
        })
    }
}

/// Builder for an [`AsyncGeneratorCall`] engine.
#[derive(Default)]
pub struct AsyncGeneratorCallBuilder {
    inner: AsyncCallBuilder,
    implementation: ImplementationSlot,
}

impl AsyncGeneratorCallBuilder {
    /// Expose the generator methods of `implementation`.
    pub fn implementation<I: Implementation>(mut self, implementation: I) -> Self {
        self.implementation = ImplementationSlot::ready(implementation);
        self
    }

    pub fn deferred_implementation<F, I>(mut self, future: F) -> Self
    where
        F: Future<Output = I> + Send + 'static,
        I: Implementation,
    {
        self.implementation = ImplementationSlot::deferred(future);
        self
    }

    pub fn options(mut self, options: AsyncCallOptions) -> Self {
        self.inner = self.inner.options(options);
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.inner = self.inner.name(name);
        self
    }

    pub fn strict(mut self, strict: impl Into<StrictOptions>) -> Self {
        self.inner = self.inner.strict(strict);
        self
    }

    pub fn build<S, R>(self, sender: S, receiver: R) -> (AsyncGeneratorCall, Driver)
    where
        S: ChannelSender,
        R: ChannelReceiver,
    {
        let options = self.inner.options_ref();
        let server = IteratorServer {
            implementation: self.implementation.clone(),
            sessions: Mutex::new(HashMap::new()),
            id_generator: options.id_generator.clone(),
            strict: options.strict.method_not_found,
        };

        let (remote, driver) = self
            .inner
            .implementation_slot(self.implementation)
            .internal_handler(Arc::new(server))
            .build(sender, receiver);
        let call = AsyncGeneratorCall {
            remote,
            cache: Arc::new(Mutex::new(HashMap::new())),
        };
        (call, driver)
    }
}

//! Local implementation: the methods this side exposes to its peer.

use crate::config::ProtocolConfig;
use crate::generator::{RemoteIterator, StreamIterator};
use crate::protocol::Params;
use crate::recover::RemoteError;
use futures::future::BoxFuture;
use futures::{FutureExt, Stream};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::warn;

/// Result of a method: `None` is "no value", distinct from `Some(Value::Null)`.
pub type MethodResult = Result<Option<Value>, RemoteError>;

pub type MethodFuture = BoxFuture<'static, MethodResult>;

/// A callable method.
pub type MethodHandler = Arc<dyn Fn(Params) -> MethodFuture + Send + Sync>;

/// A boxed iterator session.
pub type BoxIterator = Box<dyn RemoteIterator>;

/// Creates a fresh iterator for each start request.
pub type GeneratorHandler = Arc<dyn Fn(Params) -> Result<BoxIterator, RemoteError> + Send + Sync>;

/// The object whose methods a peer may call.
///
/// Lookups happen per request, so an implementation may expose a dynamic set
/// of methods. Names in the reserved `rpc.` namespace never reach it.
pub trait Implementation: Send + Sync + 'static {
    /// Look up a plain method.
    fn method(&self, name: &str) -> Option<MethodHandler>;

    /// Look up a generator method. Only consulted by the iterator extension.
    fn generator(&self, _name: &str) -> Option<GeneratorHandler> {
        None
    }
}

impl<T: Implementation + ?Sized> Implementation for Arc<T> {
    fn method(&self, name: &str) -> Option<MethodHandler> {
        (**self).method(name)
    }

    fn generator(&self, name: &str) -> Option<GeneratorHandler> {
        (**self).generator(name)
    }
}

/// Conversion from a handler's return value into a method result.
pub trait IntoReply {
    fn into_reply(self) -> Option<Value>;
}

impl IntoReply for Value {
    fn into_reply(self) -> Option<Value> {
        Some(self)
    }
}

/// `()` means the method produced no value.
impl IntoReply for () {
    fn into_reply(self) -> Option<Value> {
        None
    }
}

impl IntoReply for Option<Value> {
    fn into_reply(self) -> Option<Value> {
        self
    }
}

/// Closure-based [`Implementation`].
///
/// ```ignore
/// let methods = Methods::new()
///     .method("add", |params: Params| async move {
///         let (a, b): (i64, i64) = params.parse()?;
///         Ok(json!(a + b))
///     });
/// ```
#[derive(Clone, Default)]
pub struct Methods {
    methods: HashMap<String, MethodHandler>,
    generators: HashMap<String, GeneratorHandler>,
}

impl Methods {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an async method.
    pub fn method<F, Fut, R>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Params) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, RemoteError>> + Send + 'static,
        R: IntoReply,
    {
        let name = name.into();
        if !Self::check_name(&name) {
            return self;
        }

        let handler: MethodHandler =
            Arc::new(move |params| handler(params).map(|r| r.map(IntoReply::into_reply)).boxed());
        self.methods.insert(name, handler);
        self
    }

    /// Register a generator method backed by a [`RemoteIterator`].
    pub fn generator<F, I>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(Params) -> Result<I, RemoteError> + Send + Sync + 'static,
        I: RemoteIterator,
    {
        let name = name.into();
        if !Self::check_name(&name) {
            return self;
        }

        let factory: GeneratorHandler =
            Arc::new(move |params| factory(params).map(|it| Box::new(it) as BoxIterator));
        self.generators.insert(name, factory);
        self
    }

    /// Register a generator method backed by a stream of values.
    pub fn stream<F, S>(self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(Params) -> S + Send + Sync + 'static,
        S: Stream<Item = Result<Value, RemoteError>> + Send + 'static,
    {
        self.generator(name, move |params| Ok(StreamIterator::new(factory(params))))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name) || self.generators.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.methods.len() + self.generators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_name(name: &str) -> bool {
        if name.starts_with(ProtocolConfig::INTERNAL_METHOD_PREFIX) {
            warn!(
                "Method {:?} is in the reserved {:?} namespace and will not be registered",
                name,
                ProtocolConfig::INTERNAL_METHOD_PREFIX
            );
            return false;
        }
        true
    }
}

impl Implementation for Methods {
    fn method(&self, name: &str) -> Option<MethodHandler> {
        self.methods.get(name).cloned()
    }

    fn generator(&self, name: &str) -> Option<GeneratorHandler> {
        self.generators.get(name).cloned()
    }
}

impl fmt::Debug for Methods {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut methods: Vec<_> = self.methods.keys().collect();
        let mut generators: Vec<_> = self.generators.keys().collect();
        methods.sort();
        generators.sort();
        f.debug_struct("Methods")
            .field("methods", &methods)
            .field("generators", &generators)
            .finish()
    }
}

//! The reserved `rpc.` method namespace.
//!
//! Extensions talk to their remote counterparts through methods in this
//! namespace. They are parsed into [`InternalMethod`] before dispatch, so a
//! user method can never shadow one of them.

use crate::config::ProtocolConfig;
use crate::protocol::Params;
use crate::recover::RemoteError;
use async_trait::async_trait;
use serde_json::Value;

/// Known internal methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InternalMethod {
    IteratorStart,
    IteratorNext,
    IteratorReturn,
    IteratorThrow,
}

impl InternalMethod {
    pub const ALL: [InternalMethod; 4] = [
        InternalMethod::IteratorStart,
        InternalMethod::IteratorNext,
        InternalMethod::IteratorReturn,
        InternalMethod::IteratorThrow,
    ];

    /// Wire name of the method.
    pub fn as_str(&self) -> &'static str {
        match self {
            InternalMethod::IteratorStart => "rpc.async-iterator.start",
            InternalMethod::IteratorNext => "rpc.async-iterator.next",
            InternalMethod::IteratorReturn => "rpc.async-iterator.return",
            InternalMethod::IteratorThrow => "rpc.async-iterator.throw",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.as_str() == name)
    }
}

/// Where an inbound method name routes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Route<'a> {
    User(&'a str),
    Internal(InternalMethod),
    /// In the reserved namespace but not a method this build knows.
    Reserved,
}

impl<'a> Route<'a> {
    pub fn of(name: &'a str) -> Self {
        if !name.starts_with(ProtocolConfig::INTERNAL_METHOD_PREFIX) {
            return Route::User(name);
        }
        match InternalMethod::parse(name) {
            Some(method) => Route::Internal(method),
            None => Route::Reserved,
        }
    }
}

/// What an internal handler wants sent back.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Outcome {
    /// Respond with this result (`None` is "no value").
    Reply(Option<Value>),
    /// Stay silent, as for an unknown method in lenient mode.
    Ignore,
}

/// Server side of an extension living in the reserved namespace.
#[async_trait]
pub(crate) trait InternalHandler: Send + Sync + 'static {
    async fn handle(&self, method: InternalMethod, params: Params)
        -> Result<Outcome, RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_names_roundtrip() {
        for method in InternalMethod::ALL {
            assert_eq!(InternalMethod::parse(method.as_str()), Some(method));
            assert!(method.as_str().starts_with(ProtocolConfig::INTERNAL_METHOD_PREFIX));
        }
    }

    #[test]
    fn test_routes() {
        assert_eq!(Route::of("add"), Route::User("add"));
        assert_eq!(
            Route::of("rpc.async-iterator.next"),
            Route::Internal(InternalMethod::IteratorNext)
        );
        assert_eq!(Route::of("rpc.unknown"), Route::Reserved);
        // Only the exact prefix is reserved.
        assert_eq!(Route::of("rpcx"), Route::User("rpcx"));
    }
}

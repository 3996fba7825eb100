//! Centralized configuration constants.
//!
//! Runtime behavior of an engine instance is configured through
//! [`AsyncCallOptions`](crate::engine::AsyncCallOptions); the values here are
//! fixed protocol and transport parameters.

use std::time::Duration;

/// Wire protocol configuration.
pub struct ProtocolConfig;

impl ProtocolConfig {
    pub const JSONRPC_VERSION: &'static str = "2.0";
    /// Prefix of the reserved internal method namespace.
    pub const INTERNAL_METHOD_PREFIX: &'static str = "rpc.";
    /// Header that marks a platform exception in the error `type` field.
    pub const DOM_EXCEPTION_HEADER: &'static str = "DOMException:";
    /// Frame placed on top of every local call-site trace.
    pub const CALL_SITE_FRAME: &'static str = "    at async_call::engine::AsyncCall::call";
}

/// Reference channel configuration.
pub struct ChannelConfig;

impl ChannelConfig {
    pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024; // 16MB
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_prefix_is_namespaced() {
        assert!(ProtocolConfig::INTERNAL_METHOD_PREFIX.ends_with('.'));
        assert!(ProtocolConfig::DOM_EXCEPTION_HEADER.ends_with(':'));
    }

    #[test]
    fn test_limits_are_reasonable() {
        assert!(ChannelConfig::MAX_FRAME_SIZE > 1024);
        assert!(ChannelConfig::CONNECT_TIMEOUT > Duration::ZERO);
    }
}

//! Error types for async-call.
//!
//! `RpcError` is what a caller sees when a remote call does not produce a
//! value. Failures raised by the remote implementation arrive as
//! [`RpcError::Remote`] and carry the reconstructed [`RemoteError`].

use crate::protocol::codes;
use crate::protocol::Id;
use crate::recover::RemoteError;
use std::time::Duration;
use thiserror::Error;

/// Main error type for the engine and its extensions.
///
/// The type is `Clone` because a single failure (channel teardown, batch
/// abort) is delivered to every waiting caller.
#[derive(Debug, Clone, Error)]
pub enum RpcError {
    // Failures reported by the peer
    #[error("{0}")]
    Remote(RemoteError),

    // Channel lifecycle
    #[error("Channel closed")]
    ChannelClosed,

    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Call cancelled")]
    Cancelled,

    #[error("Batch aborted: {0}")]
    Aborted(String),

    // Encoding errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("Invalid message: {message}")]
    InvalidMessage { message: String },

    // Local usage errors, never sent over the wire
    #[error("Only string can be the RPC method name: {0:?}")]
    InvalidMethodName(String),

    #[error("Correlation ID {0} is already in use by a pending call")]
    DuplicateId(Id),
}

/// Result type alias for async-call operations.
pub type Result<T> = std::result::Result<T, RpcError>;

impl From<std::io::Error> for RpcError {
    fn from(err: std::io::Error) -> Self {
        RpcError::Transport {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        RpcError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<RemoteError> for RpcError {
    fn from(err: RemoteError) -> Self {
        RpcError::Remote(err)
    }
}

impl RpcError {
    /// Create the default abort error used by [`Batch::abort`](crate::batch::Batch::abort).
    pub fn aborted() -> Self {
        RpcError::Aborted("Aborted".to_string())
    }

    /// Convert to a JSON-RPC error code.
    ///
    /// Remote failures keep the code the peer sent. Local failures map to:
    /// - -32700: serialization failures
    /// - -32600: invalid message
    /// - -32002: invalid method name
    /// - -32603: everything else
    pub fn to_rpc_error_code(&self) -> i64 {
        match self {
            RpcError::Remote(err) => err.code(),
            RpcError::Serialization { .. } => codes::PARSE_ERROR,
            RpcError::InvalidMessage { .. } => codes::INVALID_REQUEST,
            RpcError::InvalidMethodName(_) => codes::INVALID_METHOD_NAME,
            _ => codes::INTERNAL_ERROR,
        }
    }

    /// The reconstructed remote error, if the peer reported one.
    pub fn as_remote(&self) -> Option<&RemoteError> {
        match self {
            RpcError::Remote(err) => Some(err),
            _ => None,
        }
    }

    /// Check if the failure means the channel is gone.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, RpcError::ChannelClosed | RpcError::Transport { .. })
    }
}

//! Cross-boundary error reconstruction.
//!
//! A failure crosses the channel as `(type, message, code, stack)`. The
//! receiving side rebuilds it with [`recover_error`] into a [`RemoteError`]
//! whose [`ErrorKind`] matches the sender's kind when that kind is well known.
//!
//! Stack traces use the familiar layout of a header line followed by one
//! `    at <location>` line per frame. Rust has no runtime stack for async
//! code, so frames are call-site locations captured with `#[track_caller]`.

use crate::config::ProtocolConfig;
use crate::protocol::codes;
use crate::protocol::{ErrorData, ErrorObject};
use serde_json::Value;
use std::fmt;
use std::panic::Location;

/// Kind of a transmitted error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Error,
    EvalError,
    RangeError,
    ReferenceError,
    SyntaxError,
    TypeError,
    UriError,
    AggregateError,
    /// Platform exception, transmitted with the `DOMException:` header.
    DomException,
    /// Any other kind. The name travels with the error.
    Custom,
}

impl ErrorKind {
    /// Map a transmitted type name to a kind. Unknown names are `Custom`.
    pub fn from_type_name(name: &str) -> Self {
        match name {
            "Error" => ErrorKind::Error,
            "EvalError" => ErrorKind::EvalError,
            "RangeError" => ErrorKind::RangeError,
            "ReferenceError" => ErrorKind::ReferenceError,
            "SyntaxError" => ErrorKind::SyntaxError,
            "TypeError" => ErrorKind::TypeError,
            "URIError" => ErrorKind::UriError,
            "AggregateError" => ErrorKind::AggregateError,
            _ => ErrorKind::Custom,
        }
    }

    /// Wire name of a well-known kind.
    pub fn as_str(&self) -> Option<&'static str> {
        match self {
            ErrorKind::Error => Some("Error"),
            ErrorKind::EvalError => Some("EvalError"),
            ErrorKind::RangeError => Some("RangeError"),
            ErrorKind::ReferenceError => Some("ReferenceError"),
            ErrorKind::SyntaxError => Some("SyntaxError"),
            ErrorKind::TypeError => Some("TypeError"),
            ErrorKind::UriError => Some("URIError"),
            ErrorKind::AggregateError => Some("AggregateError"),
            ErrorKind::DomException | ErrorKind::Custom => None,
        }
    }

    pub fn is_well_known(&self) -> bool {
        self.as_str().is_some()
    }
}

/// An error that crossed (or is about to cross) the channel.
///
/// `Display` renders as `"<name>: <message>"`.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteError {
    kind: ErrorKind,
    name: String,
    message: String,
    code: i64,
    stack: String,
}

impl RemoteError {
    /// Create an error of a well-known kind, recording the caller's location
    /// as its stack.
    #[track_caller]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        let name = kind.as_str().unwrap_or("Error");
        Self::at(kind, name.to_string(), message.into(), Location::caller())
    }

    /// Create an error with a custom kind name.
    #[track_caller]
    pub fn custom(name: impl Into<String>, message: impl Into<String>) -> Self {
        let name = name.into();
        let kind = ErrorKind::from_type_name(&name);
        Self::at(kind, name, message.into(), Location::caller())
    }

    #[track_caller]
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Error, message)
    }

    #[track_caller]
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TypeError, message)
    }

    #[track_caller]
    pub fn range_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RangeError, message)
    }

    /// Parameters did not match what the method expects.
    #[track_caller]
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TypeError, message).with_code(codes::INVALID_PARAMS)
    }

    /// Convert an arbitrary thrown value into an error-shaped payload.
    ///
    /// Objects with a string `message` keep it (and `name`, if present);
    /// strings become the message; anything else is rendered as JSON.
    #[track_caller]
    pub fn from_thrown(value: Value) -> Self {
        let location = Location::caller();
        match value {
            Value::String(message) => Self::at(ErrorKind::Error, "Error".into(), message, location),
            Value::Object(ref obj) if obj.get("message").is_some_and(Value::is_string) => {
                let message = obj["message"].as_str().unwrap_or_default().to_string();
                let name = obj
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or("Error")
                    .to_string();
                Self::at(ErrorKind::from_type_name(&name), name, message, location)
            }
            other => Self::at(ErrorKind::Error, "Error".into(), other.to_string(), location),
        }
    }

    fn at(kind: ErrorKind, name: String, message: String, location: &Location<'_>) -> Self {
        let stack = format!(
            "{}: {}\n    at {}:{}:{}",
            name,
            message,
            location.file(),
            location.line(),
            location.column()
        );
        Self {
            kind,
            name,
            message,
            code: codes::APPLICATION_ERROR,
            stack,
        }
    }

    /// Override the error code sent over the wire.
    pub fn with_code(mut self, code: i64) -> Self {
        self.code = code;
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Check the kind. Every error also counts as the generic `Error` kind.
    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind || kind == ErrorKind::Error
    }

    /// Display name (the kind name for well-known kinds).
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn code(&self) -> i64 {
        self.code
    }

    pub fn stack(&self) -> &str {
        &self.stack
    }

    /// Name written into the `type` field of an error response.
    pub fn type_name(&self) -> String {
        match self.kind {
            ErrorKind::DomException => {
                format!("{}{}", ProtocolConfig::DOM_EXCEPTION_HEADER, self.name)
            }
            _ => self.name.clone(),
        }
    }

    /// Append frames to the stack, separated by a newline.
    pub fn append_stack(&mut self, frames: &str) {
        if frames.is_empty() {
            return;
        }
        if self.stack.is_empty() {
            self.stack = frames.to_string();
        } else {
            self.stack = format!("{}\n{}", self.stack, frames);
        }
    }

    /// Error object for an error response.
    pub fn to_error_object(&self) -> ErrorObject {
        ErrorObject {
            code: self.code,
            message: self.message.clone(),
            data: Some(ErrorData {
                stack: (!self.stack.is_empty()).then(|| self.stack.clone()),
                type_name: Some(self.type_name()),
            }),
        }
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

impl std::error::Error for RemoteError {}

impl From<String> for RemoteError {
    #[track_caller]
    fn from(message: String) -> Self {
        RemoteError::error(message)
    }
}

impl From<&str> for RemoteError {
    #[track_caller]
    fn from(message: &str) -> Self {
        RemoteError::error(message)
    }
}

impl From<serde_json::Error> for RemoteError {
    #[track_caller]
    fn from(err: serde_json::Error) -> Self {
        RemoteError::type_error(err.to_string())
    }
}

impl From<std::io::Error> for RemoteError {
    #[track_caller]
    fn from(err: std::io::Error) -> Self {
        RemoteError::error(err.to_string())
    }
}

/// Rebuild a transmitted error.
///
/// Well-known kind names produce that kind; `DOMException:<name>` produces a
/// [`ErrorKind::DomException`] named `<name>`; anything else produces a
/// [`ErrorKind::Custom`] error named `type_name`. Never fails.
pub fn recover_error(
    type_name: &str,
    message: impl Into<String>,
    code: i64,
    stack: impl Into<String>,
) -> RemoteError {
    let (kind, name) = match type_name.strip_prefix(ProtocolConfig::DOM_EXCEPTION_HEADER) {
        Some("") => (ErrorKind::Custom, "DOMException".to_string()),
        Some(name) => (ErrorKind::DomException, name.to_string()),
        None if type_name.is_empty() => (ErrorKind::Error, "Error".to_string()),
        None => (ErrorKind::from_type_name(type_name), type_name.to_string()),
    };
    RemoteError {
        kind,
        name,
        message: message.into(),
        code,
        stack: stack.into(),
    }
}

/// Rebuild the error carried by an error response.
pub fn recover_error_object(error: &ErrorObject) -> RemoteError {
    let data = error.data.clone().unwrap_or_default();
    recover_error(
        data.type_name.as_deref().unwrap_or("Error"),
        error.message.clone(),
        error.code,
        data.stack.unwrap_or_default(),
    )
}

/// Strip the header line and the first frame of a stack trace.
///
/// The first frame is always the engine's own call site, so only the frames
/// below it are useful to the peer.
pub fn remove_stack_header(trace: &str) -> String {
    trace.split('\n').skip(2).collect::<Vec<_>>().join("\n")
}

/// Trace of a call issued at `location`, shaped like any other stack.
pub(crate) fn call_site_trace(location: &Location<'_>) -> String {
    format!(
        "Error\n{}\n    at {}:{}:{}",
        ProtocolConfig::CALL_SITE_FRAME,
        location.file(),
        location.line(),
        location.column()
    )
}

//! JSON-RPC error codes.
//!
//! Standard codes from section 5.1 of the JSON-RPC 2.0 specification, plus
//! the two application codes reserved by the async iterator extension.

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

/// Default code for failures raised by a method implementation.
pub const APPLICATION_ERROR: i64 = -1;

/// No running iterator is registered under the requested handle.
pub const ITERATOR_NOT_FOUND: i64 = -32001;

/// A method key that is not a usable method name.
pub const INVALID_METHOD_NAME: i64 = -32002;

/// Canonical message for a code, as sent in predefined error responses.
pub fn default_message(code: i64) -> &'static str {
    match code {
        PARSE_ERROR => "Parse error",
        INVALID_REQUEST => "Invalid Request",
        METHOD_NOT_FOUND => "Method not found",
        INVALID_PARAMS => "Invalid params",
        INTERNAL_ERROR => "Internal error",
        ITERATOR_NOT_FOUND => "Cannot find a running iterator with given ID",
        INVALID_METHOD_NAME => "Only string can be the RPC method name",
        _ => "Server error",
    }
}

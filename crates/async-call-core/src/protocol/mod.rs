//! Wire protocol: JSON-RPC 2.0 message shapes, validation and error codes.
//!
//! Every message is a single flat object tagged with `"jsonrpc": "2.0"`. The
//! only top-level array is a batch envelope.

pub mod codes;
mod message;

pub use message::{
    is_response_shape, is_valid_message, raw_id, Envelope, ErrorData, ErrorObject, ErrorResponse,
    Id, Message, Params, Request, SuccessResponse,
};

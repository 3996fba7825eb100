//! JSON-RPC message shapes and the validity gate.

use super::codes;
use crate::config::ProtocolConfig;
use crate::error::{Result, RpcError};
use crate::recover::RemoteError;
use serde::de::{self, DeserializeOwned};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Number, Value};
use std::fmt;

/// Correlation ID linking a request to its response.
///
/// Numbers are kept as received (unsigned, negative or fractional) so the
/// response echoes exactly the ID the peer chose.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Id {
    Number(Number),
    String(String),
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Id::Number(n) => write!(f, "{}", n),
            Id::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for Id {
    fn from(n: i64) -> Self {
        Id::Number(n.into())
    }
}

impl From<Number> for Id {
    fn from(n: Number) -> Self {
        Id::Number(n)
    }
}

impl From<String> for Id {
    fn from(s: String) -> Self {
        Id::String(s)
    }
}

impl From<&str> for Id {
    fn from(s: &str) -> Self {
        Id::String(s.to_string())
    }
}

/// Call parameters: positional (array) or a single keyed argument (object).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Params {
    Array(Vec<Value>),
    Object(Map<String, Value>),
}

impl Params {
    /// Empty positional parameters.
    pub fn empty() -> Self {
        Params::Array(Vec::new())
    }

    /// Accept a decoded `params` value, rejecting anything that is not an
    /// array or object.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Array(items) => Some(Params::Array(items)),
            Value::Object(map) => Some(Params::Object(map)),
            _ => None,
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            Params::Array(items) => Value::Array(items),
            Params::Object(map) => Value::Object(map),
        }
    }

    /// Number of arguments the callee receives.
    pub fn len(&self) -> usize {
        match self {
            Params::Array(items) => items.len(),
            Params::Object(_) => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Positional argument `index`. Keyed params have no positions.
    pub fn get(&self, index: usize) -> Option<&Value> {
        match self {
            Params::Array(items) => items.get(index),
            Params::Object(_) => None,
        }
    }

    /// The keyed argument, if the params are an object.
    pub fn as_object(&self) -> Option<&Map<String, Value>> {
        match self {
            Params::Object(map) => Some(map),
            Params::Array(_) => None,
        }
    }

    /// The arguments as a positional list.
    pub fn into_positional(self) -> Vec<Value> {
        match self {
            Params::Array(items) => items,
            Params::Object(map) => vec![Value::Object(map)],
        }
    }

    /// Deserialize the parameters into a typed argument list.
    ///
    /// Array params deserialize into tuples or sequences, object params into
    /// structs or maps. A mismatch is an invalid-params error.
    pub fn parse<T: DeserializeOwned>(self) -> std::result::Result<T, RemoteError> {
        serde_json::from_value(self.into_value())
            .map_err(|e| RemoteError::invalid_params(e.to_string()))
    }
}

impl Default for Params {
    fn default() -> Self {
        Params::empty()
    }
}

impl From<Vec<Value>> for Params {
    fn from(items: Vec<Value>) -> Self {
        Params::Array(items)
    }
}

impl From<Map<String, Value>> for Params {
    fn from(map: Map<String, Value>) -> Self {
        Params::Object(map)
    }
}

impl From<()> for Params {
    fn from(_: ()) -> Self {
        Params::empty()
    }
}

/// Arrays and objects keep their shape; any other value becomes a single
/// positional argument.
impl From<Value> for Params {
    fn from(value: Value) -> Self {
        match value {
            Value::Array(items) => Params::Array(items),
            Value::Object(map) => Params::Object(map),
            other => Params::Array(vec![other]),
        }
    }
}

/// JSON-RPC request. A request without `id` is a notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Id>,
    pub method: String,
    #[serde(default)]
    pub params: Params,
    #[serde(
        rename = "remoteStack",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub remote_stack: Option<String>,
}

impl Request {
    /// Create a request. An empty `remote_stack` is omitted from the wire.
    pub fn new(
        id: Option<Id>,
        method: impl Into<String>,
        params: Params,
        remote_stack: impl Into<String>,
    ) -> Self {
        let remote_stack = remote_stack.into();
        Self {
            jsonrpc: ProtocolConfig::JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
            remote_stack: (!remote_stack.is_empty()).then_some(remote_stack),
        }
    }

    /// Create a notification (no response expected).
    pub fn notification(method: impl Into<String>, params: Params) -> Self {
        Self::new(None, method, params, String::new())
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// Successful JSON-RPC response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub jsonrpc: String,
    pub id: Option<Id>,
    pub result: Value,
    #[serde(
        rename = "resultIsUndefined",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub result_is_undefined: Option<bool>,
}

impl SuccessResponse {
    /// Create a success response.
    ///
    /// `None` means the method produced no value. It is sent as `null` and,
    /// when `keep_undefined` is set, flagged with `resultIsUndefined`.
    pub fn new(id: Option<Id>, result: Option<Value>, keep_undefined: bool) -> Self {
        let result_is_undefined = (keep_undefined && result.is_none()).then_some(true);
        Self {
            jsonrpc: ProtocolConfig::JSONRPC_VERSION.to_string(),
            id,
            result: result.unwrap_or(Value::Null),
            result_is_undefined,
        }
    }

    /// The result, with the "no value" flag reinterpreted as `None`.
    pub fn into_result(self, keep_undefined: bool) -> Option<Value> {
        if keep_undefined && self.result_is_undefined == Some(true) {
            None
        } else {
            Some(self.result)
        }
    }
}

/// JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    #[serde(deserialize_with = "deserialize_code")]
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ErrorData>,
}

/// Error codes are integers, but some peers send them as floats. Those are
/// floored.
fn deserialize_code<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let number = Number::deserialize(deserializer)?;
    number
        .as_i64()
        .or_else(|| number.as_f64().map(|f| f.floor() as i64))
        .ok_or_else(|| de::Error::custom(format!("invalid error code {}", number)))
}

/// Extra data used to rebuild the error on the caller's side.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
}

/// Failed JSON-RPC response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub jsonrpc: String,
    pub id: Option<Id>,
    pub error: ErrorObject,
}

impl ErrorResponse {
    /// Create an error response.
    pub fn new(
        id: Option<Id>,
        code: i64,
        message: impl Into<String>,
        stack: impl Into<String>,
        type_name: impl Into<String>,
    ) -> Self {
        let stack = stack.into();
        Self {
            jsonrpc: ProtocolConfig::JSONRPC_VERSION.to_string(),
            id,
            error: ErrorObject {
                code,
                message: message.into(),
                data: Some(ErrorData {
                    stack: (!stack.is_empty()).then_some(stack),
                    type_name: Some(type_name.into()),
                }),
            },
        }
    }

    /// Error response carrying a method failure.
    pub fn from_error(id: Option<Id>, error: &RemoteError) -> Self {
        Self {
            jsonrpc: ProtocolConfig::JSONRPC_VERSION.to_string(),
            id,
            error: error.to_error_object(),
        }
    }

    fn predefined(id: Option<Id>, code: i64, stack: impl Into<String>) -> Self {
        Self::new(id, code, codes::default_message(code), stack, "Error")
    }

    /// Parse error. Never attributable to a call, so the id is always null.
    pub fn parse_error(stack: impl Into<String>) -> Self {
        Self::predefined(None, codes::PARSE_ERROR, stack)
    }

    pub fn invalid_request(id: Option<Id>) -> Self {
        Self::predefined(id, codes::INVALID_REQUEST, "")
    }

    pub fn method_not_found(id: Option<Id>) -> Self {
        Self::predefined(id, codes::METHOD_NOT_FOUND, "")
    }

    pub fn invalid_params(id: Option<Id>) -> Self {
        Self::predefined(id, codes::INVALID_PARAMS, "")
    }

    pub fn internal_error(id: Option<Id>, detail: &str) -> Self {
        let message = format!("{}{}", codes::default_message(codes::INTERNAL_ERROR), detail);
        Self::new(id, codes::INTERNAL_ERROR, message, "", "Error")
    }
}

/// A routable protocol message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(Request),
    Success(SuccessResponse),
    Error(ErrorResponse),
}

impl Message {
    /// Classify a decoded value. Values failing [`is_valid_message`] or
    /// matching none of the three shapes are invalid messages.
    pub fn from_value(value: Value) -> Result<Self> {
        if !is_valid_message(&value) {
            return Err(RpcError::InvalidMessage {
                message: "not a JSON-RPC 2.0 object".to_string(),
            });
        }

        let invalid = |e: serde_json::Error| RpcError::InvalidMessage {
            message: e.to_string(),
        };

        if value.get("method").is_some() {
            serde_json::from_value(value).map(Message::Request).map_err(invalid)
        } else if value.get("error").is_some() {
            serde_json::from_value(value).map(Message::Error).map_err(invalid)
        } else if value.get("result").is_some() {
            serde_json::from_value(value).map(Message::Success).map_err(invalid)
        } else {
            Err(RpcError::InvalidMessage {
                message: "neither a request nor a response".to_string(),
            })
        }
    }

    pub fn to_value(&self) -> Result<Value> {
        let value = match self {
            Message::Request(req) => serde_json::to_value(req)?,
            Message::Success(resp) => serde_json::to_value(resp)?,
            Message::Error(resp) => serde_json::to_value(resp)?,
        };
        Ok(value)
    }

    pub fn id(&self) -> Option<&Id> {
        match self {
            Message::Request(req) => req.id.as_ref(),
            Message::Success(resp) => resp.id.as_ref(),
            Message::Error(resp) => resp.id.as_ref(),
        }
    }
}

impl From<Request> for Message {
    fn from(req: Request) -> Self {
        Message::Request(req)
    }
}

impl From<SuccessResponse> for Message {
    fn from(resp: SuccessResponse) -> Self {
        Message::Success(resp)
    }
}

impl From<ErrorResponse> for Message {
    fn from(resp: ErrorResponse) -> Self {
        Message::Error(resp)
    }
}

/// Check whether a decoded value is a protocol message.
///
/// The value must be an object with `jsonrpc == "2.0"`; a `params` field, if
/// present, must be an array or an object.
pub fn is_valid_message(value: &Value) -> bool {
    let Some(obj) = value.as_object() else {
        return false;
    };
    if obj.get("jsonrpc").and_then(Value::as_str) != Some(ProtocolConfig::JSONRPC_VERSION) {
        return false;
    }
    match obj.get("params") {
        None | Some(Value::Array(_)) | Some(Value::Object(_)) => true,
        Some(_) => false,
    }
}

/// Whether an untrusted value is shaped like a response: an object with
/// `result` or `error` and no `method`.
pub fn is_response_shape(value: &Value) -> bool {
    value.as_object().is_some_and(|obj| {
        !obj.contains_key("method") && (obj.contains_key("result") || obj.contains_key("error"))
    })
}

/// Best-effort extraction of an `id` from an untrusted value.
pub fn raw_id(value: &Value) -> Option<Id> {
    value
        .get("id")
        .and_then(|id| serde_json::from_value(id.clone()).ok())
}

/// Top-level shape of a decoded payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Single(Value),
    Batch(Vec<Value>),
}

impl From<Value> for Envelope {
    fn from(value: Value) -> Self {
        match value {
            Value::Array(items) => Envelope::Batch(items),
            other => Envelope::Single(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_omits_empty_stack_and_missing_id() {
        let req = Request::notification("log", Params::from(json!(["hi"])));
        let value = serde_json::to_value(&req).unwrap();

        assert_eq!(value, json!({"jsonrpc": "2.0", "method": "log", "params": ["hi"]}));
    }

    #[test]
    fn test_request_keeps_remote_stack() {
        let req = Request::new(
            Some(Id::from(7)),
            "add",
            Params::from(json!([1, 2])),
            "    at main.rs:1:1",
        );
        let value = serde_json::to_value(&req).unwrap();

        assert_eq!(value["id"], json!(7));
        assert_eq!(value["remoteStack"], json!("    at main.rs:1:1"));
    }

    #[test]
    fn test_valid_requests_stay_valid_through_json() {
        let requests = [
            Request::new(Some(Id::from(1)), "a", Params::empty(), ""),
            Request::new(Some(Id::from("x")), "b", Params::from(json!({"k": [1]})), "at y"),
            Request::notification("c", Params::from(json!([null, "s", 1.5]))),
        ];
        for req in requests {
            let text = serde_json::to_string(&req).unwrap();
            let decoded: Value = serde_json::from_str(&text).unwrap();
            assert!(is_valid_message(&decoded), "{}", text);
            assert_eq!(Message::from_value(decoded).unwrap(), Message::Request(req));
        }
    }

    #[test]
    fn test_validity_gate() {
        assert!(is_valid_message(&json!({"jsonrpc": "2.0", "id": 1, "result": 3})));
        assert!(!is_valid_message(&json!({"jsonrpc": "1.0", "id": 1, "result": 3})));
        assert!(!is_valid_message(&json!({"id": 1, "method": "a"})));
        assert!(!is_valid_message(&json!({"jsonrpc": "2.0", "method": "a", "params": 5})));
        assert!(!is_valid_message(&json!({"jsonrpc": "2.0", "method": "a", "params": null})));
        assert!(!is_valid_message(&json!([{"jsonrpc": "2.0"}])));
        assert!(!is_valid_message(&json!("2.0")));
    }

    #[test]
    fn test_success_response_undefined_flag() {
        let kept = SuccessResponse::new(Some(Id::from(1)), None, true);
        let value = serde_json::to_value(&kept).unwrap();
        assert_eq!(value.get("result"), Some(&Value::Null));
        assert_eq!(value["resultIsUndefined"], json!(true));
        assert_eq!(kept.into_result(true), None);

        let collapsed = SuccessResponse::new(Some(Id::from(1)), None, false);
        let value = serde_json::to_value(&collapsed).unwrap();
        assert!(value.get("resultIsUndefined").is_none());
        assert_eq!(collapsed.into_result(false), Some(Value::Null));

        let null = SuccessResponse::new(Some(Id::from(1)), Some(Value::Null), true);
        assert_eq!(null.into_result(true), Some(Value::Null));
    }

    #[test]
    fn test_error_response_shapes() {
        let resp = ErrorResponse::parse_error("");
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value["id"], Value::Null);
        assert_eq!(value["error"]["code"], json!(codes::PARSE_ERROR));
        assert_eq!(value["error"]["message"], json!("Parse error"));
        assert_eq!(value["error"]["data"], json!({"type": "Error"}));

        let resp = ErrorResponse::internal_error(Some(Id::from(3)), ": boom");
        assert_eq!(resp.error.message, "Internal error: boom");

        let resp = ErrorResponse::new(
            Some(Id::from(2)),
            -1,
            "bad",
            "TypeError: bad\n    at x",
            "TypeError",
        );
        let data = resp.error.data.unwrap();
        assert_eq!(data.type_name.as_deref(), Some("TypeError"));
        assert_eq!(data.stack.as_deref(), Some("TypeError: bad\n    at x"));
    }

    #[test]
    fn test_message_classification() {
        let msg =
            Message::from_value(json!({"jsonrpc": "2.0", "id": "a", "result": null})).unwrap();
        assert!(matches!(msg, Message::Success(_)));

        let msg = Message::from_value(json!({
            "jsonrpc": "2.0", "id": null,
            "error": {"code": -32700, "message": "Parse error"}
        }))
        .unwrap();
        assert!(matches!(msg, Message::Error(_)));
        assert_eq!(msg.id(), None);

        assert!(Message::from_value(json!({"jsonrpc": "2.0", "id": 1})).is_err());
        assert!(Message::from_value(json!({"jsonrpc": "2.0", "method": 5})).is_err());
    }

    #[test]
    fn test_params_positional_and_keyed() {
        let positional = Params::from(json!([1, "two"]));
        assert_eq!(positional.len(), 2);
        let (a, b): (i64, String) = positional.parse().unwrap();
        assert_eq!((a, b.as_str()), (1, "two"));

        #[derive(Deserialize)]
        struct Args {
            name: String,
        }
        let keyed = Params::from(json!({"name": "x"}));
        assert_eq!(keyed.len(), 1);
        assert_eq!(keyed.clone().into_positional(), vec![json!({"name": "x"})]);
        let args: Args = keyed.parse().unwrap();
        assert_eq!(args.name, "x");

        let err = Params::from(json!(["nope"])).parse::<(i64,)>().unwrap_err();
        assert_eq!(err.code(), codes::INVALID_PARAMS);

        assert_eq!(Params::from(json!(5)), Params::Array(vec![json!(5)]));
    }

    #[test]
    fn test_raw_id_and_envelope() {
        assert_eq!(raw_id(&json!({"id": 4})), Some(Id::from(4)));
        assert_eq!(raw_id(&json!({"id": [1]})), None);
        assert!(matches!(
            Envelope::from(json!([1, 2])),
            Envelope::Batch(items) if items.len() == 2
        ));
        assert!(matches!(Envelope::from(json!({})), Envelope::Single(_)));
    }

    #[test]
    fn test_numeric_ids_are_echoed_unchanged() {
        let request: Request = serde_json::from_value(
            json!({"jsonrpc": "2.0", "id": 18446744073709551615u64, "method": "m"}),
        )
        .unwrap();
        let id = request.id.unwrap();
        assert_eq!(id.to_string(), "18446744073709551615");

        let response = SuccessResponse::new(Some(id), Some(json!(1)), true);
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["id"], json!(18446744073709551615u64));

        let fractional = raw_id(&json!({"id": 1.5})).unwrap();
        let value = serde_json::to_value(ErrorResponse::invalid_request(Some(fractional))).unwrap();
        assert_eq!(value["id"], json!(1.5));
    }

    #[test]
    fn test_error_code_accepts_float() {
        let object: ErrorObject =
            serde_json::from_value(json!({"code": -32601.0, "message": "nope"})).unwrap();
        assert_eq!(object.code, -32601);

        let object: ErrorObject =
            serde_json::from_value(json!({"code": 2.7, "message": "rounded"})).unwrap();
        assert_eq!(object.code, 2);

        let text_code = json!({"code": "x", "message": "m"});
        assert!(serde_json::from_value::<ErrorObject>(text_code).is_err());
    }

    #[test]
    fn test_response_shape() {
        assert!(is_response_shape(&json!({"id": 1, "result": null})));
        assert!(is_response_shape(&json!({"id": 1, "error": {"code": 1.5}})));
        assert!(!is_response_shape(&json!({"id": 1, "method": "m", "result": 1})));
        assert!(!is_response_shape(&json!({"id": 1})));
        assert!(!is_response_shape(&json!([1])));
    }
}

//! Serializer contract and the bundled codecs.
//!
//! The engine only ever sees `serde_json::Value`. A [`Serializer`] turns it
//! into a [`Payload`] for the channel and back. Swapping the codec is a
//! configuration change, the engine itself is codec-agnostic.

use crate::error::Result;
use serde_json::Value;

/// One already-serialized message as handed to or received from a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Binary(Vec<u8>),
}

impl Payload {
    /// Whether the peer used a textual wire format.
    pub fn is_text(&self) -> bool {
        matches!(self, Payload::Text(_))
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Payload::Text(text) => text.as_bytes(),
            Payload::Binary(bytes) => bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Payload::Text(text) => text.into_bytes(),
            Payload::Binary(bytes) => bytes,
        }
    }

    /// Wrap raw bytes, preferring `Text` when they are valid UTF-8.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        match String::from_utf8(bytes) {
            Ok(text) => Payload::Text(text),
            Err(err) => Payload::Binary(err.into_bytes()),
        }
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload::Binary(bytes)
    }
}

/// Two-function codec contract.
pub trait Serializer: Send + Sync + 'static {
    fn serialize(&self, value: &Value) -> Result<Payload>;
    fn deserialize(&self, payload: &Payload) -> Result<Value>;
}

/// Textual JSON. The default serializer.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize(&self, value: &Value) -> Result<Payload> {
        Ok(Payload::Text(serde_json::to_string(value)?))
    }

    fn deserialize(&self, payload: &Payload) -> Result<Value> {
        let value = match payload {
            Payload::Text(text) => serde_json::from_str(text)?,
            Payload::Binary(bytes) => serde_json::from_slice(bytes)?,
        };
        Ok(value)
    }
}

/// MessagePack via `rmp-serde`. Produces binary payloads.
#[cfg(feature = "msgpack")]
#[derive(Debug, Default, Clone, Copy)]
pub struct MsgpackSerializer;

#[cfg(feature = "msgpack")]
impl Serializer for MsgpackSerializer {
    fn serialize(&self, value: &Value) -> Result<Payload> {
        rmp_serde::to_vec_named(value)
            .map(Payload::Binary)
            .map_err(|e| crate::error::RpcError::Serialization {
                message: e.to_string(),
            })
    }

    fn deserialize(&self, payload: &Payload) -> Result<Value> {
        rmp_serde::from_slice(payload.as_bytes()).map_err(|e| {
            crate::error::RpcError::Serialization {
                message: e.to_string(),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RpcError;
    use serde_json::json;

    #[test]
    fn test_json_serializer_roundtrip() {
        let value = json!({"jsonrpc": "2.0", "id": 1, "method": "add", "params": [1, 2]});
        let payload = JsonSerializer.serialize(&value).unwrap();

        assert!(payload.is_text());
        assert_eq!(JsonSerializer.deserialize(&payload).unwrap(), value);
    }

    #[test]
    fn test_json_serializer_accepts_binary_json() {
        let payload = Payload::Binary(br#"{"a":1}"#.to_vec());
        assert_eq!(JsonSerializer.deserialize(&payload).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn test_json_serializer_rejects_garbage() {
        let err = JsonSerializer.deserialize(&Payload::from("{not json")).unwrap_err();
        assert!(matches!(err, RpcError::Serialization { .. }));
    }

    #[test]
    fn test_payload_from_bytes() {
        assert!(Payload::from_bytes(b"text".to_vec()).is_text());
        assert!(!Payload::from_bytes(vec![0xff, 0xfe]).is_text());
        assert_eq!(Payload::from("abc").len(), 3);
    }

    #[cfg(feature = "msgpack")]
    #[test]
    fn test_msgpack_serializer_roundtrip() {
        let value = json!({"jsonrpc": "2.0", "id": "abc", "result": [1, "two", null]});
        let payload = MsgpackSerializer.serialize(&value).unwrap();

        assert!(matches!(payload, Payload::Binary(_)));
        assert_eq!(MsgpackSerializer.deserialize(&payload).unwrap(), value);
    }
}

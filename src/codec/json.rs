//! JSON codec using `serde_json`.

use bytes::Bytes;
use serde_json::Value;

use crate::error::Result;

/// The `content-type` value that triggers the codec when `auto_json` is on.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// A message body as handed to or received from the embedder.
///
/// With `auto_json` disabled everything is `Bytes`; enabled, bodies with a
/// JSON content type decode into `Json` on delivery, and `Json` payloads
/// encode and stamp `content-type: application/json` on send.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Opaque body bytes.
    Bytes(Bytes),
    /// Decoded JSON document.
    Json(Value),
}

impl Payload {
    /// Borrow the raw bytes, when this payload is raw.
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Payload::Bytes(b) => Some(b),
            Payload::Json(_) => None,
        }
    }

    /// Borrow the JSON document, when this payload was decoded.
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Payload::Json(v) => Some(v),
            Payload::Bytes(_) => None,
        }
    }
}

impl From<Bytes> for Payload {
    fn from(b: Bytes) -> Self {
        Payload::Bytes(b)
    }
}

impl From<&[u8]> for Payload {
    fn from(b: &[u8]) -> Self {
        Payload::Bytes(Bytes::copy_from_slice(b))
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Payload::Bytes(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<Value> for Payload {
    fn from(v: Value) -> Self {
        Payload::Json(v)
    }
}

/// JSON codec for structured bodies.
pub struct JsonCodec;

impl JsonCodec {
    /// Encode a value to JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be serialized.
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(value)?))
    }

    /// Decode JSON bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not valid JSON for type T.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

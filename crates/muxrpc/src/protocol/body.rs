//! Frame bodies and their per-encoding serialization.

use super::header::Encoding;
use crate::error::CodecError;
use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// A decoded frame body.
#[derive(Clone, Debug, PartialEq)]
pub enum Body {
    /// Raw bytes.
    Binary(Bytes),
    /// A string.
    Utf8(String),
    /// A parsed JSON value.
    Json(Value),
}

impl Body {
    /// The encoding this body is written with by default.
    #[must_use]
    pub const fn encoding(&self) -> Encoding {
        match self {
            Self::Binary(_) => Encoding::Binary,
            Self::Utf8(_) => Encoding::Utf8,
            Self::Json(_) => Encoding::Json,
        }
    }

    /// Serialize any value into a JSON body.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be represented as JSON.
    pub fn json<T: Serialize>(value: &T) -> Result<Self, CodecError> {
        serde_json::to_value(value)
            .map(Self::Json)
            .map_err(CodecError::Serialize)
    }

    /// Deserialize a JSON body into a typed value.
    ///
    /// # Errors
    ///
    /// Returns an error if the body is not JSON or does not match `T`.
    pub fn decode_json<T: DeserializeOwned>(&self) -> Result<T, CodecError> {
        match self {
            Self::Json(value) => T::deserialize(value).map_err(CodecError::InvalidJson),
            other => Err(CodecError::EncodingMismatch {
                expected: Encoding::Json,
                actual: other.encoding(),
            }),
        }
    }

    /// The JSON value, if this is a JSON body.
    #[must_use]
    pub const fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }

    /// The string, if this is a utf8 body.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Utf8(s) => Some(s),
            _ => None,
        }
    }

    /// The bytes, if this is a binary body.
    #[must_use]
    pub const fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Self::Binary(bytes) => Some(bytes),
            _ => None,
        }
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Self::Binary(bytes)
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Binary(bytes.into())
    }
}

impl From<String> for Body {
    fn from(s: String) -> Self {
        Self::Utf8(s)
    }
}

impl From<&str> for Body {
    fn from(s: &str) -> Self {
        Self::Utf8(s.to_string())
    }
}

impl From<Value> for Body {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

/// Serialize a body for a frame declaring `encoding`.
///
/// Strings may travel as json (a JSON string) and JSON strings may travel as
/// utf8. Binary frames only carry byte buffers.
///
/// # Errors
///
/// Returns [`CodecError::EncodingMismatch`] when the body cannot be written
/// with `encoding`.
pub fn encode_body(body: &Body, encoding: Encoding) -> Result<Bytes, CodecError> {
    match (body, encoding) {
        (Body::Binary(bytes), Encoding::Binary) => Ok(bytes.clone()),
        (Body::Utf8(s), Encoding::Utf8) | (Body::Json(Value::String(s)), Encoding::Utf8) => {
            Ok(Bytes::copy_from_slice(s.as_bytes()))
        }
        (Body::Json(value), Encoding::Json) => serde_json::to_vec(value)
            .map(Bytes::from)
            .map_err(CodecError::Serialize),
        (Body::Utf8(s), Encoding::Json) => serde_json::to_vec(s)
            .map(Bytes::from)
            .map_err(CodecError::Serialize),
        (body, expected) => Err(CodecError::EncodingMismatch {
            expected,
            actual: body.encoding(),
        }),
    }
}

/// Deserialize a frame body according to its declared encoding.
///
/// # Errors
///
/// Returns an error for malformed JSON or invalid UTF-8.
pub fn decode_body(payload: Bytes, encoding: Encoding) -> Result<Body, CodecError> {
    match encoding {
        Encoding::Binary => Ok(Body::Binary(payload)),
        Encoding::Utf8 => Ok(Body::Utf8(String::from_utf8(payload.to_vec())?)),
        Encoding::Json => serde_json::from_slice(&payload)
            .map(Body::Json)
            .map_err(CodecError::InvalidJson),
    }
}

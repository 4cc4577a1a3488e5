//! Error types for the muxrpc engine.

use crate::protocol::{Body, Encoding};
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for muxrpc operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for muxrpc operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Fatal framing errors. The connection is torn down.
    #[error("Framing error: {0}")]
    Framing(#[from] FramingError),

    /// A body did not match its declared encoding.
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// A structurally invalid call request.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// An error reply sent by the remote call handler.
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    /// A call was rejected locally before anything was sent.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Every positive call id is held by an outstanding call.
    #[error("Call id space exhausted")]
    IdSpaceExhausted,

    /// No response arrived before the local deadline.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// The endpoint stopped before the call completed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Errors in the frame structure itself. There is no way to resynchronise
/// the byte stream after one of these.
#[derive(Debug, Error)]
pub enum FramingError {
    /// A header declared a body larger than the configured limit.
    #[error("Frame size {size} exceeds maximum {max}")]
    FrameTooLarge {
        /// Declared or actual body size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// The transport ended in the middle of a frame.
    #[error("Truncated frame: needed {needed} bytes, {available} available")]
    Truncated {
        /// Bytes required to complete the frame.
        needed: usize,
        /// Bytes buffered when the transport ended.
        available: usize,
    },
}

/// Body encode/decode errors, scoped to a single frame.
#[derive(Debug, Error)]
pub enum CodecError {
    /// A json-encoded body failed to parse.
    #[error("Invalid JSON body: {0}")]
    InvalidJson(#[source] serde_json::Error),

    /// A utf8-encoded body was not valid UTF-8.
    #[error("Invalid UTF-8 body: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// The value cannot be written with the requested encoding.
    #[error("Cannot encode {actual} body as {expected}")]
    EncodingMismatch {
        /// Encoding the frame declares.
        expected: Encoding,
        /// Encoding the value naturally has.
        actual: Encoding,
    },

    /// Serializing a value to JSON failed.
    #[error("Failed to serialize: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// Errors in the shape of an inbound call request.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The request body is not a JSON object.
    #[error("Call request is not a JSON object")]
    NotAnObject,

    /// The request has no usable `name` field.
    #[error("Call request is missing field: name")]
    MissingName,

    /// The request has no usable `type` field.
    #[error("Call request is missing field: type")]
    MissingType,

    /// The request names a call type this engine does not serve.
    #[error("Unsupported call type: {0}")]
    UnsupportedType(String),

    /// The `args` field is present but not an array.
    #[error("Call request args must be an array")]
    InvalidArgs,

    /// A new call arrived with a non-JSON body.
    #[error("Call request must be json encoded, got {0}")]
    UnexpectedEncoding(Encoding),
}

/// Error detail carried by an `err=true` frame.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct RemoteError {
    message: String,
}

impl RemoteError {
    /// Create an error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Wire representation: `{"name":"Error","message":...}`.
    #[must_use]
    pub fn to_body(&self) -> Body {
        Body::Json(serde_json::json!({
            "name": "Error",
            "message": self.message,
        }))
    }

    /// Recover an error from whatever body the peer sent.
    #[must_use]
    pub fn from_body(body: &Body) -> Self {
        let message = match body {
            Body::Json(serde_json::Value::Object(map)) => match map.get("message") {
                Some(serde_json::Value::String(message)) => message.clone(),
                _ => serde_json::Value::Object(map.clone()).to_string(),
            },
            Body::Json(serde_json::Value::String(message)) | Body::Utf8(message) => {
                message.clone()
            }
            Body::Json(other) => other.to_string(),
            Body::Binary(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        };

        Self { message }
    }
}

impl From<&Error> for RemoteError {
    fn from(err: &Error) -> Self {
        match err {
            Error::Remote(remote) => remote.clone(),
            other => Self::new(other.to_string()),
        }
    }
}

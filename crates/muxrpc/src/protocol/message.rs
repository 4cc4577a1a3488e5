//! Call request bodies.

use super::body::Body;
use crate::error::{CodecError, ProtocolError};
use serde::Serialize;
use serde_json::Value;
use std::fmt;

/// The kind of call being made.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallType {
    /// One request, one response.
    Async,
    /// One request, a stream of values back.
    Source,
}

impl CallType {
    /// Parse a wire type name. `sink` and `duplex` are not served.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::UnsupportedType`] for anything but
    /// `async` and `source`.
    pub fn parse(name: &str) -> Result<Self, ProtocolError> {
        match name {
            "async" => Ok(Self::Async),
            "source" => Ok(Self::Source),
            other => Err(ProtocolError::UnsupportedType(other.to_string())),
        }
    }

    /// Whether frames of this call carry the stream flag.
    #[must_use]
    pub const fn is_stream(self) -> bool {
        matches!(self, Self::Source)
    }
}

impl fmt::Display for CallType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Async => "async",
            Self::Source => "source",
        })
    }
}

/// A named call, carried as the JSON body of a positive-id frame.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CallRequest {
    /// Call name.
    pub name: String,
    /// Call type.
    #[serde(rename = "type")]
    pub call_type: CallType,
    /// Positional arguments.
    pub args: Vec<Value>,
}

impl CallRequest {
    /// Wire body: `{"name":..,"type":..,"args":[..]}`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Serialize`] if the request cannot be
    /// serialized.
    pub fn to_body(&self) -> Result<Body, CodecError> {
        Body::json(self)
    }

    /// Peek at the `type` field of a would-be call request.
    #[must_use]
    pub fn type_of(value: &Value) -> Option<&str> {
        value.get("type").and_then(Value::as_str)
    }

    /// Validate and parse an inbound call request.
    ///
    /// A name given as an array of strings (`["blobs", "get"]`) is joined
    /// with `.`. Missing or null `args` means no arguments.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] describing the first problem found.
    pub fn from_value(value: &Value) -> Result<Self, ProtocolError> {
        let map = value.as_object().ok_or(ProtocolError::NotAnObject)?;

        let name = match map.get("name") {
            Some(Value::String(name)) if !name.is_empty() => name.clone(),
            Some(Value::Array(parts)) if !parts.is_empty() => parts
                .iter()
                .map(|part| part.as_str().filter(|s| !s.is_empty()))
                .collect::<Option<Vec<_>>>()
                .ok_or(ProtocolError::MissingName)?
                .join("."),
            _ => return Err(ProtocolError::MissingName),
        };

        let call_type = map
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingType)
            .and_then(CallType::parse)?;

        let args = match map.get("args") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(args)) => args.clone(),
            Some(_) => return Err(ProtocolError::InvalidArgs),
        };

        Ok(Self {
            name,
            call_type,
            args,
        })
    }
}

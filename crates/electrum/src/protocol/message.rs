//! Wire message types.

use bytes::Bytes;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{Result, ServerError};

/// An outbound request frame body: `{"id": .., "method": .., "params": [..]}`.
#[derive(Debug, Serialize)]
pub struct Request<'a> {
    /// Correlation id.
    pub id: u64,
    /// Method name, e.g. `server.version`.
    pub method: &'a str,
    /// Positional parameters.
    pub params: &'a [Value],
}

impl<'a> Request<'a> {
    /// Create a new request.
    #[must_use]
    pub const fn new(id: u64, method: &'a str, params: &'a [Value]) -> Self {
        Self { id, method, params }
    }

    /// Serialize the request body (without the frame delimiter).
    ///
    /// # Errors
    ///
    /// Returns an error if a parameter cannot be serialized.
    pub fn to_bytes(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }
}

/// A response to one of our requests.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// The `id` member exactly as the server sent it.
    pub id: Value,
    /// The `error` member when present and non-null, otherwise the `result`.
    pub outcome: std::result::Result<Value, ServerError>,
}

impl Response {
    /// Correlation id, if the server echoed one we could have issued.
    ///
    /// Accepts integers and integer strings.
    #[must_use]
    pub fn correlation_id(&self) -> Option<u64> {
        match &self.id {
            Value::Number(number) => number.as_u64(),
            Value::String(text) => text.parse().ok(),
            _ => None,
        }
    }
}

/// A server-pushed notification.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// Notification name, e.g. `blockchain.headers.subscribe`.
    pub method: String,
    /// Notification parameters (`Null` when the server sent none).
    pub params: Value,
}

/// Classification of an inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    /// Has a non-null `id`.
    Response(Response),
    /// No `id`, carries a `method`.
    Notification(Notification),
    /// A JSON array. Batch frames are not supported; carries the item count.
    Batch(usize),
    /// Valid JSON that is neither a response nor a notification.
    Unrecognized(Value),
}

impl Incoming {
    /// Decode and classify a frame body.
    ///
    /// # Errors
    ///
    /// Returns an error if the body is not valid JSON.
    pub fn parse(body: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(body)?;

        Ok(match value {
            Value::Array(items) => Self::Batch(items.len()),
            Value::Object(map) => Self::from_object(map),
            other => Self::Unrecognized(other),
        })
    }

    fn from_object(mut map: Map<String, Value>) -> Self {
        match map.remove("id") {
            Some(id) if !id.is_null() => {
                let outcome = match map.remove("error") {
                    Some(error) if !error.is_null() => Err(ServerError::from_payload(error)),
                    _ => Ok(map.remove("result").unwrap_or(Value::Null)),
                };

                Self::Response(Response { id, outcome })
            }
            _ => match map.remove("method") {
                Some(Value::String(method)) => Self::Notification(Notification {
                    method,
                    params: map.remove("params").unwrap_or(Value::Null),
                }),
                method => {
                    if let Some(method) = method {
                        map.insert("method".to_string(), method);
                    }
                    Self::Unrecognized(Value::Object(map))
                }
            },
        }
    }
}

//! Error types for the Electrum client.

use std::fmt;
use std::io;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for client operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The transport protocol tag is not one we know how to speak.
    #[error("Invalid protocol: [{0}]")]
    InvalidProtocol(String),

    /// The host cannot be used as a TLS server name.
    #[error("Invalid TLS server name: {0}")]
    InvalidServerName(String),

    /// TLS configuration could not be built.
    #[error("TLS error: {0}")]
    Tls(String),

    /// The connect phase did not complete in time.
    #[error("Connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// Failed to establish the connection.
    #[error("Failed to connect to {addr}: {source}")]
    ConnectFailed {
        /// The `host:port` we tried to reach.
        addr: String,
        /// The underlying error.
        #[source]
        source: io::Error,
    },

    /// The server answered a request with an error payload.
    #[error("Server error: {0}")]
    Server(ServerError),

    /// The connection closed before a response arrived.
    #[error("Connection lost")]
    ConnectionLost,

    /// A request was attempted without an established connection.
    #[error("Connection not established")]
    NotConnected,

    /// Operation timed out.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Failed to encode a request or decode a response.
    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// I/O error while writing to the connection.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Whether this error means the request never got an answer because the
    /// connection is gone (or never existed).
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::ConnectionLost | Self::NotConnected | Self::Io(_) | Self::ConnectFailed { .. }
        )
    }
}

/// Error payload carried by a response frame.
///
/// ElectrumX sends `{"code": <int>, "message": <string>}`; some servers send a
/// bare string, which ends up in `message`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerError {
    /// Error code, when the server provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
    /// Human readable message.
    #[serde(default)]
    pub message: String,
    /// Additional data attached by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ServerError {
    /// Build a server error from the raw `error` member of a response.
    #[must_use]
    pub fn from_payload(payload: Value) -> Self {
        match payload {
            Value::String(message) => Self {
                code: None,
                message,
                data: None,
            },
            Value::Object(_) => match serde_json::from_value::<Self>(payload.clone()) {
                Ok(error) => error,
                Err(_) => Self {
                    code: None,
                    message: payload.to_string(),
                    data: Some(payload),
                },
            },
            other => Self {
                code: None,
                message: other.to_string(),
                data: None,
            },
        }
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{code}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for ServerError {}

/// Errors raised by the line codec.
#[derive(Debug, Error)]
pub enum FramingError {
    /// A frame grew past the configured maximum before its delimiter arrived.
    #[error("Frame length exceeds maximum of {max} bytes")]
    FrameTooLong {
        /// Maximum allowed size.
        max: usize,
    },

    /// The peer sent a batch (JSON array) frame, which we do not support.
    #[error("Batch frames are not supported")]
    UnsupportedBatch,

    /// I/O error on the underlying stream.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<FramingError> for Error {
    fn from(error: FramingError) -> Self {
        match error {
            FramingError::Io(io) => Self::Io(io),
            other => Self::Io(io::Error::new(io::ErrorKind::InvalidData, other)),
        }
    }
}

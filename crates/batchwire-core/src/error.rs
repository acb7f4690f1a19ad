//! Centralized error types for Batchwire.

use thiserror::Error;

use crate::task::model::ErrorKind;

/// Main error type for Batchwire operations.
#[derive(Error, Debug)]
pub enum BatchwireError {
    #[error("Invalid task update: {0}")]
    InvalidUpdate(String),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server rejected request with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for Batchwire operations.
pub type BatchwireResult<T> = Result<T, BatchwireError>;

impl BatchwireError {
    /// Create an invalid update error.
    pub fn invalid_update(msg: impl Into<String>) -> Self {
        Self::InvalidUpdate(msg.into())
    }
}

/// Local checks that fail before any upload is attempted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("'{label}' is empty")]
    Empty { label: String },

    #[error("'{label}' is {size} bytes, the limit is {limit} bytes")]
    TooLarge { label: String, size: u64, limit: u64 },

    #[error("'{label}' has unsupported file type '{extension}'")]
    UnsupportedType { label: String, extension: String },
}

/// Failure of a single upload at the transport level.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Network(String),

    #[error("upload rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },
}

impl TransportError {
    /// Classify the failure for the task it is attached to.
    ///
    /// Client errors mean the input itself was refused, except timeouts and
    /// rate limiting which are worth retrying as-is.
    pub fn error_kind(&self) -> ErrorKind {
        match self {
            Self::Rejected { status, .. }
                if (400..500).contains(status) && *status != 408 && *status != 429 =>
            {
                ErrorKind::Validation
            }
            _ => ErrorKind::Network,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        Self::Network(e.to_string())
    }
}

/// Failure of the live event connection.
#[derive(Error, Debug)]
pub enum LiveError {
    #[error("invalid server URL: {0}")]
    InvalidUrl(String),

    #[error("websocket error: {0}")]
    WebSocket(String),

    #[error("bind rejected: {0}")]
    BindRejected(String),

    #[error("connection closed")]
    Closed,
}

impl From<tokio_tungstenite::tungstenite::Error> for LiveError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(e.to_string())
    }
}

impl From<serde_json::Error> for LiveError {
    fn from(e: serde_json::Error) -> Self {
        Self::WebSocket(format!("bad frame: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_kind() {
        let refused = TransportError::Rejected { status: 413, message: "too large".into() };
        assert_eq!(refused.error_kind(), ErrorKind::Validation);

        let throttled = TransportError::Rejected { status: 429, message: "slow down".into() };
        assert_eq!(throttled.error_kind(), ErrorKind::Network);

        let bad_gateway = TransportError::Rejected { status: 502, message: "worker down".into() };
        assert_eq!(bad_gateway.error_kind(), ErrorKind::Network);

        let reset = TransportError::Network("connection reset".into());
        assert_eq!(reset.error_kind(), ErrorKind::Network);
    }
}

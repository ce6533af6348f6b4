//! Error types for the memory bridge
//!
//! One enum covers every realm. The variants follow the failure taxonomy of
//! the pipeline: a missing credential is terminal, 5xx responses from the
//! memory service are retryable, 4xx responses are terminal, and timeouts or
//! disconnected channels are degraded to "no context" on the enrichment path
//! while being surfaced on the save path.

use crate::types::ErrorCode;
use thiserror::Error;

/// Main error type for the memory bridge
#[derive(Error, Debug)]
pub enum BridgeError {
    /// No API key is stored in the profile
    #[error("No API key found. Please add it in the extension popup.")]
    MissingCredential,

    /// The memory service answered with a non-2xx status
    #[error("HTTP {status}")]
    Http {
        /// HTTP status code
        status: u16,
        /// Raw response body
        body: String,
    },

    /// The request never produced an HTTP response
    #[error("Network error: {0}")]
    Network(String),

    /// Timeout waiting for a cross-realm round trip
    #[error("Timeout waiting for response after {millis} ms")]
    Timeout {
        /// Milliseconds waited before giving up
        millis: u64,
    },

    /// The peer realm went away (channel closed or worker evicted)
    #[error("Channel closed unexpectedly")]
    ChannelClosed,

    /// Channel send error
    #[error("Failed to send message through channel")]
    ChannelSendError,

    /// Nothing to save
    #[error("No conversation found to save!")]
    EmptyTranscript,

    /// Failed to parse a payload received from a peer or the memory service
    #[error("Failed to parse message: {error}\nRaw message: {raw}")]
    Parse {
        /// Parse error description
        error: String,
        /// Raw text that failed to parse
        raw: String,
    },

    /// The peer reported an error that has no more specific variant
    #[error("{0}")]
    Remote(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Filesystem errors from persistent storage
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Storage backend errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Invalid configuration or settings value
    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

impl BridgeError {
    /// Create a new Http error
    pub fn http(status: u16, body: impl Into<String>) -> Self {
        Self::Http {
            status,
            body: body.into(),
        }
    }

    /// Create a new Timeout error
    pub fn timeout(duration: std::time::Duration) -> Self {
        Self::Timeout {
            millis: duration.as_millis() as u64,
        }
    }

    /// Create a new Parse error
    pub fn parse_error(error: impl Into<String>, raw: impl Into<String>) -> Self {
        Self::Parse {
            error: error.into(),
            raw: raw.into(),
        }
    }

    /// Whether the add-memory retry loop may try again after this error
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Http { status, .. } if (500..600).contains(status))
    }

    /// Check if the error is the "no credential" failure
    pub fn is_missing_credential(&self) -> bool {
        matches!(self, Self::MissingCredential)
    }

    /// Errors that mean the peer realm is gone or did not answer in time
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::ChannelClosed | Self::ChannelSendError
        )
    }

    /// Wire code carried in channel responses
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::MissingCredential => ErrorCode::NoCredential,
            Self::Http { .. } => ErrorCode::Http,
            Self::Network(_) => ErrorCode::Network,
            Self::Timeout { .. } => ErrorCode::Timeout,
            _ => ErrorCode::Internal,
        }
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for BridgeError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        Self::ChannelSendError
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for BridgeError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        Self::ChannelClosed
    }
}

impl From<reqwest::Error> for BridgeError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}

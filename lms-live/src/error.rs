//! Error types for lms-live
//!
//! Connection failures are split into retryable transport errors and
//! terminal authentication errors; everything else a consumer can hit is
//! wrapped in [`LiveError`].

use thiserror::Error;

/// Connection client error
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// No token available from the credential store
    #[error("No authentication token available")]
    MissingToken,

    /// Server rejected the credentials (never retried)
    #[error("Authentication rejected: {0}")]
    Auth(String),

    /// Network or protocol failure (retried up to the reconnect bound)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Retry bound reached
    #[error("Gave up after {attempts} reconnect attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },

    /// Endpoint URL could not be built or parsed
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Operation requires a live connection
    #[error("Not connected")]
    NotConnected,

    /// Connection attempt abandoned by an explicit disconnect
    #[error("Connection attempt cancelled")]
    Cancelled,
}

impl ConnectionError {
    /// Whether the reconnect loop may try again after this error
    pub fn is_retryable(&self) -> bool {
        matches!(self, ConnectionError::Transport(_))
    }
}

/// Poll endpoint error
#[derive(Debug, Error)]
pub enum SourceError {
    /// Server does not know the job
    #[error("Job not found: {0}")]
    NotFound(String),

    /// Token rejected by the poll endpoint
    #[error("Unauthorized")]
    Unauthorized,

    /// Request or body decoding failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Any other non-success status
    #[error("Unexpected status {status} from {url}")]
    Status { status: u16, url: String },
}

/// Top-level error for [`crate::LiveContext`] operations
#[derive(Debug, Error)]
pub enum LiveError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Source(#[from] SourceError),

    /// lms-common error (configuration, serialization)
    #[error("Common error: {0}")]
    Common(#[from] lms_common::Error),
}

/// Result type for LiveContext operations
pub type LiveResult<T> = Result<T, LiveError>;

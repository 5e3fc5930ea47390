//! Error types for the event-stream client.

use thiserror::Error;

/// Result type for stream operations.
pub type StreamResult<T> = Result<T, StreamError>;

/// Errors that can occur in the event-stream client.
#[derive(Debug, Error)]
pub enum StreamError {
    /// HTTP transport error.
    #[error("transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered the feed request with a non-success status.
    #[error("unexpected status: {0}")]
    Status(u16),

    /// A frame was not a valid event record.
    #[error("malformed event frame: {0}")]
    Parse(#[from] serde_json::Error),
}

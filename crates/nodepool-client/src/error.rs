//! Node pool client errors

use thiserror::Error;

/// Errors that can occur when resizing a node pool
#[derive(Debug, Error)]
pub enum NodePoolError {
    /// HTTP request/response error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Cloud API returned an error
    #[error("Cloud API error: {0}")]
    Api(String),

    /// Metadata server lookup failed
    #[error("Metadata error: {0}")]
    Metadata(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid request (e.g., negative size)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

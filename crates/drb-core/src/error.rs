//! Error types for drb-core.

use thiserror::Error;

/// Core error types.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    #[error("Invalid channel: {0}")]
    InvalidChannel(String),

    #[error("Malformed JSON-RPC message: {0}")]
    MalformedRpc(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

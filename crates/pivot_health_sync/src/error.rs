//! Error type for the sync service.

use pivot_health_client::PivotError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("API error: {0}")]
    Api(#[from] PivotError),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Query failed for {kind}: {message}")]
    Query { kind: String, message: String },

    #[error("Config error: {0}")]
    Config(String),

    #[error("Missing credentials: {0}")]
    MissingCredentials(String),

    #[error("Upload cancelled")]
    Cancelled,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    pub fn query(kind: impl Into<String>, message: impl Into<String>) -> Self {
        SyncError::Query {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

//! Error types for fieldsync-core

use thiserror::Error;

use crate::models::SubmissionStatus;

/// Result type alias using fieldsync-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in fieldsync-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Submission payload failed validation (permanent, never auto-retried)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Server reported a duplicate that does not belong to this submission
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Local persistence failure
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Local persistence failure outside of SQLite itself
    #[error("Storage error: {0}")]
    Database(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Submission not found
    #[error("Submission not found: {0}")]
    NotFound(String),

    /// Submission has already been delivered
    #[error("Submission already synced: {0}")]
    AlreadySynced(String),

    /// Status change outside the submission state machine
    #[error("Invalid status transition for {local_id}: {from} -> {to}")]
    InvalidTransition {
        local_id: String,
        from: SubmissionStatus,
        to: SubmissionStatus,
    },

    /// Another drain currently owns the sync worker
    #[error("A sync cycle is already running")]
    SyncInProgress,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether this error came from local persistence.
    pub const fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Database(_) | Self::Io(_))
    }
}

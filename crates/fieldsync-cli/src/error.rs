use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] fieldsync_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Submission ID cannot be empty")]
    EmptySubmissionId,
    #[error("Submission not found for id/prefix: {0}")]
    SubmissionNotFound(String),
    #[error("{0}")]
    AmbiguousSubmissionId(String),
    #[error("Photo not found: {0}")]
    PhotoNotFound(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error(
        "Sync is not configured. Set FIELDSYNC_API_URL or `api_base_url` in the config file to enable `fieldsync sync`."
    )]
    SyncNotConfigured,
}

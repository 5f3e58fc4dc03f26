//! Remote record creation and photo upload.
//!
//! The sync engine talks to the server only through [`UploadClient`], so
//! tests and alternative transports can be swapped in without touching the
//! queue or the state machine.

mod http;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{LocalId, PhotoRef, SubmissionPayload};

pub use http::HttpUploadClient;

/// Server response to a successful create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedRecord {
    pub server_id: String,
    pub record_number: Option<String>,
}

/// Server response to a successful photo upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedPhoto {
    pub remote_url: String,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UploadError {
    /// The server refused the data; retrying the same request cannot help
    #[error("rejected by server: {0}")]
    Rejected(String),
    /// The server already holds a matching record. `idempotency_key` is the
    /// key the server reports for that record, when it reports one.
    #[error("duplicate submission {server_id}")]
    Conflict {
        server_id: String,
        record_number: Option<String>,
        idempotency_key: Option<String>,
    },
    /// Transport failure or temporary server-side condition
    #[error("network: {0}")]
    Network(String),
    /// The local photo asset could not be read
    #[error("photo asset unavailable: {0}")]
    Asset(String),
}

impl UploadError {
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

pub type UploadResult<T> = std::result::Result<T, UploadError>;

/// Remote API used to deliver queued submissions.
///
/// `create_record` must be idempotent on `local_id`: calling it twice for
/// the same submission must not create a second server record.
#[async_trait]
pub trait UploadClient: Send + Sync {
    async fn create_record(
        &self,
        local_id: &LocalId,
        payload: &SubmissionPayload,
    ) -> UploadResult<CreatedRecord>;

    async fn upload_photo(&self, server_id: &str, photo: &PhotoRef) -> UploadResult<UploadedPhoto>;
}

//! Data models for fieldsync

mod photo;
mod stats;
mod submission;

pub use photo::{PhotoRef, PhotoStatus, QueuedPhoto};
pub use stats::{LastSyncRecord, SyncStats, SyncSummary};
pub use submission::{
    GpsCoordinates, LocalId, QueuedSubmission, SubmissionPayload, SubmissionStatus,
};

//! fieldsync-core - Core library for fieldsync
//!
//! This crate contains the durable submission queue, the remote upload
//! client, and the sync engine used by field-capture clients to deliver
//! infringement records once connectivity returns.

pub mod config;
pub mod connectivity;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod sync;
pub mod upload;
pub mod util;

pub use error::{Error, Result};
pub use models::{LocalId, QueuedSubmission, SubmissionPayload, SubmissionStatus};
pub use services::QueueStore;
pub use config::{ClientConfig, ConnectivityConfig, SyncPolicy};
pub use connectivity::{ConnectivityMonitor, HttpReachabilityProbe, Reachability};
pub use sync::{AutoSyncSubscription, SyncEngine, SyncEvent};
pub use upload::{HttpUploadClient, UploadClient, UploadError};

//! Queue drain engine.
//!
//! `SyncEngine` owns the per-item state machine. A single drain worker
//! walks the queue in creation order; within one submission, photos are
//! uploaded through a small bounded pool. Every transition is persisted
//! before the network call it guards, so an interrupted attempt is always
//! visible as a `syncing` row that the startup watchdog can repair.

mod events;

#[cfg(test)]
mod tests;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio::sync::{broadcast, Mutex};

use crate::config::SyncPolicy;
use crate::db::FailureRecord;
use crate::error::{Error, Result};
use crate::models::{
    LastSyncRecord, LocalId, PhotoRef, QueuedSubmission, SubmissionPayload, SubmissionStatus,
    SyncStats, SyncSummary,
};
use crate::services::QueueStore;
use crate::upload::{CreatedRecord, UploadClient, UploadError};
use crate::util::{duration_millis, now_millis};

pub use events::{AutoSyncSubscription, SyncEvent};
use events::EventBus;

/// Delivers queued submissions to the server exactly once per record.
pub struct SyncEngine {
    store: QueueStore,
    client: Arc<dyn UploadClient>,
    policy: SyncPolicy,
    /// Held for the whole of a drain or a manual retry
    worker: Mutex<()>,
    stop_requested: AtomicBool,
    events: EventBus,
}

impl SyncEngine {
    /// Build the engine and run the crash-recovery watchdog.
    pub async fn start(
        store: QueueStore,
        client: Arc<dyn UploadClient>,
        policy: SyncPolicy,
    ) -> Result<Self> {
        let engine = Self {
            store,
            client,
            policy,
            worker: Mutex::new(()),
            stop_requested: AtomicBool::new(false),
            events: EventBus::new(),
        };
        engine.run_watchdog().await?;
        Ok(engine)
    }

    pub const fn store(&self) -> &QueueStore {
        &self.store
    }

    pub const fn policy(&self) -> &SyncPolicy {
        &self.policy
    }

    /// Queue a new submission for delivery.
    pub async fn enqueue(&self, payload: SubmissionPayload, photos: Vec<PhotoRef>) -> Result<LocalId> {
        self.store.enqueue(payload, photos).await
    }

    pub async fn list(&self) -> Result<Vec<QueuedSubmission>> {
        self.store.list().await
    }

    /// Reclassify `syncing` items older than the watchdog threshold as
    /// `failed`. Makes no network calls.
    pub async fn run_watchdog(&self) -> Result<Vec<LocalId>> {
        let _worker = self.worker.lock().await;
        let now = now_millis();
        let stale_before = now.saturating_sub(duration_millis(self.policy.watchdog_threshold()));
        let recovered = self.store.recover_stale_syncing(stale_before, now).await?;

        for local_id in &recovered {
            tracing::warn!(%local_id, "Recovered interrupted sync attempt");
        }
        if !recovered.is_empty() {
            tracing::info!(count = recovered.len(), "Watchdog reset stale submissions");
        }
        Ok(recovered)
    }

    /// Drain every due `pending`/`failed` submission in creation order.
    ///
    /// Returns `SyncInProgress` when another drain or manual retry holds the
    /// worker.
    pub async fn sync_all(&self) -> Result<SyncSummary> {
        let Ok(_worker) = self.worker.try_lock() else {
            return Err(Error::SyncInProgress);
        };

        let started_at = now_millis();
        let due = self
            .store
            .due_for_sync(started_at, self.policy.max_attempts)
            .await?;
        let mut summary = SyncSummary::default();
        tracing::debug!(due = due.len(), "Starting queue drain");

        for item in due {
            if self.is_stop_requested() {
                summary.interrupted = true;
                tracing::info!("Stop requested, leaving remaining submissions queued");
                break;
            }

            match self.deliver(&item.local_id, self.policy.inline_retries).await {
                Ok(true) => summary.success += 1,
                Ok(false) => summary.failed += 1,
                // Changed or removed since the snapshot
                Err(Error::NotFound(_) | Error::InvalidTransition { .. }) => {
                    tracing::debug!(local_id = %item.local_id, "Skipping submission no longer eligible");
                }
                Err(error) if error.is_storage() => {
                    tracing::error!(local_id = %item.local_id, %error, "Queue write failed during sync");
                    summary.failed += 1;
                }
                Err(error) => {
                    tracing::warn!(local_id = %item.local_id, %error, "Submission sync aborted");
                    summary.failed += 1;
                }
            }
        }

        let record = LastSyncRecord {
            started_at,
            completed_at: now_millis(),
            succeeded: summary.success,
            failed: summary.failed,
            interrupted: summary.interrupted,
        };
        if let Err(error) = self.store.record_sync_run(&record).await {
            tracing::warn!(%error, "Failed to record sync run");
        }

        tracing::info!(
            succeeded = summary.success,
            failed = summary.failed,
            interrupted = summary.interrupted,
            "Sync cycle complete: {summary}"
        );
        self.events.cycle_completed(summary);
        Ok(summary)
    }

    /// Force one attempt for a single submission, ignoring backoff and the
    /// attempt cap. Waits for a running drain to finish first.
    pub async fn retry_sync_item(&self, id: &LocalId) -> Result<SubmissionStatus> {
        Self::check_retryable(&self.store.require(id).await?)?;

        let _worker = self.worker.lock().await;
        Self::check_retryable(&self.store.require(id).await?)?;

        tracing::info!(local_id = %id, "Manual retry requested");
        self.deliver(id, 0).await?;
        Ok(self.store.require(id).await?.status)
    }

    fn check_retryable(item: &QueuedSubmission) -> Result<()> {
        match item.status {
            SubmissionStatus::Synced => Err(Error::AlreadySynced(item.local_id.to_string())),
            SubmissionStatus::Syncing => Err(Error::InvalidTransition {
                local_id: item.local_id.to_string(),
                from: SubmissionStatus::Syncing,
                to: SubmissionStatus::Syncing,
            }),
            SubmissionStatus::Pending | SubmissionStatus::Failed => Ok(()),
        }
    }

    /// Remove every `synced` submission.
    pub async fn clear_synced_items(&self) -> Result<usize> {
        self.store.remove_all_synced().await
    }

    pub async fn get_sync_queue_stats(&self) -> Result<SyncStats> {
        self.store.stats().await
    }

    pub async fn get_last_sync_status(&self) -> Result<Option<LastSyncRecord>> {
        self.store.last_sync_run().await
    }

    /// Register a listener called once per completed drain.
    pub fn setup_auto_sync<F>(&self, callback: F) -> AutoSyncSubscription
    where
        F: Fn(&SyncSummary) + Send + Sync + 'static,
    {
        self.events.register(callback)
    }

    /// Stream of per-item and per-cycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Stop starting new items. An item already in flight completes.
    pub fn stop_scheduling(&self) {
        if !self.stop_requested.swap(true, Ordering::SeqCst) {
            tracing::info!("Sync scheduling paused");
        }
    }

    pub fn resume_scheduling(&self) {
        if self.stop_requested.swap(false, Ordering::SeqCst) {
            tracing::info!("Sync scheduling resumed");
        }
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    /// Whether a drain or manual retry currently holds the worker.
    pub fn is_draining(&self) -> bool {
        self.worker.try_lock().is_err()
    }

    /// Run attempts for one submission until it is synced or left failed.
    ///
    /// Returns `true` when the submission ended `synced`. Callers must hold
    /// the worker.
    async fn deliver(&self, id: &LocalId, inline_retries: u32) -> Result<bool> {
        let mut inline_attempts = 0;

        loop {
            let item = self.store.begin_attempt(id, now_millis()).await?;
            tracing::debug!(local_id = %id, attempt = item.attempts, "Attempting submission");

            let failure = match self.attempt(&item).await {
                Ok(()) => {
                    self.store.mark_synced(id, now_millis()).await?;
                    tracing::info!(local_id = %id, attempts = item.attempts, "Submission synced");
                    self.events.publish(SyncEvent::ItemSynced {
                        local_id: *id,
                    });
                    return Ok(true);
                }
                Err(AttemptError::Remote(failure)) => failure,
                Err(AttemptError::Local(error)) => {
                    // Release the advisory lock before surfacing the storage error
                    let record = FailureRecord::transient(error.to_string(), Some(now_millis()));
                    if let Err(mark_error) = self.store.mark_failed(id, &record, now_millis()).await {
                        tracing::error!(local_id = %id, error = %mark_error, "Failed to release submission");
                    }
                    return Err(error);
                }
            };

            let now = now_millis();
            let record = if failure.transient {
                let delay = duration_millis(self.policy.backoff_delay(item.attempts));
                FailureRecord::transient(&failure.message, Some(now.saturating_add(delay)))
            } else {
                FailureRecord::permanent(&failure.message)
            };
            self.store.mark_failed(id, &record, now).await?;
            tracing::warn!(
                local_id = %id,
                attempts = item.attempts,
                retryable = record.retryable,
                error = %failure.message,
                "Submission attempt failed"
            );

            let retry_inline = failure.transient
                && inline_attempts < inline_retries
                && item.attempts < self.policy.max_attempts
                && !self.is_stop_requested();
            if retry_inline {
                inline_attempts += 1;
                let delay = self.policy.inline_retry_delay();
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                continue;
            }

            self.events.publish(SyncEvent::ItemFailed {
                local_id: *id,
                error: failure.message,
                retryable: record.retryable,
            });
            return Ok(false);
        }
    }

    /// One pass of the two-phase upload: create the record unless a server
    /// id is already known, then upload every photo not yet uploaded.
    async fn attempt(&self, item: &QueuedSubmission) -> std::result::Result<(), AttemptError> {
        let id = &item.local_id;

        let server_id = if let Some(server_id) = &item.server_id {
            tracing::debug!(local_id = %id, %server_id, "Resuming at photo upload");
            server_id.clone()
        } else {
            let created = match self.client.create_record(id, &item.payload).await {
                Ok(created) => created,
                Err(UploadError::Conflict {
                    server_id,
                    record_number,
                    idempotency_key,
                }) if idempotency_key.as_ref() == Some(&id.as_str()) => {
                    tracing::info!(local_id = %id, %server_id, "Server already holds this submission");
                    CreatedRecord {
                        server_id,
                        record_number,
                    }
                }
                Err(error) => return Err(error.into()),
            };
            self.store
                .record_server_id(id, &created.server_id, created.record_number.as_deref())
                .await?;
            created.server_id
        };

        let pending: Vec<(u32, PhotoRef)> = item
            .photos_to_upload()
            .map(|photo| (photo.position, photo.asset_ref.clone()))
            .collect();
        if pending.is_empty() {
            return Ok(());
        }

        let client = &self.client;
        let server_id = server_id.as_str();
        let mut uploads = stream::iter(pending)
            .map(move |(position, asset_ref)| async move {
                (position, client.upload_photo(server_id, &asset_ref).await)
            })
            .buffer_unordered(self.policy.photo_concurrency());

        // Uploads already in flight run to completion even if a write fails
        let mut failures = Vec::new();
        let mut storage_error = None;
        while let Some((position, result)) = uploads.next().await {
            let written = match result {
                Ok(uploaded) => {
                    self.store
                        .mark_photo_uploaded(id, position, &uploaded.remote_url)
                        .await
                }
                Err(error) => {
                    let message = format!("photo {position}: {error}");
                    let written = self.store.mark_photo_failed(id, position, &message).await;
                    failures.push(AttemptFailure {
                        message,
                        transient: error.is_transient(),
                    });
                    written
                }
            };
            if let Err(error) = written {
                tracing::warn!(local_id = %id, position, %error, "Failed to record photo upload");
                storage_error.get_or_insert(error);
            }
        }

        if let Some(error) = storage_error {
            return Err(error.into());
        }
        match AttemptFailure::merge(failures) {
            Some(failure) => Err(AttemptError::Remote(failure)),
            None => Ok(()),
        }
    }
}

#[derive(Debug)]
struct AttemptFailure {
    message: String,
    transient: bool,
}

impl AttemptFailure {
    fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: false,
        }
    }

    /// Combine photo failures; any permanent failure makes the whole attempt
    /// permanent.
    fn merge(failures: Vec<Self>) -> Option<Self> {
        if failures.is_empty() {
            return None;
        }
        let transient = failures.iter().all(|failure| failure.transient);
        let message = failures
            .into_iter()
            .map(|failure| failure.message)
            .collect::<Vec<_>>()
            .join("; ");
        Some(Self { message, transient })
    }
}

impl From<UploadError> for AttemptFailure {
    fn from(error: UploadError) -> Self {
        Self {
            transient: error.is_transient(),
            message: error.to_string(),
        }
    }
}

enum AttemptError {
    Remote(AttemptFailure),
    Local(Error),
}

impl From<UploadError> for AttemptError {
    fn from(error: UploadError) -> Self {
        Self::Remote(error.into())
    }
}

impl From<Error> for AttemptError {
    fn from(error: Error) -> Self {
        match error {
            // A second, different server id for the same submission
            Error::Conflict(message) => Self::Remote(AttemptFailure::permanent(message)),
            other => Self::Local(other),
        }
    }
}

//! Durable submission queue shared by the capture flow and the sync engine.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::db::{Database, FailureRecord, QueueRepository, SqliteQueueRepository};
use crate::models::{
    LastSyncRecord, LocalId, PhotoRef, QueuedSubmission, SubmissionPayload, SubmissionStatus,
    SyncStats,
};
use crate::util::now_millis;
use crate::{Error, Result};

/// Thread-safe handle to the local submission queue.
///
/// `QueueStore` is the single source of truth for queued submissions; all
/// writers go through the same serialized connection.
#[derive(Clone)]
pub struct QueueStore {
    db: Arc<Mutex<Database>>,
    db_path: Option<PathBuf>,
}

impl QueueStore {
    /// Open the queue at the given filesystem path.
    pub fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::open(&db_path)?;
        tracing::info!("Opened submission queue at {}", db_path.display());
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: Some(db_path),
        })
    }

    /// Open an in-memory queue (primarily for tests).
    pub fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory()?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: None,
        })
    }

    /// Filesystem location of the queue, if it is file-backed.
    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Persist a new submission as `pending` and return its local id.
    pub async fn enqueue(
        &self,
        payload: SubmissionPayload,
        photos: Vec<PhotoRef>,
    ) -> Result<LocalId> {
        let submission = self.enqueue_submission(payload, photos).await?;
        Ok(submission.local_id)
    }

    /// Persist a new submission and return the stored record.
    pub async fn enqueue_submission(
        &self,
        payload: SubmissionPayload,
        photos: Vec<PhotoRef>,
    ) -> Result<QueuedSubmission> {
        let db = self.db.lock().await;
        let repo = SqliteQueueRepository::new(db.connection());
        let submission = repo.enqueue(payload, photos, now_millis())?;
        tracing::info!(
            local_id = %submission.local_id,
            photos = submission.photos.len(),
            "Queued submission"
        );
        Ok(submission)
    }

    /// List submissions in creation order.
    pub async fn list(&self) -> Result<Vec<QueuedSubmission>> {
        let db = self.db.lock().await;
        let repo = SqliteQueueRepository::new(db.connection());
        repo.list()
    }

    /// Fetch a submission by id.
    pub async fn get(&self, id: &LocalId) -> Result<Option<QueuedSubmission>> {
        let db = self.db.lock().await;
        let repo = SqliteQueueRepository::new(db.connection());
        repo.get(id)
    }

    /// Submissions an automatic drain at `now` should attempt, in creation order.
    pub async fn due_for_sync(&self, now: i64, max_attempts: u32) -> Result<Vec<QueuedSubmission>> {
        let submissions = self.list().await?;
        Ok(submissions
            .into_iter()
            .filter(|submission| submission.is_due(now, max_attempts))
            .collect())
    }

    /// Resolve a full id or a unique id prefix.
    pub async fn find_by_prefix(&self, prefix: &str) -> Result<Vec<QueuedSubmission>> {
        let prefix = prefix.trim().to_ascii_lowercase();
        if prefix.is_empty() {
            return Ok(Vec::new());
        }

        let submissions = self.list().await?;
        Ok(submissions
            .into_iter()
            .filter(|submission| submission.local_id.as_str().starts_with(&prefix))
            .collect())
    }

    /// Apply a status change along the submission state machine.
    pub async fn update_status(
        &self,
        id: &LocalId,
        status: SubmissionStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let db = self.db.lock().await;
        let repo = SqliteQueueRepository::new(db.connection());
        repo.update_status(id, status, error, now_millis())
    }

    /// Move a submission into `syncing` at the given time.
    pub async fn begin_attempt(&self, id: &LocalId, now: i64) -> Result<QueuedSubmission> {
        let db = self.db.lock().await;
        let repo = SqliteQueueRepository::new(db.connection());
        repo.begin_attempt(id, now)
    }

    pub async fn record_server_id(
        &self,
        id: &LocalId,
        server_id: &str,
        record_number: Option<&str>,
    ) -> Result<()> {
        let db = self.db.lock().await;
        let repo = SqliteQueueRepository::new(db.connection());
        repo.record_server_id(id, server_id, record_number, now_millis())
    }

    pub async fn mark_photo_uploaded(
        &self,
        id: &LocalId,
        position: u32,
        remote_url: &str,
    ) -> Result<()> {
        let db = self.db.lock().await;
        let repo = SqliteQueueRepository::new(db.connection());
        repo.mark_photo_uploaded(id, position, remote_url)
    }

    pub async fn mark_photo_failed(&self, id: &LocalId, position: u32, error: &str) -> Result<()> {
        let db = self.db.lock().await;
        let repo = SqliteQueueRepository::new(db.connection());
        repo.mark_photo_failed(id, position, error)
    }

    pub async fn mark_synced(&self, id: &LocalId, now: i64) -> Result<()> {
        let db = self.db.lock().await;
        let repo = SqliteQueueRepository::new(db.connection());
        repo.mark_synced(id, now)
    }

    pub async fn mark_failed(&self, id: &LocalId, failure: &FailureRecord, now: i64) -> Result<()> {
        let db = self.db.lock().await;
        let repo = SqliteQueueRepository::new(db.connection());
        repo.mark_failed(id, failure, now)
    }

    /// Remove a submission; removing a missing id is a no-op.
    pub async fn remove(&self, id: &LocalId) -> Result<()> {
        let db = self.db.lock().await;
        let repo = SqliteQueueRepository::new(db.connection());
        if repo.remove(id)? {
            tracing::info!(local_id = %id, "Removed submission from queue");
        }
        Ok(())
    }

    /// Remove every `synced` submission.
    pub async fn remove_all_synced(&self) -> Result<usize> {
        let db = self.db.lock().await;
        let repo = SqliteQueueRepository::new(db.connection());
        let removed = repo.remove_all_synced()?;
        tracing::info!(removed, "Cleared synced submissions");
        Ok(removed)
    }

    /// Reclassify stale `syncing` submissions as `failed`.
    pub async fn recover_stale_syncing(&self, stale_before: i64, now: i64) -> Result<Vec<LocalId>> {
        let db = self.db.lock().await;
        let repo = SqliteQueueRepository::new(db.connection());
        repo.recover_stale_syncing(stale_before, now)
    }

    /// Queue counts by status.
    pub async fn stats(&self) -> Result<SyncStats> {
        let db = self.db.lock().await;
        let repo = SqliteQueueRepository::new(db.connection());
        repo.stats()
    }

    pub async fn record_sync_run(&self, record: &LastSyncRecord) -> Result<()> {
        let db = self.db.lock().await;
        let repo = SqliteQueueRepository::new(db.connection());
        repo.record_sync_run(record)
    }

    pub async fn last_sync_run(&self) -> Result<Option<LastSyncRecord>> {
        let db = self.db.lock().await;
        let repo = SqliteQueueRepository::new(db.connection());
        repo.last_sync_run()
    }

    /// Fetch a submission or fail with `NotFound`.
    pub async fn require(&self, id: &LocalId) -> Result<QueuedSubmission> {
        self.get(id)
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }
}

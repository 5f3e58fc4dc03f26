//! Submission queue repository implementation

use std::collections::HashMap;
use std::str::FromStr;

use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::{Error, Result};
use crate::models::{
    LastSyncRecord, LocalId, PhotoRef, PhotoStatus, QueuedPhoto, QueuedSubmission,
    SubmissionPayload, SubmissionStatus, SyncStats,
};

const SUBMISSION_COLUMNS: &str = "local_id, server_id, record_number, payload, status, attempts, \
     last_error, retryable, next_attempt_at, created_at, updated_at, synced_at";

const INTERRUPTED_ERROR: &str = "interrupted: previous attempt did not complete";

/// Details recorded when a sync attempt ends in failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureRecord {
    pub error: String,
    /// `false` stops automatic retries until a manual retry
    pub retryable: bool,
    pub next_attempt_at: Option<i64>,
}

impl FailureRecord {
    pub fn transient(error: impl Into<String>, next_attempt_at: Option<i64>) -> Self {
        Self {
            error: error.into(),
            retryable: true,
            next_attempt_at,
        }
    }

    pub fn permanent(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            retryable: false,
            next_attempt_at: None,
        }
    }
}

/// Trait for submission queue storage operations
///
/// Every mutation takes the current time (Unix ms) from the caller.
pub trait QueueRepository {
    /// Validate and persist a new `pending` submission with its photos
    fn enqueue(
        &self,
        payload: SubmissionPayload,
        photos: Vec<PhotoRef>,
        now: i64,
    ) -> Result<QueuedSubmission>;

    /// Get a submission by ID
    fn get(&self, id: &LocalId) -> Result<Option<QueuedSubmission>>;

    /// List all submissions in creation order
    fn list(&self) -> Result<Vec<QueuedSubmission>>;

    /// Move `pending`/`failed` to `syncing` and count the attempt
    fn begin_attempt(&self, id: &LocalId, now: i64) -> Result<QueuedSubmission>;

    /// Store the server-assigned identifier; assigned at most once
    fn record_server_id(
        &self,
        id: &LocalId,
        server_id: &str,
        record_number: Option<&str>,
        now: i64,
    ) -> Result<()>;

    /// Mark one photo as uploaded
    fn mark_photo_uploaded(&self, id: &LocalId, position: u32, remote_url: &str) -> Result<()>;

    /// Record a failed photo upload
    fn mark_photo_failed(&self, id: &LocalId, position: u32, error: &str) -> Result<()>;

    /// Move `syncing` to `synced`
    fn mark_synced(&self, id: &LocalId, now: i64) -> Result<()>;

    /// Move `syncing` to `failed`
    fn mark_failed(&self, id: &LocalId, failure: &FailureRecord, now: i64) -> Result<()>;

    /// Remove a submission; missing IDs are a no-op
    fn remove(&self, id: &LocalId) -> Result<bool>;

    /// Remove every `synced` submission, returning how many were removed
    fn remove_all_synced(&self) -> Result<usize>;

    /// Reclassify `syncing` rows last touched before `stale_before` as `failed`
    fn recover_stale_syncing(&self, stale_before: i64, now: i64) -> Result<Vec<LocalId>>;

    /// Count submissions by status
    fn stats(&self) -> Result<SyncStats>;

    /// Append a completed drain to the history
    fn record_sync_run(&self, record: &LastSyncRecord) -> Result<()>;

    /// Most recently completed drain
    fn last_sync_run(&self) -> Result<Option<LastSyncRecord>>;

    /// Apply a status change along the state machine.
    ///
    /// Re-applying the current status is a no-op.
    fn update_status(
        &self,
        id: &LocalId,
        status: SubmissionStatus,
        error: Option<&str>,
        now: i64,
    ) -> Result<()> {
        let current = self
            .get(id)?
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        if current.status == status {
            return Ok(());
        }

        match status {
            SubmissionStatus::Syncing => self.begin_attempt(id, now).map(|_| ()),
            SubmissionStatus::Synced => self.mark_synced(id, now),
            SubmissionStatus::Failed => self.mark_failed(
                id,
                &FailureRecord::transient(error.unwrap_or("sync failed"), None),
                now,
            ),
            SubmissionStatus::Pending => Err(Error::InvalidTransition {
                local_id: id.to_string(),
                from: current.status,
                to: status,
            }),
        }
    }
}

/// `SQLite` implementation of `QueueRepository`
pub struct SqliteQueueRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteQueueRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn current_status(&self, id: &LocalId) -> Result<Option<SubmissionStatus>> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT status FROM submissions WHERE local_id = ?",
                params![id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        raw.map(|status| status.parse()).transpose()
    }

    /// Explain why a guarded update touched no rows
    fn transition_error(&self, id: &LocalId, to: SubmissionStatus) -> Error {
        match self.current_status(id) {
            Ok(Some(from)) => Error::InvalidTransition {
                local_id: id.to_string(),
                from,
                to,
            },
            Ok(None) => Error::NotFound(id.to_string()),
            Err(error) => error,
        }
    }

    fn load_photos(&self, id: &LocalId) -> Result<Vec<QueuedPhoto>> {
        let mut stmt = self.conn.prepare(
            "SELECT local_id, position, asset_ref, status, remote_url, last_error
             FROM submission_photos
             WHERE local_id = ?
             ORDER BY position ASC",
        )?;

        let photos = stmt
            .query_map(params![id.as_str()], Self::parse_photo)?
            .map(|photo| photo.map(|(_, photo)| photo))
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(photos)
    }

    fn load_all_photos(&self) -> Result<HashMap<String, Vec<QueuedPhoto>>> {
        let mut stmt = self.conn.prepare(
            "SELECT local_id, position, asset_ref, status, remote_url, last_error
             FROM submission_photos
             ORDER BY local_id ASC, position ASC",
        )?;

        let mut grouped: HashMap<String, Vec<QueuedPhoto>> = HashMap::new();
        for photo in stmt.query_map([], Self::parse_photo)? {
            let (local_id, photo) = photo?;
            grouped.entry(local_id).or_default().push(photo);
        }

        Ok(grouped)
    }

    /// Parse a submission (without photos) from a database row
    fn parse_submission(row: &Row<'_>) -> rusqlite::Result<QueuedSubmission> {
        let payload: String = row.get(3)?;
        let payload = serde_json::from_str::<SubmissionPayload>(&payload)
            .map_err(|error| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(error)))?;

        Ok(QueuedSubmission {
            local_id: parse_text(row, 0)?,
            server_id: row.get(1)?,
            record_number: row.get(2)?,
            payload,
            photos: Vec::new(),
            status: parse_text(row, 4)?,
            attempts: row.get(5)?,
            last_error: row.get(6)?,
            retryable: row.get(7)?,
            next_attempt_at: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
            synced_at: row.get(11)?,
        })
    }

    fn parse_photo(row: &Row<'_>) -> rusqlite::Result<(String, QueuedPhoto)> {
        let asset_ref: String = row.get(2)?;
        let asset_ref = PhotoRef::new(asset_ref)
            .map_err(|error| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(error)))?;

        Ok((
            row.get(0)?,
            QueuedPhoto {
                position: row.get(1)?,
                asset_ref,
                status: parse_text::<PhotoStatus>(row, 3)?,
                remote_url: row.get(4)?,
                last_error: row.get(5)?,
            },
        ))
    }
}

impl QueueRepository for SqliteQueueRepository<'_> {
    fn enqueue(
        &self,
        payload: SubmissionPayload,
        photos: Vec<PhotoRef>,
        now: i64,
    ) -> Result<QueuedSubmission> {
        let payload = payload.normalized()?;
        let local_id = LocalId::new();

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO submissions (local_id, payload, status, attempts, retryable, created_at, updated_at)
             VALUES (?, ?, 'pending', 0, 1, ?, ?)",
            params![local_id.as_str(), serde_json::to_string(&payload)?, now, now],
        )?;

        let mut queued_photos = Vec::with_capacity(photos.len());
        for (position, asset_ref) in (0u32..).zip(photos) {
            tx.execute(
                "INSERT INTO submission_photos (local_id, position, asset_ref, status)
                 VALUES (?, ?, ?, 'pending')",
                params![local_id.as_str(), position, asset_ref.as_str()],
            )?;
            queued_photos.push(QueuedPhoto {
                position,
                asset_ref,
                status: PhotoStatus::Pending,
                remote_url: None,
                last_error: None,
            });
        }
        tx.commit()?;

        Ok(QueuedSubmission {
            local_id,
            server_id: None,
            record_number: None,
            payload,
            photos: queued_photos,
            status: SubmissionStatus::Pending,
            attempts: 0,
            last_error: None,
            retryable: true,
            next_attempt_at: None,
            created_at: now,
            updated_at: now,
            synced_at: None,
        })
    }

    fn get(&self, id: &LocalId) -> Result<Option<QueuedSubmission>> {
        let submission = self
            .conn
            .query_row(
                &format!("SELECT {SUBMISSION_COLUMNS} FROM submissions WHERE local_id = ?"),
                params![id.as_str()],
                Self::parse_submission,
            )
            .optional()?;

        let Some(mut submission) = submission else {
            return Ok(None);
        };
        submission.photos = self.load_photos(id)?;
        Ok(Some(submission))
    }

    fn list(&self) -> Result<Vec<QueuedSubmission>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SUBMISSION_COLUMNS}
             FROM submissions
             ORDER BY created_at ASC, local_id ASC"
        ))?;

        let mut submissions = stmt
            .query_map([], Self::parse_submission)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut photos = self.load_all_photos()?;
        for submission in &mut submissions {
            submission.photos = photos
                .remove(&submission.local_id.as_str())
                .unwrap_or_default();
        }

        Ok(submissions)
    }

    fn begin_attempt(&self, id: &LocalId, now: i64) -> Result<QueuedSubmission> {
        let rows = self.conn.execute(
            &format!(
                "UPDATE submissions
                 SET status = 'syncing', attempts = attempts + 1, updated_at = ?1
                 WHERE local_id = ?2 AND status IN ({})",
                status_list(&SubmissionStatus::predecessors(SubmissionStatus::Syncing))
            ),
            params![now, id.as_str()],
        )?;

        if rows == 0 {
            return Err(self.transition_error(id, SubmissionStatus::Syncing));
        }

        self.get(id)?.ok_or_else(|| Error::NotFound(id.to_string()))
    }

    fn record_server_id(
        &self,
        id: &LocalId,
        server_id: &str,
        record_number: Option<&str>,
        now: i64,
    ) -> Result<()> {
        let rows = self.conn.execute(
            "UPDATE submissions
             SET server_id = ?1, record_number = ?2, updated_at = ?3
             WHERE local_id = ?4 AND server_id IS NULL",
            params![server_id, record_number, now, id.as_str()],
        )?;
        if rows > 0 {
            return Ok(());
        }

        let existing = self
            .get(id)?
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        match existing.server_id.as_deref() {
            Some(assigned) if assigned == server_id => Ok(()),
            Some(assigned) => Err(Error::Conflict(format!(
                "submission {id} already has server id {assigned}, refusing {server_id}"
            ))),
            None => Err(Error::Database(format!(
                "failed to record server id for {id}"
            ))),
        }
    }

    fn mark_photo_uploaded(&self, id: &LocalId, position: u32, remote_url: &str) -> Result<()> {
        let rows = self.conn.execute(
            "UPDATE submission_photos
             SET status = 'uploaded', remote_url = ?1, last_error = NULL
             WHERE local_id = ?2 AND position = ?3",
            params![remote_url, id.as_str(), position],
        )?;

        if rows == 0 {
            return Err(Error::NotFound(format!("{id} photo {position}")));
        }
        Ok(())
    }

    fn mark_photo_failed(&self, id: &LocalId, position: u32, error: &str) -> Result<()> {
        // An uploaded photo never goes back
        self.conn.execute(
            "UPDATE submission_photos
             SET status = 'failed', last_error = ?1
             WHERE local_id = ?2 AND position = ?3 AND status != 'uploaded'",
            params![error, id.as_str(), position],
        )?;
        Ok(())
    }

    fn mark_synced(&self, id: &LocalId, now: i64) -> Result<()> {
        let rows = self.conn.execute(
            &format!(
                "UPDATE submissions
                 SET status = 'synced', synced_at = ?1, updated_at = ?1,
                     last_error = NULL, retryable = 1, next_attempt_at = NULL
                 WHERE local_id = ?2 AND status IN ({})",
                status_list(&SubmissionStatus::predecessors(SubmissionStatus::Synced))
            ),
            params![now, id.as_str()],
        )?;

        if rows == 0 {
            return Err(self.transition_error(id, SubmissionStatus::Synced));
        }
        Ok(())
    }

    fn mark_failed(&self, id: &LocalId, failure: &FailureRecord, now: i64) -> Result<()> {
        let rows = self.conn.execute(
            &format!(
                "UPDATE submissions
                 SET status = 'failed', last_error = ?1, retryable = ?2,
                     next_attempt_at = ?3, updated_at = ?4
                 WHERE local_id = ?5 AND status IN ({})",
                status_list(&SubmissionStatus::predecessors(SubmissionStatus::Failed))
            ),
            params![
                failure.error,
                failure.retryable,
                failure.next_attempt_at,
                now,
                id.as_str()
            ],
        )?;

        if rows == 0 {
            return Err(self.transition_error(id, SubmissionStatus::Failed));
        }
        Ok(())
    }

    fn remove(&self, id: &LocalId) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM submissions WHERE local_id = ?",
            params![id.as_str()],
        )?;
        Ok(rows > 0)
    }

    fn remove_all_synced(&self) -> Result<usize> {
        let rows = self
            .conn
            .execute("DELETE FROM submissions WHERE status = 'synced'", [])?;
        Ok(rows)
    }

    fn recover_stale_syncing(&self, stale_before: i64, now: i64) -> Result<Vec<LocalId>> {
        let tx = self.conn.unchecked_transaction()?;

        let stale = {
            let mut stmt = tx.prepare(
                "SELECT local_id FROM submissions
                 WHERE status = 'syncing' AND updated_at < ?
                 ORDER BY created_at ASC, local_id ASC",
            )?;
            let ids = stmt
                .query_map(params![stale_before], |row| parse_text::<LocalId>(row, 0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            ids
        };

        for id in &stale {
            tx.execute(
                "UPDATE submissions
                 SET status = 'failed', last_error = ?1, retryable = 1,
                     next_attempt_at = ?2, updated_at = ?2
                 WHERE local_id = ?3 AND status = 'syncing'",
                params![INTERRUPTED_ERROR, now, id.as_str()],
            )?;
        }
        tx.commit()?;

        Ok(stale)
    }

    fn stats(&self) -> Result<SyncStats> {
        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM submissions GROUP BY status")?;

        let counts = stmt
            .query_map([], |row| {
                Ok((parse_text::<SubmissionStatus>(row, 0)?, row.get::<_, usize>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut stats = SyncStats::default();
        for (status, count) in counts {
            stats.total += count;
            match status {
                SubmissionStatus::Pending => stats.pending = count,
                SubmissionStatus::Syncing => stats.syncing = count,
                SubmissionStatus::Synced => stats.synced = count,
                SubmissionStatus::Failed => stats.failed = count,
            }
        }

        Ok(stats)
    }

    fn record_sync_run(&self, record: &LastSyncRecord) -> Result<()> {
        self.conn.execute(
            "INSERT INTO sync_runs (started_at, completed_at, succeeded, failed, interrupted)
             VALUES (?, ?, ?, ?, ?)",
            params![
                record.started_at,
                record.completed_at,
                record.succeeded,
                record.failed,
                record.interrupted
            ],
        )?;
        Ok(())
    }

    fn last_sync_run(&self) -> Result<Option<LastSyncRecord>> {
        let record = self
            .conn
            .query_row(
                "SELECT started_at, completed_at, succeeded, failed, interrupted
                 FROM sync_runs
                 ORDER BY completed_at DESC, id DESC
                 LIMIT 1",
                [],
                |row| {
                    Ok(LastSyncRecord {
                        started_at: row.get(0)?,
                        completed_at: row.get(1)?,
                        succeeded: row.get(2)?,
                        failed: row.get(3)?,
                        interrupted: row.get(4)?,
                    })
                },
            )
            .optional()?;

        Ok(record)
    }
}

fn parse_text<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|error| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(error)))
}

fn status_list(statuses: &[SubmissionStatus]) -> String {
    statuses
        .iter()
        .map(|status| format!("'{}'", status.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use fieldsync_core::models::PhotoStatus;
use fieldsync_core::{
    ClientConfig, HttpUploadClient, LocalId, QueueStore, QueuedSubmission, SyncEngine,
};
use serde::Serialize;

use crate::error::CliError;

const SHORT_ID_LEN: usize = 13;

/// Resolved configuration and queue location for one CLI invocation.
#[derive(Debug, Clone)]
pub struct CliContext {
    pub config: ClientConfig,
    pub db_path: PathBuf,
}

impl CliContext {
    pub fn resolve(
        cli_db_path: Option<PathBuf>,
        cli_config_path: Option<PathBuf>,
    ) -> Result<Self, CliError> {
        let config_path = match cli_config_path
            .or_else(|| env::var_os("FIELDSYNC_CONFIG").map(PathBuf::from))
        {
            Some(path) => path,
            None => default_config_path()?,
        };
        let mut config = ClientConfig::load(&config_path)?;
        apply_env_overrides(
            &mut config,
            env::var("FIELDSYNC_API_URL").ok(),
            env::var("FIELDSYNC_API_TOKEN").ok(),
        );

        let db_path = resolve_db_path(
            cli_db_path,
            env::var_os("FIELDSYNC_DB_PATH").map(PathBuf::from),
            config.db_path.clone(),
        )?;

        Ok(Self { config, db_path })
    }

    pub fn open_store(&self) -> Result<QueueStore, CliError> {
        Ok(QueueStore::open_path(&self.db_path)?)
    }

    /// Build a sync engine against the configured API.
    pub async fn engine(&self) -> Result<SyncEngine, CliError> {
        let base_url = self
            .config
            .api_base_url()?
            .ok_or(CliError::SyncNotConfigured)?;
        let client = HttpUploadClient::new(base_url, self.config.api_token())?;
        let store = self.open_store()?;
        Ok(SyncEngine::start(store, Arc::new(client), self.config.sync.clone()).await?)
    }
}

pub fn apply_env_overrides(
    config: &mut ClientConfig,
    api_url: Option<String>,
    api_token: Option<String>,
) {
    if let Some(api_url) = api_url.filter(|value| !value.trim().is_empty()) {
        config.api_base_url = Some(api_url);
    }
    if let Some(api_token) = api_token.filter(|value| !value.trim().is_empty()) {
        config.api_token = Some(api_token);
    }
}

pub fn resolve_db_path(
    cli_db_path: Option<PathBuf>,
    env_db_path: Option<PathBuf>,
    config_db_path: Option<PathBuf>,
) -> Result<PathBuf, CliError> {
    match cli_db_path.or(env_db_path).or(config_db_path) {
        Some(path) => Ok(path),
        None => default_db_path(),
    }
}

pub fn default_db_path() -> Result<PathBuf, CliError> {
    dirs::data_dir()
        .map(|dir| dir.join("fieldsync").join("queue.db"))
        .ok_or_else(|| CliError::Config("Failed to resolve data directory".to_string()))
}

pub fn default_config_path() -> Result<PathBuf, CliError> {
    dirs::config_dir()
        .map(|dir| dir.join("fieldsync").join("config.json"))
        .ok_or_else(|| CliError::Config("Failed to resolve config directory".to_string()))
}

pub fn normalize_submission_identifier(id: &str) -> Result<String, CliError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptySubmissionId)
    } else {
        Ok(trimmed.to_string())
    }
}

/// Resolve a full submission id or a unique id prefix.
pub async fn resolve_submission(
    query: &str,
    store: &QueueStore,
) -> Result<QueuedSubmission, CliError> {
    if let Ok(local_id) = query.parse::<LocalId>() {
        if let Some(submission) = store.get(&local_id).await? {
            return Ok(submission);
        }
    }

    let mut matches = store.find_by_prefix(query).await?;
    match matches.len() {
        0 => Err(CliError::SubmissionNotFound(query.to_string())),
        1 => Ok(matches.remove(0)),
        _ => {
            let options = matches
                .iter()
                .take(3)
                .map(|submission| short_id(&submission.local_id))
                .collect::<Vec<_>>()
                .join(", ");

            Err(CliError::AmbiguousSubmissionId(format!(
                "ID prefix '{query}' is ambiguous; matches: {options}"
            )))
        }
    }
}

/// Canonicalize photo paths so the queue keeps working from any directory.
pub fn resolve_photo_paths(photos: &[PathBuf]) -> Result<Vec<PathBuf>, CliError> {
    photos
        .iter()
        .map(|photo| {
            if photo.is_file() {
                Ok(std::fs::canonicalize(photo)?)
            } else {
                Err(CliError::PhotoNotFound(photo.display().to_string()))
            }
        })
        .collect()
}

#[derive(Debug, Serialize)]
pub struct SubmissionListItem {
    pub id: String,
    pub status: String,
    pub vehicle_registration: String,
    pub offence_code: String,
    pub location: String,
    pub server_id: Option<String>,
    pub record_number: Option<String>,
    pub attempts: u32,
    pub retryable: bool,
    pub last_error: Option<String>,
    pub photos_uploaded: usize,
    pub photos_total: usize,
    pub created_at: i64,
    pub relative_time: String,
    pub next_attempt_at: Option<i64>,
}

pub fn submission_to_list_item(submission: &QueuedSubmission) -> SubmissionListItem {
    let now_ms = Utc::now().timestamp_millis();
    SubmissionListItem {
        id: submission.local_id.to_string(),
        status: submission.status.to_string(),
        vehicle_registration: submission.payload.vehicle_registration.clone(),
        offence_code: submission.payload.offence_code.clone(),
        location: submission.payload.location.clone(),
        server_id: submission.server_id.clone(),
        record_number: submission.record_number.clone(),
        attempts: submission.attempts,
        retryable: submission.retryable,
        last_error: submission.last_error.clone(),
        photos_uploaded: uploaded_photo_count(submission),
        photos_total: submission.photos.len(),
        created_at: submission.created_at,
        relative_time: format_relative_time(submission.created_at, now_ms),
        next_attempt_at: submission.next_attempt_at,
    }
}

pub fn format_submission_lines(submissions: &[QueuedSubmission]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    submissions
        .iter()
        .map(|submission| {
            let short_id = short_id(&submission.local_id);
            let status = submission.status.as_str();
            let rego = &submission.payload.vehicle_registration;
            let offence = &submission.payload.offence_code;
            let photos = format!(
                "{}/{} photos",
                uploaded_photo_count(submission),
                submission.photos.len()
            );
            let relative_time = format_relative_time(submission.created_at, now_ms);

            let line = format!(
                "{short_id:<13}  {status:<7}  {rego:<10}  {offence:<8}  {photos:<10}  {relative_time}"
            );
            match &submission.last_error {
                Some(error) if !submission.status.is_terminal() => {
                    let hint = if submission.retryable { "" } else { " [needs review]" };
                    format!("{line}\n               {error}{hint}")
                }
                _ => line,
            }
        })
        .collect()
}

fn uploaded_photo_count(submission: &QueuedSubmission) -> usize {
    submission
        .photos
        .iter()
        .filter(|photo| photo.status == PhotoStatus::Uploaded)
        .count()
}

pub fn short_id(local_id: &LocalId) -> String {
    local_id.to_string().chars().take(SHORT_ID_LEN).collect()
}

pub fn format_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else {
        format!("{}w ago", diff / week)
    }
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn path_display(path: &Path) -> String {
    path.display().to_string()
}

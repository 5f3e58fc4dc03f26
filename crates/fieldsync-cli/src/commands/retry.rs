use fieldsync_core::SubmissionStatus;

use crate::commands::common::{normalize_submission_identifier, resolve_submission, CliContext};
use crate::error::CliError;

pub async fn run_retry(id: &str, context: &CliContext) -> Result<(), CliError> {
    let query = normalize_submission_identifier(id)?;
    let engine = context.engine().await?;
    let submission = resolve_submission(&query, engine.store()).await?;

    let status = engine.retry_sync_item(&submission.local_id).await?;
    if status == SubmissionStatus::Synced {
        println!("{}  synced", submission.local_id);
        return Ok(());
    }

    let refreshed = engine.store().require(&submission.local_id).await?;
    println!(
        "{}  {status}: {}",
        submission.local_id,
        refreshed.last_error.as_deref().unwrap_or("unknown error")
    );
    Ok(())
}

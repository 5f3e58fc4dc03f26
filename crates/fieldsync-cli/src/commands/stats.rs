use fieldsync_core::models::{LastSyncRecord, SyncStats};
use serde::Serialize;

use crate::commands::common::{format_timestamp, path_display, print_json, CliContext};
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct StatsReport {
    pub queue: SyncStats,
    pub last_sync: Option<LastSyncRecord>,
}

pub async fn run_stats(as_json: bool, context: &CliContext) -> Result<(), CliError> {
    let store = context.open_store()?;
    let report = StatsReport {
        queue: store.stats().await?,
        last_sync: store.last_sync_run().await?,
    };

    if as_json {
        return print_json(&report);
    }

    for line in format_stats_lines(&report) {
        println!("{line}");
    }
    println!("Queue file: {}", path_display(&context.db_path));
    Ok(())
}

pub fn format_stats_lines(report: &StatsReport) -> Vec<String> {
    let queue = &report.queue;
    let mut lines = vec![
        format!("Total:    {}", queue.total),
        format!("Pending:  {}", queue.pending),
        format!("Syncing:  {}", queue.syncing),
        format!("Synced:   {}", queue.synced),
        format!("Failed:   {}", queue.failed),
    ];

    match &report.last_sync {
        Some(record) => {
            let interrupted = if record.interrupted { " (interrupted)" } else { "" };
            lines.push(format!(
                "Last sync: {}  {} succeeded, {} failed{interrupted}",
                format_timestamp(record.completed_at),
                record.succeeded,
                record.failed
            ));
        }
        None => lines.push("Last sync: never".to_string()),
    }
    lines
}

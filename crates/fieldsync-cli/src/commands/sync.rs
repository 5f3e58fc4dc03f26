use fieldsync_core::SyncEvent;
use tokio::sync::broadcast::{self, error::TryRecvError};

use crate::commands::common::{short_id, CliContext};
use crate::error::CliError;

pub async fn run_sync(context: &CliContext) -> Result<(), CliError> {
    let engine = context.engine().await?;
    let mut events = engine.subscribe();

    let summary = engine.sync_all().await?;

    for line in failure_lines(&mut events) {
        eprintln!("{line}");
    }

    println!("Sync completed: {summary}");
    Ok(())
}

/// Drain buffered events into per-item failure lines.
pub fn failure_lines(events: &mut broadcast::Receiver<SyncEvent>) -> Vec<String> {
    let mut lines = Vec::new();
    loop {
        match events.try_recv() {
            Ok(SyncEvent::ItemFailed {
                local_id,
                error,
                retryable,
            }) => {
                let hint = if retryable { "" } else { " [needs review]" };
                lines.push(format!("{}  {error}{hint}", short_id(&local_id)));
            }
            Ok(_) => {}
            Err(TryRecvError::Lagged(skipped)) => {
                lines.push(format!(
                    "({skipped} sync events were dropped; run `fieldsync list` for details)"
                ));
            }
            Err(TryRecvError::Empty | TryRecvError::Closed) => break,
        }
    }
    lines
}

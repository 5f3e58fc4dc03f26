use std::sync::Arc;

use fieldsync_core::connectivity::reachability_channel;
use fieldsync_core::{ConnectivityMonitor, HttpReachabilityProbe, SyncEvent};
use tokio::sync::broadcast::error::RecvError;

use crate::commands::common::{short_id, CliContext};
use crate::error::CliError;

/// Drain the queue whenever the API becomes reachable, until Ctrl-C.
pub async fn run_watch(context: &CliContext) -> Result<(), CliError> {
    let base_url = context
        .config
        .api_base_url()?
        .ok_or(CliError::SyncNotConfigured)?;
    let engine = Arc::new(context.engine().await?);
    let connectivity = context.config.connectivity.clone();

    let (sender, receiver) = reachability_channel();
    let probe = HttpReachabilityProbe::new(&base_url, connectivity.probe_interval())?.spawn(sender);
    let monitor = ConnectivityMonitor::new(Arc::clone(&engine), connectivity).spawn(receiver);

    let mut events = engine.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Dropped sync events");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    println!("Watching {base_url} (Ctrl-C to stop)");
    tokio::signal::ctrl_c().await?;

    // Dropping the probe's sender ends the monitor once any in-flight item finishes
    engine.stop_scheduling();
    probe.abort();
    if let Err(error) = monitor.await {
        tracing::warn!(%error, "Connectivity monitor ended abnormally");
    }
    printer.abort();
    println!("Stopped");
    Ok(())
}

fn print_event(event: &SyncEvent) {
    match event {
        SyncEvent::ItemSynced { local_id } => println!("{}  synced", short_id(local_id)),
        SyncEvent::ItemFailed {
            local_id,
            error,
            retryable,
        } => {
            let hint = if *retryable { "" } else { " [needs review]" };
            println!("{}  failed: {error}{hint}", short_id(local_id));
        }
        SyncEvent::CycleCompleted(summary) => println!("Sync cycle: {summary}"),
    }
}

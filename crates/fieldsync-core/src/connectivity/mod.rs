//! Network reachability tracking and connectivity-triggered drains.
//!
//! The host platform (or [`HttpReachabilityProbe`]) publishes
//! [`Reachability`] into a `watch` channel. [`ConnectivityMonitor`] waits
//! for the signal to stay online for the configured window before asking the
//! engine to drain, so a flapping link does not start a burst of cycles.

mod probe;

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::ConnectivityConfig;
use crate::error::Error;
use crate::sync::SyncEngine;

pub use probe::HttpReachabilityProbe;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Reachability {
    Online,
    #[default]
    Offline,
}

impl Reachability {
    pub const fn is_online(self) -> bool {
        matches!(self, Self::Online)
    }
}

/// Channel for reachability updates, starting offline.
pub fn reachability_channel() -> (watch::Sender<Reachability>, watch::Receiver<Reachability>) {
    watch::channel(Reachability::Offline)
}

/// Publish a reachability value, waking receivers only when it changed.
pub fn publish(sender: &watch::Sender<Reachability>, value: Reachability) -> bool {
    sender.send_if_modified(|current| {
        if *current == value {
            false
        } else {
            *current = value;
            true
        }
    })
}

/// Starts queue drains when the network comes back.
pub struct ConnectivityMonitor {
    engine: Arc<SyncEngine>,
    config: ConnectivityConfig,
}

impl ConnectivityMonitor {
    pub const fn new(engine: Arc<SyncEngine>, config: ConnectivityConfig) -> Self {
        Self { engine, config }
    }

    /// Run the monitor on the current runtime until the sender is dropped.
    pub fn spawn(self, reachability: watch::Receiver<Reachability>) -> JoinHandle<()> {
        tokio::spawn(self.run(reachability))
    }

    pub async fn run(self, mut reachability: watch::Receiver<Reachability>) {
        let mut confirmed_online = false;

        loop {
            let current = *reachability.borrow_and_update();

            if current.is_online() && !confirmed_online {
                match self.wait_until_stable(&mut reachability).await {
                    Some(true) => {
                        confirmed_online = true;
                        tracing::info!("Network stable, starting sync");
                        self.trigger("reconnected").await;
                    }
                    Some(false) => {
                        tracing::debug!("Reachability changed during stable window");
                    }
                    None => break,
                }
                continue;
            }

            if !current.is_online() && confirmed_online {
                tracing::info!("Network lost");
                confirmed_online = false;
            }

            let retry_interval = self.config.retry_interval().filter(|_| confirmed_online);
            let closed = if let Some(interval) = retry_interval {
                tokio::select! {
                    changed = reachability.changed() => changed.is_err(),
                    () = tokio::time::sleep(interval) => {
                        self.trigger("retry timer").await;
                        false
                    }
                }
            } else {
                reachability.changed().await.is_err()
            };

            if closed {
                break;
            }
        }

        tracing::debug!("Reachability channel closed, connectivity monitor stopping");
    }

    /// `Some(true)` once the window passes without a change, `Some(false)`
    /// if the signal changed first, `None` if the channel closed.
    async fn wait_until_stable(
        &self,
        reachability: &mut watch::Receiver<Reachability>,
    ) -> Option<bool> {
        tokio::select! {
            () = tokio::time::sleep(self.config.stable_window()) => Some(true),
            changed = reachability.changed() => changed.ok().map(|()| false),
        }
    }

    async fn trigger(&self, reason: &'static str) {
        if self.engine.is_stop_requested() {
            tracing::debug!(reason, "Scheduling paused, not starting sync");
            return;
        }
        if self.engine.is_draining() {
            tracing::debug!(reason, "Sync already running");
            return;
        }

        match self.engine.sync_all().await {
            Ok(summary) => tracing::info!(reason, "Automatic sync finished: {summary}"),
            Err(Error::SyncInProgress) => tracing::debug!(reason, "Sync already running"),
            Err(error) => tracing::warn!(reason, %error, "Automatic sync failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::config::SyncPolicy;
    use crate::models::{LocalId, PhotoRef, SubmissionPayload};
    use crate::services::QueueStore;
    use crate::upload::{CreatedRecord, UploadClient, UploadResult, UploadedPhoto};

    #[derive(Default)]
    struct CountingClient {
        creates: AtomicUsize,
    }

    impl CountingClient {
        fn creates(&self) -> usize {
            self.creates.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl UploadClient for CountingClient {
        async fn create_record(
            &self,
            _local_id: &LocalId,
            _payload: &SubmissionPayload,
        ) -> UploadResult<CreatedRecord> {
            let number = self.creates.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(CreatedRecord {
                server_id: format!("srv-{number}"),
                record_number: None,
            })
        }

        async fn upload_photo(
            &self,
            server_id: &str,
            photo: &PhotoRef,
        ) -> UploadResult<UploadedPhoto> {
            Ok(UploadedPhoto {
                remote_url: format!("https://cdn.test/{server_id}/{photo}"),
            })
        }
    }

    async fn setup() -> (Arc<SyncEngine>, Arc<CountingClient>) {
        let client = Arc::new(CountingClient::default());
        let store = QueueStore::open_in_memory().unwrap();
        let engine = SyncEngine::start(store, client.clone(), SyncPolicy::default())
            .await
            .unwrap();
        (Arc::new(engine), client)
    }

    async fn enqueue(engine: &SyncEngine, rego: &str) {
        engine
            .enqueue(SubmissionPayload::new(rego, "P01", "Main St"), Vec::new())
            .await
            .unwrap();
    }

    fn config(retry_interval_ms: u64) -> ConnectivityConfig {
        ConnectivityConfig {
            stable_window_ms: 2_000,
            probe_interval_ms: 10_000,
            retry_interval_ms,
        }
    }

    async fn advance(millis: u64) {
        tokio::time::sleep(Duration::from_millis(millis)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn stable_online_signal_triggers_drain() {
        let (engine, client) = setup().await;
        enqueue(&engine, "ABC123").await;

        let (tx, rx) = reachability_channel();
        let handle = ConnectivityMonitor::new(Arc::clone(&engine), config(0)).spawn(rx);

        assert!(publish(&tx, Reachability::Online));
        advance(1_000).await;
        assert_eq!(client.creates(), 0);

        advance(1_500).await;
        assert_eq!(client.creates(), 1);

        drop(tx);
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn flapping_signal_is_ignored() {
        let (engine, client) = setup().await;
        enqueue(&engine, "ABC123").await;

        let (tx, rx) = reachability_channel();
        let handle = ConnectivityMonitor::new(Arc::clone(&engine), config(0)).spawn(rx);

        for _ in 0..3 {
            publish(&tx, Reachability::Online);
            advance(1_000).await;
            publish(&tx, Reachability::Offline);
            advance(3_000).await;
        }
        assert_eq!(client.creates(), 0);

        publish(&tx, Reachability::Online);
        advance(2_500).await;
        assert_eq!(client.creates(), 1);

        drop(tx);
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn retry_timer_drains_while_online() {
        let (engine, client) = setup().await;

        let (tx, rx) = reachability_channel();
        let handle = ConnectivityMonitor::new(Arc::clone(&engine), config(10_000)).spawn(rx);

        publish(&tx, Reachability::Online);
        advance(3_000).await;
        enqueue(&engine, "ABC123").await;
        assert_eq!(client.creates(), 0);

        advance(9_500).await;
        assert_eq!(client.creates(), 1);

        drop(tx);
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn paused_scheduling_skips_drain() {
        let (engine, client) = setup().await;
        enqueue(&engine, "ABC123").await;
        engine.stop_scheduling();

        let (tx, rx) = reachability_channel();
        let handle = ConnectivityMonitor::new(Arc::clone(&engine), config(0)).spawn(rx);

        publish(&tx, Reachability::Online);
        advance(5_000).await;
        assert_eq!(client.creates(), 0);
        assert!(engine.get_last_sync_status().await.unwrap().is_none());

        drop(tx);
        handle.await.unwrap();
    }

    #[test]
    fn publish_only_notifies_on_change() {
        let (tx, mut rx) = reachability_channel();
        assert!(!publish(&tx, Reachability::Offline));
        assert!(!rx.has_changed().unwrap());

        assert!(publish(&tx, Reachability::Online));
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), Reachability::Online);
    }
}

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, OnceLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use tokio::sync::Notify;

use super::*;
use crate::config::MAX_PHOTO_CONCURRENCY;
use crate::models::PhotoStatus;
use crate::upload::{UploadResult, UploadedPhoto};

/// Upload client with per-registration and per-photo failure scripts.
#[derive(Default)]
struct ScriptedClient {
    create_failures: StdMutex<HashMap<String, VecDeque<UploadError>>>,
    photo_failures: StdMutex<HashMap<String, VecDeque<UploadError>>>,
    create_calls: StdMutex<Vec<String>>,
    photo_calls: StdMutex<Vec<String>>,
    next_server_id: AtomicUsize,
    photo_delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedClient {
    fn with_photo_delay(delay: Duration) -> Self {
        Self {
            photo_delay: Some(delay),
            ..Self::default()
        }
    }

    fn fail_create(&self, rego: &str, error: UploadError) {
        self.create_failures
            .lock()
            .unwrap()
            .entry(rego.to_string())
            .or_default()
            .push_back(error);
    }

    fn fail_photo(&self, asset: &str, error: UploadError) {
        self.photo_failures
            .lock()
            .unwrap()
            .entry(asset.to_string())
            .or_default()
            .push_back(error);
    }

    fn create_calls(&self) -> Vec<String> {
        self.create_calls.lock().unwrap().clone()
    }

    fn photo_calls(&self) -> Vec<String> {
        self.photo_calls.lock().unwrap().clone()
    }

    fn photo_call_count(&self, asset: &str) -> usize {
        self.photo_calls()
            .iter()
            .filter(|call| call.as_str() == asset)
            .count()
    }

    fn total_calls(&self) -> usize {
        self.create_calls().len() + self.photo_calls().len()
    }
}

#[async_trait]
impl UploadClient for ScriptedClient {
    async fn create_record(
        &self,
        _local_id: &LocalId,
        payload: &SubmissionPayload,
    ) -> UploadResult<CreatedRecord> {
        let rego = payload.vehicle_registration.clone();
        self.create_calls.lock().unwrap().push(rego.clone());

        let scripted = self
            .create_failures
            .lock()
            .unwrap()
            .get_mut(&rego)
            .and_then(VecDeque::pop_front);
        if let Some(error) = scripted {
            return Err(error);
        }

        let number = self.next_server_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(CreatedRecord {
            server_id: format!("srv-{number}"),
            record_number: Some(format!("INF-{number:04}")),
        })
    }

    async fn upload_photo(&self, server_id: &str, photo: &PhotoRef) -> UploadResult<UploadedPhoto> {
        let asset = photo.as_str().to_string();
        self.photo_calls.lock().unwrap().push(asset.clone());

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        if let Some(delay) = self.photo_delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let scripted = self
            .photo_failures
            .lock()
            .unwrap()
            .get_mut(&asset)
            .and_then(VecDeque::pop_front);
        if let Some(error) = scripted {
            return Err(error);
        }

        Ok(UploadedPhoto {
            remote_url: format!("https://cdn.test/{server_id}/{asset}"),
        })
    }
}

/// Client whose create call parks until released.
#[derive(Default)]
struct BlockingClient {
    started: Notify,
    release: Notify,
}

#[async_trait]
impl UploadClient for BlockingClient {
    async fn create_record(
        &self,
        _local_id: &LocalId,
        _payload: &SubmissionPayload,
    ) -> UploadResult<CreatedRecord> {
        self.started.notify_one();
        self.release.notified().await;
        Ok(CreatedRecord {
            server_id: "srv-blocked".to_string(),
            record_number: None,
        })
    }

    async fn upload_photo(&self, _server_id: &str, _photo: &PhotoRef) -> UploadResult<UploadedPhoto> {
        Err(UploadError::Asset("unexpected photo".to_string()))
    }
}

/// Client that asks the engine to stop scheduling during its first create.
#[derive(Default)]
struct StoppingClient {
    engine: OnceLock<Weak<SyncEngine>>,
    creates: AtomicUsize,
}

#[async_trait]
impl UploadClient for StoppingClient {
    async fn create_record(
        &self,
        _local_id: &LocalId,
        _payload: &SubmissionPayload,
    ) -> UploadResult<CreatedRecord> {
        let number = self.creates.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(engine) = self.engine.get().and_then(Weak::upgrade) {
            engine.stop_scheduling();
        }
        Ok(CreatedRecord {
            server_id: format!("srv-{number}"),
            record_number: None,
        })
    }

    async fn upload_photo(&self, _server_id: &str, _photo: &PhotoRef) -> UploadResult<UploadedPhoto> {
        Err(UploadError::Asset("unexpected photo".to_string()))
    }
}

/// Client that deletes the submission during the first photo upload while
/// the others are still in flight.
#[derive(Default)]
struct RemovingClient {
    store: OnceLock<QueueStore>,
    target: OnceLock<LocalId>,
    completed: AtomicUsize,
}

#[async_trait]
impl UploadClient for RemovingClient {
    async fn create_record(
        &self,
        _local_id: &LocalId,
        _payload: &SubmissionPayload,
    ) -> UploadResult<CreatedRecord> {
        Ok(CreatedRecord {
            server_id: "srv-removed".to_string(),
            record_number: None,
        })
    }

    async fn upload_photo(&self, server_id: &str, photo: &PhotoRef) -> UploadResult<UploadedPhoto> {
        if photo.as_str() == "a.jpg" {
            if let (Some(store), Some(id)) = (self.store.get(), self.target.get()) {
                store.remove(id).await.unwrap();
            }
        } else {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(UploadedPhoto {
            remote_url: format!("https://cdn.test/{server_id}/{photo}"),
        })
    }
}

fn test_policy() -> SyncPolicy {
    SyncPolicy {
        inline_retry_delay_ms: 0,
        ..SyncPolicy::default()
    }
}

fn no_inline_retries() -> SyncPolicy {
    SyncPolicy {
        inline_retries: 0,
        ..test_policy()
    }
}

fn payload(rego: &str) -> SubmissionPayload {
    SubmissionPayload::new(rego, "P01", "12 Main St")
}

fn photos(refs: &[&str]) -> Vec<PhotoRef> {
    refs.iter().map(|r| PhotoRef::new(*r).unwrap()).collect()
}

fn network(message: &str) -> UploadError {
    UploadError::Network(message.to_string())
}

async fn engine_with<C>(client: &Arc<C>, policy: SyncPolicy) -> SyncEngine
where
    C: UploadClient + 'static,
{
    let store = QueueStore::open_in_memory().unwrap();
    SyncEngine::start(store, client.clone(), policy).await.unwrap()
}

async fn find(engine: &SyncEngine, id: &LocalId) -> QueuedSubmission {
    engine.store().require(id).await.unwrap()
}

#[tokio::test]
async fn enqueue_is_pending_without_server_id() {
    let client = Arc::new(ScriptedClient::default());
    let engine = engine_with(&client, test_policy()).await;

    let id = engine.enqueue(payload("abc123"), Vec::new()).await.unwrap();
    let listed = engine.list().await.unwrap();

    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].local_id, id);
    assert_eq!(listed[0].status, SubmissionStatus::Pending);
    assert_eq!(listed[0].attempts, 0);
    assert_eq!(listed[0].server_id, None);
    assert_eq!(client.total_calls(), 0);
}

#[tokio::test]
async fn drain_retries_transient_failure_within_cycle() {
    let client = Arc::new(ScriptedClient::default());
    let engine = engine_with(&client, test_policy()).await;

    let abc = engine.enqueue(payload("ABC123"), Vec::new()).await.unwrap();
    let def = engine.enqueue(payload("DEF456"), Vec::new()).await.unwrap();
    let ghi = engine.enqueue(payload("GHI789"), Vec::new()).await.unwrap();
    client.fail_create("DEF456", network("HTTP 500"));

    let summary = engine.sync_all().await.unwrap();

    assert_eq!(
        summary,
        SyncSummary {
            success: 3,
            failed: 0,
            interrupted: false,
        }
    );
    assert_eq!(
        client.create_calls(),
        vec!["ABC123", "DEF456", "DEF456", "GHI789"]
    );
    assert_eq!(find(&engine, &def).await.attempts, 2);
    assert_eq!(find(&engine, &abc).await.attempts, 1);

    // Server ids follow creation order
    assert_eq!(find(&engine, &abc).await.server_id.as_deref(), Some("srv-1"));
    assert_eq!(find(&engine, &def).await.server_id.as_deref(), Some("srv-2"));
    assert_eq!(find(&engine, &ghi).await.server_id.as_deref(), Some("srv-3"));

    let stats = engine.get_sync_queue_stats().await.unwrap();
    assert_eq!(stats.synced, 3);
    assert_eq!(stats.failed, 0);
}

#[tokio::test]
async fn second_drain_after_success_makes_no_calls() {
    let client = Arc::new(ScriptedClient::default());
    let engine = engine_with(&client, test_policy()).await;
    engine
        .enqueue(payload("ABC123"), photos(&["a.jpg"]))
        .await
        .unwrap();

    engine.sync_all().await.unwrap();
    let calls = client.total_calls();

    let summary = engine.sync_all().await.unwrap();
    assert_eq!(summary, SyncSummary::default());
    assert_eq!(client.total_calls(), calls);
}

#[tokio::test]
async fn retry_resumes_at_failed_photo() {
    let client = Arc::new(ScriptedClient::default());
    let engine = engine_with(&client, no_inline_retries()).await;
    let id = engine
        .enqueue(payload("ABC123"), photos(&["a.jpg", "b.jpg"]))
        .await
        .unwrap();
    client.fail_photo("b.jpg", network("HTTP 503"));

    let summary = engine.sync_all().await.unwrap();
    assert_eq!(summary.failed, 1);

    let failed = find(&engine, &id).await;
    assert_eq!(failed.status, SubmissionStatus::Failed);
    assert_eq!(failed.server_id.as_deref(), Some("srv-1"));
    assert_eq!(failed.photos[0].status, PhotoStatus::Uploaded);
    assert_eq!(failed.photos[1].status, PhotoStatus::Failed);
    assert!(failed.retryable);
    assert!(failed.last_error.unwrap().contains("photo 1"));

    let status = engine.retry_sync_item(&id).await.unwrap();
    assert_eq!(status, SubmissionStatus::Synced);

    assert_eq!(client.create_calls().len(), 1);
    assert_eq!(client.photo_call_count("a.jpg"), 1);
    assert_eq!(client.photo_call_count("b.jpg"), 2);

    let synced = find(&engine, &id).await;
    assert_eq!(synced.server_id.as_deref(), Some("srv-1"));
    assert!(synced.synced_at.is_some());
    assert!(synced
        .photos
        .iter()
        .all(|photo| photo.status == PhotoStatus::Uploaded));
}

#[tokio::test]
async fn retry_synced_item_is_rejected_without_mutation() {
    let client = Arc::new(ScriptedClient::default());
    let engine = engine_with(&client, test_policy()).await;
    let id = engine.enqueue(payload("ABC123"), Vec::new()).await.unwrap();
    engine.sync_all().await.unwrap();

    let before = find(&engine, &id).await;
    let result = engine.retry_sync_item(&id).await;

    assert!(matches!(result, Err(Error::AlreadySynced(_))));
    assert_eq!(find(&engine, &id).await, before);
    assert_eq!(client.create_calls().len(), 1);
}

#[tokio::test]
async fn retry_unknown_item_is_not_found() {
    let client = Arc::new(ScriptedClient::default());
    let engine = engine_with(&client, test_policy()).await;

    let result = engine.retry_sync_item(&LocalId::new()).await;
    assert!(matches!(result, Err(Error::NotFound(_))));
}

#[tokio::test]
async fn permanent_failure_waits_for_manual_retry() {
    let client = Arc::new(ScriptedClient::default());
    let engine = engine_with(&client, test_policy()).await;
    let id = engine.enqueue(payload("ABC123"), Vec::new()).await.unwrap();
    client.fail_create(
        "ABC123",
        UploadError::Rejected("unknown offence code (HTTP 422)".to_string()),
    );

    let summary = engine.sync_all().await.unwrap();
    assert_eq!(summary.failed, 1);

    let failed = find(&engine, &id).await;
    assert_eq!(failed.status, SubmissionStatus::Failed);
    assert!(!failed.retryable);
    assert_eq!(failed.attempts, 1);
    assert_eq!(
        failed.last_error.as_deref(),
        Some("rejected by server: unknown offence code (HTTP 422)")
    );

    // No inline retry and no automatic retry on later drains
    engine.sync_all().await.unwrap();
    assert_eq!(client.create_calls().len(), 1);

    assert_eq!(
        engine.retry_sync_item(&id).await.unwrap(),
        SubmissionStatus::Synced
    );
    assert_eq!(client.create_calls().len(), 2);
}

#[tokio::test]
async fn backoff_defers_automatic_retry() {
    let client = Arc::new(ScriptedClient::default());
    let engine = engine_with(&client, no_inline_retries()).await;
    let id = engine.enqueue(payload("ABC123"), Vec::new()).await.unwrap();
    client.fail_create("ABC123", network("connection reset"));

    let before = now_millis();
    engine.sync_all().await.unwrap();

    let failed = find(&engine, &id).await;
    let next_attempt_at = failed.next_attempt_at.unwrap();
    assert!(failed.retryable);
    // base * 2^1 after the first attempt
    assert!(next_attempt_at >= before + 10_000);

    let summary = engine.sync_all().await.unwrap();
    assert_eq!(summary, SyncSummary::default());
    assert_eq!(client.create_calls().len(), 1);

    // Manual retry ignores the delay
    assert_eq!(
        engine.retry_sync_item(&id).await.unwrap(),
        SubmissionStatus::Synced
    );
    assert_eq!(find(&engine, &id).await.attempts, 2);
}

#[tokio::test]
async fn attempt_cap_stops_automatic_retries() {
    let client = Arc::new(ScriptedClient::default());
    let policy = SyncPolicy {
        backoff_base_ms: 0,
        max_attempts: 2,
        ..no_inline_retries()
    };
    let engine = engine_with(&client, policy).await;
    let id = engine.enqueue(payload("ABC123"), Vec::new()).await.unwrap();
    for _ in 0..5 {
        client.fail_create("ABC123", network("HTTP 502"));
    }

    engine.sync_all().await.unwrap();
    engine.sync_all().await.unwrap();
    engine.sync_all().await.unwrap();

    let failed = find(&engine, &id).await;
    assert_eq!(failed.attempts, 2);
    assert!(failed.retryable);
    assert_eq!(client.create_calls().len(), 2);
}

#[tokio::test]
async fn inline_retries_respect_attempt_cap() {
    let client = Arc::new(ScriptedClient::default());
    let policy = SyncPolicy {
        max_attempts: 1,
        inline_retries: 3,
        ..test_policy()
    };
    let engine = engine_with(&client, policy).await;
    let id = engine.enqueue(payload("ABC123"), Vec::new()).await.unwrap();
    client.fail_create("ABC123", network("HTTP 500"));

    engine.sync_all().await.unwrap();
    assert_eq!(find(&engine, &id).await.attempts, 1);
}

#[tokio::test]
async fn conflict_with_matching_key_counts_as_created() {
    let client = Arc::new(ScriptedClient::default());
    let engine = engine_with(&client, test_policy()).await;
    let id = engine.enqueue(payload("ABC123"), Vec::new()).await.unwrap();
    client.fail_create(
        "ABC123",
        UploadError::Conflict {
            server_id: "srv-77".to_string(),
            record_number: Some("INF-0077".to_string()),
            idempotency_key: Some(id.as_str()),
        },
    );

    let summary = engine.sync_all().await.unwrap();
    assert_eq!(summary.success, 1);

    let synced = find(&engine, &id).await;
    assert_eq!(synced.status, SubmissionStatus::Synced);
    assert_eq!(synced.server_id.as_deref(), Some("srv-77"));
    assert_eq!(synced.record_number.as_deref(), Some("INF-0077"));
}

#[tokio::test]
async fn conflict_with_foreign_key_is_permanent() {
    let client = Arc::new(ScriptedClient::default());
    let engine = engine_with(&client, test_policy()).await;
    let id = engine.enqueue(payload("ABC123"), Vec::new()).await.unwrap();
    client.fail_create(
        "ABC123",
        UploadError::Conflict {
            server_id: "srv-9".to_string(),
            record_number: None,
            idempotency_key: Some("another-device".to_string()),
        },
    );

    let summary = engine.sync_all().await.unwrap();
    assert_eq!(summary.failed, 1);

    let failed = find(&engine, &id).await;
    assert!(!failed.retryable);
    assert_eq!(failed.server_id, None);
    assert!(failed.last_error.unwrap().contains("duplicate submission"));
}

#[tokio::test]
async fn conflict_without_reported_key_is_permanent() {
    let client = Arc::new(ScriptedClient::default());
    let engine = engine_with(&client, test_policy()).await;
    let id = engine
        .enqueue(payload("ABC123"), photos(&["a.jpg"]))
        .await
        .unwrap();
    client.fail_create(
        "ABC123",
        UploadError::Conflict {
            server_id: "srv-other-device".to_string(),
            record_number: None,
            idempotency_key: None,
        },
    );

    let summary = engine.sync_all().await.unwrap();
    assert_eq!(summary.failed, 1);

    let failed = find(&engine, &id).await;
    assert_eq!(failed.status, SubmissionStatus::Failed);
    assert!(!failed.retryable);
    assert_eq!(failed.server_id, None);
    assert!(client.photo_calls().is_empty());
}

#[tokio::test]
async fn watchdog_recovers_stale_syncing_without_network() {
    let store = QueueStore::open_in_memory().unwrap();
    let stale = store.enqueue(payload("ABC123"), Vec::new()).await.unwrap();
    let fresh = store.enqueue(payload("DEF456"), Vec::new()).await.unwrap();
    let now = now_millis();
    store.begin_attempt(&stale, now - 10 * 60 * 1_000).await.unwrap();
    store.begin_attempt(&fresh, now).await.unwrap();

    let client = Arc::new(ScriptedClient::default());
    let engine = SyncEngine::start(store, client.clone(), test_policy())
        .await
        .unwrap();

    let recovered = find(&engine, &stale).await;
    assert_eq!(recovered.status, SubmissionStatus::Failed);
    assert!(recovered.retryable);
    assert!(recovered.last_error.unwrap().contains("interrupted"));
    assert_eq!(find(&engine, &fresh).await.status, SubmissionStatus::Syncing);
    assert_eq!(client.total_calls(), 0);
}

#[tokio::test]
async fn stop_signal_takes_effect_before_next_item() {
    let client = Arc::new(StoppingClient::default());
    let engine = Arc::new(engine_with(&client, test_policy()).await);
    client.engine.set(Arc::downgrade(&engine)).unwrap();

    let first = engine.enqueue(payload("ABC123"), Vec::new()).await.unwrap();
    let second = engine.enqueue(payload("DEF456"), Vec::new()).await.unwrap();
    engine.enqueue(payload("GHI789"), Vec::new()).await.unwrap();

    let summary = engine.sync_all().await.unwrap();
    assert_eq!(
        summary,
        SyncSummary {
            success: 1,
            failed: 0,
            interrupted: true,
        }
    );
    assert_eq!(find(&engine, &first).await.status, SubmissionStatus::Synced);
    assert_eq!(find(&engine, &second).await.status, SubmissionStatus::Pending);
    assert!(engine.get_last_sync_status().await.unwrap().unwrap().interrupted);

    engine.resume_scheduling();
    assert!(!engine.is_stop_requested());
    let summary = engine.sync_all().await.unwrap();
    assert_eq!(summary.success, 1);
    assert!(summary.interrupted);
}

#[tokio::test]
async fn concurrent_drain_is_rejected() {
    let client = Arc::new(BlockingClient::default());
    let engine = Arc::new(engine_with(&client, test_policy()).await);
    engine.enqueue(payload("ABC123"), Vec::new()).await.unwrap();

    let runner = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.sync_all().await })
    };
    client.started.notified().await;

    assert!(engine.is_draining());
    assert!(matches!(engine.sync_all().await, Err(Error::SyncInProgress)));

    client.release.notify_one();
    let summary = runner.await.unwrap().unwrap();
    assert_eq!(summary.success, 1);
    assert!(!engine.is_draining());
}

#[tokio::test]
async fn auto_sync_listener_sees_each_cycle_until_unsubscribed() {
    let client = Arc::new(ScriptedClient::default());
    let engine = engine_with(&client, no_inline_retries()).await;
    engine.enqueue(payload("ABC123"), Vec::new()).await.unwrap();
    engine.enqueue(payload("DEF456"), Vec::new()).await.unwrap();
    client.fail_create("DEF456", network("timeout"));

    let seen = Arc::new(StdMutex::new(Vec::new()));
    let subscription = {
        let seen = Arc::clone(&seen);
        engine.setup_auto_sync(move |summary| seen.lock().unwrap().push(*summary))
    };

    engine.sync_all().await.unwrap();
    engine.sync_all().await.unwrap();
    subscription.unsubscribe();
    subscription.unsubscribe();
    engine.sync_all().await.unwrap();

    let seen = seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 2);
    assert_eq!(
        seen[0],
        SyncSummary {
            success: 1,
            failed: 1,
            interrupted: false,
        }
    );
    assert_eq!(seen[1], SyncSummary::default());
}

#[tokio::test]
async fn subscribers_receive_item_and_cycle_events() {
    let client = Arc::new(ScriptedClient::default());
    let engine = engine_with(&client, test_policy()).await;
    let ok = engine.enqueue(payload("ABC123"), Vec::new()).await.unwrap();
    let bad = engine.enqueue(payload("DEF456"), Vec::new()).await.unwrap();
    client.fail_create("DEF456", UploadError::Rejected("bad plate".to_string()));

    let mut events = engine.subscribe();
    let summary = engine.sync_all().await.unwrap();

    assert_eq!(events.try_recv().unwrap(), SyncEvent::ItemSynced { local_id: ok });
    assert_eq!(
        events.try_recv().unwrap(),
        SyncEvent::ItemFailed {
            local_id: bad,
            error: "rejected by server: bad plate".to_string(),
            retryable: false,
        }
    );
    assert_eq!(events.try_recv().unwrap(), SyncEvent::CycleCompleted(summary));
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn stats_and_clear_synced() {
    let client = Arc::new(ScriptedClient::default());
    let engine = engine_with(&client, no_inline_retries()).await;
    assert_eq!(engine.get_last_sync_status().await.unwrap(), None);

    engine.enqueue(payload("ABC123"), Vec::new()).await.unwrap();
    let failed = engine.enqueue(payload("DEF456"), Vec::new()).await.unwrap();
    engine.enqueue(payload("GHI789"), Vec::new()).await.unwrap();
    client.fail_create("DEF456", network("HTTP 503"));

    engine.sync_all().await.unwrap();
    let pending = engine.enqueue(payload("JKL012"), Vec::new()).await.unwrap();

    let stats = engine.get_sync_queue_stats().await.unwrap();
    assert_eq!(
        stats,
        SyncStats {
            total: 4,
            pending: 1,
            syncing: 0,
            synced: 2,
            failed: 1,
        }
    );

    let last = engine.get_last_sync_status().await.unwrap().unwrap();
    assert_eq!(last.succeeded, 2);
    assert_eq!(last.failed, 1);
    assert!(!last.interrupted);
    assert!(last.completed_at >= last.started_at);

    assert_eq!(engine.clear_synced_items().await.unwrap(), 2);
    let stats = engine.get_sync_queue_stats().await.unwrap();
    assert_eq!(stats.synced, 0);
    assert_eq!(stats.pending, 1);
    assert_eq!(stats.failed, 1);

    let remaining: Vec<_> = engine
        .list()
        .await
        .unwrap()
        .into_iter()
        .map(|item| item.local_id)
        .collect();
    assert_eq!(remaining, vec![failed, pending]);
}

#[tokio::test]
async fn failed_state_survives_restart() {
    let tmp = tempfile::tempdir().unwrap();
    let db_path = tmp.path().join("queue.db");

    let id = {
        let client = Arc::new(ScriptedClient::default());
        let store = QueueStore::open_path(&db_path).unwrap();
        let engine = SyncEngine::start(store, client.clone(), no_inline_retries())
            .await
            .unwrap();
        let id = engine
            .enqueue(payload("ABC123"), photos(&["a.jpg"]))
            .await
            .unwrap();
        client.fail_photo("a.jpg", network("HTTP 504"));
        engine.sync_all().await.unwrap();
        id
    };

    let client = Arc::new(ScriptedClient::default());
    let store = QueueStore::open_path(&db_path).unwrap();
    let engine = SyncEngine::start(store, client.clone(), no_inline_retries())
        .await
        .unwrap();

    let reopened = find(&engine, &id).await;
    assert_eq!(reopened.status, SubmissionStatus::Failed);
    assert_eq!(reopened.attempts, 1);
    assert_eq!(reopened.server_id.as_deref(), Some("srv-1"));
    assert!(reopened.next_attempt_at.is_some());

    assert_eq!(
        engine.retry_sync_item(&id).await.unwrap(),
        SubmissionStatus::Synced
    );
    assert!(client.create_calls().is_empty());
    assert_eq!(client.photo_calls(), vec!["a.jpg"]);
}

#[tokio::test(start_paused = true)]
async fn photo_uploads_are_bounded() {
    let client = Arc::new(ScriptedClient::with_photo_delay(Duration::from_millis(50)));
    let engine = engine_with(&client, test_policy()).await;
    let id = engine
        .enqueue(
            payload("ABC123"),
            photos(&["1.jpg", "2.jpg", "3.jpg", "4.jpg", "5.jpg", "6.jpg"]),
        )
        .await
        .unwrap();

    engine.sync_all().await.unwrap();

    assert_eq!(find(&engine, &id).await.status, SubmissionStatus::Synced);
    assert_eq!(client.photo_calls().len(), 6);
    let max = client.max_in_flight.load(Ordering::SeqCst);
    assert!(max > 1);
    assert!(max <= MAX_PHOTO_CONCURRENCY);
}

#[tokio::test]
async fn mixed_photo_failures_are_permanent() {
    let client = Arc::new(ScriptedClient::default());
    let engine = engine_with(&client, test_policy()).await;
    let id = engine
        .enqueue(payload("ABC123"), photos(&["a.jpg", "b.jpg"]))
        .await
        .unwrap();
    client.fail_photo("a.jpg", network("HTTP 503"));
    client.fail_photo("b.jpg", UploadError::Asset("b.jpg: not found".to_string()));

    engine.sync_all().await.unwrap();

    let failed = find(&engine, &id).await;
    assert!(!failed.retryable);
    assert_eq!(failed.attempts, 1);
    let error = failed.last_error.unwrap();
    assert!(error.contains("photo 0"));
    assert!(error.contains("photo 1"));
}

#[tokio::test]
async fn spawned_drain_uploads_photos() {
    let client = Arc::new(ScriptedClient::default());
    let engine = Arc::new(engine_with(&client, test_policy()).await);
    let id = engine
        .enqueue(payload("ABC123"), photos(&["a.jpg", "b.jpg"]))
        .await
        .unwrap();

    let runner = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.sync_all().await })
    };
    let summary = runner.await.unwrap().unwrap();

    assert_eq!(summary.success, 1);
    assert_eq!(find(&engine, &id).await.status, SubmissionStatus::Synced);
    assert_eq!(client.photo_calls().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn photo_write_failure_lets_sibling_uploads_finish() {
    let client = Arc::new(RemovingClient::default());
    let engine = engine_with(&client, test_policy()).await;
    let id = engine
        .enqueue(payload("ABC123"), photos(&["a.jpg", "b.jpg", "c.jpg"]))
        .await
        .unwrap();
    client.store.set(engine.store().clone()).ok();
    client.target.set(id).ok();

    let summary = engine.sync_all().await.unwrap();

    assert_eq!(client.completed.load(Ordering::SeqCst), 3);
    assert_eq!(summary.success, 0);
    assert!(engine.store().get(&id).await.unwrap().is_none());
}

//! Sync event stream and completion listeners.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::sync::broadcast;

use crate::models::{LocalId, SyncSummary};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Events emitted by the sync engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// A submission reached `synced`.
    ItemSynced {
        local_id: LocalId,
    },
    /// An attempt ended in `failed`.
    ItemFailed {
        local_id: LocalId,
        error: String,
        retryable: bool,
    },
    /// A full-queue drain finished.
    CycleCompleted(SyncSummary),
}

type Listener = Arc<dyn Fn(&SyncSummary) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: BTreeMap<u64, Listener>,
}

pub(crate) struct EventBus {
    sender: broadcast::Sender<SyncEvent>,
    listeners: Arc<Mutex<Listeners>>,
}

impl EventBus {
    pub(crate) fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            sender,
            listeners: Arc::new(Mutex::new(Listeners::default())),
        }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    pub(crate) fn publish(&self, event: SyncEvent) {
        // No receivers is fine
        let _ = self.sender.send(event);
    }

    pub(crate) fn register<F>(&self, callback: F) -> AutoSyncSubscription
    where
        F: Fn(&SyncSummary) + Send + Sync + 'static,
    {
        let mut listeners = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let id = listeners.next_id;
        listeners.next_id += 1;
        listeners.entries.insert(id, Arc::new(callback));

        AutoSyncSubscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
            active: AtomicBool::new(true),
        }
    }

    /// Publish `CycleCompleted` and invoke every registered listener once.
    pub(crate) fn cycle_completed(&self, summary: SyncSummary) {
        self.publish(SyncEvent::CycleCompleted(summary));

        // Call outside the lock so a listener may unsubscribe itself
        let snapshot: Vec<Listener> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .values()
            .cloned()
            .collect();
        for listener in snapshot {
            listener(&summary);
        }
    }

    #[cfg(test)]
    pub(crate) fn listener_count(&self) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }
}

/// Registration returned by `SyncEngine::setup_auto_sync`.
///
/// Dropping the subscription unsubscribes it.
#[must_use = "dropping the subscription unsubscribes the listener"]
pub struct AutoSyncSubscription {
    id: u64,
    listeners: Weak<Mutex<Listeners>>,
    active: AtomicBool,
}

impl AutoSyncSubscription {
    /// Stop receiving cycle notifications. Safe to call any number of times.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(listeners) = self.listeners.upgrade() {
            listeners
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .entries
                .remove(&self.id);
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

impl Drop for AutoSyncSubscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for AutoSyncSubscription {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("AutoSyncSubscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

//! Aggregate sync status projections

use serde::{Deserialize, Serialize};
use std::fmt;

/// Queue counts by status, recomputed from a store snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    pub total: usize,
    pub pending: usize,
    pub syncing: usize,
    pub synced: usize,
    pub failed: usize,
}

/// Outcome of one drain cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSummary {
    pub success: usize,
    pub failed: usize,
    /// The stop signal ended the cycle before every due item was attempted
    pub interrupted: bool,
}

impl fmt::Display for SyncSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} succeeded, {} failed", self.success, self.failed)?;
        if self.interrupted {
            f.write_str(" (interrupted)")?;
        }
        Ok(())
    }
}

/// The most recently completed full-queue drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastSyncRecord {
    pub started_at: i64,
    pub completed_at: i64,
    pub succeeded: usize,
    pub failed: usize,
    pub interrupted: bool,
}

//! Value types backing the distributed coordination primitives.
use std::collections::BTreeSet;
use std::time::Duration;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

/// An exclusive, auto-expiring lock held for a `partition_key`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PartitionLock {
    pub partition_key: String,
    pub holder_task_id: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PartitionLock {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// A single-flight row preventing overlapping execution of `task_name[":"user_key]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionTrack {
    pub lock_key: String,
    pub holder_task_id: String,
    pub started_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ExecutionTrack {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Sliding window of admitted request timestamps for one rate-limited resource.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RateLimitWindow {
    pub resource_key: String,
    pub timestamps: BTreeSet<DateTime<Utc>>,
}

impl RateLimitWindow {
    pub fn new(resource_key: impl Into<String>) -> Self {
        RateLimitWindow {
            resource_key: resource_key.into(),
            timestamps: BTreeSet::new(),
        }
    }

    /// Drop timestamps older than `window` relative to `now`.
    pub fn prune(&mut self, now: DateTime<Utc>, window: Duration) {
        let cutoff = now - chrono::Duration::from_std(window).unwrap_or(chrono::Duration::zero());
        self.timestamps = self.timestamps.split_off(&cutoff);
    }

    pub fn oldest(&self) -> Option<DateTime<Utc>> {
        self.timestamps.iter().next().copied()
    }
}

/// A recorded revocation request for a task ID.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RevocationRecord {
    pub task_id: String,
    pub terminate: bool,
    pub signal: Option<String>,
    pub revoked_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl RevocationRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

//! [`TelemetryCache`] – last-value store for robot telemetry.
//!
//! One entry per link, holding the newest accepted
//! [`TelemetrySnapshot`]. Writes are guarded by timestamp: a snapshot that is
//! not strictly newer than the cached one is dropped and counted, so a slow
//! reply can never roll the operator's view backwards. There is no history.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use robolink_types::TelemetrySnapshot;
use uuid::Uuid;

/// Outcome of [`TelemetryCache::update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheUpdate {
    Accepted,
    /// The snapshot was not newer than the cached one and was discarded.
    Stale,
}

#[derive(Default)]
struct Entry {
    latest: Option<Arc<TelemetrySnapshot>>,
    stale_dropped: u64,
}

/// Shared, non-blocking-read store of the latest snapshot per link.
#[derive(Default)]
pub struct TelemetryCache {
    entries: RwLock<HashMap<Uuid, Entry>>,
}

impl TelemetryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `snapshot` for `link` if it is newer than what is cached.
    pub fn update(&self, link: Uuid, snapshot: Arc<TelemetrySnapshot>) -> CacheUpdate {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let entry = entries.entry(link).or_default();
        match &entry.latest {
            Some(current) if snapshot.timestamp <= current.timestamp => {
                entry.stale_dropped += 1;
                CacheUpdate::Stale
            }
            _ => {
                entry.latest = Some(snapshot);
                CacheUpdate::Accepted
            }
        }
    }

    /// Latest accepted snapshot of `link`.
    pub fn read(&self, link: Uuid) -> Option<Arc<TelemetrySnapshot>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&link)
            .and_then(|e| e.latest.clone())
    }

    /// How many snapshots of `link` were dropped as stale.
    pub fn stale_dropped(&self, link: Uuid) -> u64 {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&link)
            .map_or(0, |e| e.stale_dropped)
    }

    /// Forget everything about `link`.
    pub fn evict(&self, link: Uuid) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&link);
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|e| e.latest.is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

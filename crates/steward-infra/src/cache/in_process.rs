//! In-process short-term cache.
//!
//! A `DashMap` of JSON values with per-entry deadlines. Expired entries are
//! dropped lazily on read, and swept in bulk every [`PURGE_EVERY_WRITES`]
//! writes (or on demand via [`InProcessCache::purge_expired`]) so keys that
//! are never read again do not accumulate. Used when no Redis URL is
//! configured.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use steward_core::memory::ShortTermBackend;
use steward_types::error::RepositoryError;
use tokio::time::Instant;

/// Number of writes between expiry sweeps.
pub const PURGE_EVERY_WRITES: u64 = 256;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    /// `None` when the TTL is too large to represent; such entries never expire.
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|deadline| deadline > now)
    }
}

/// Thread-safe TTL cache. Clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct InProcessCache {
    entries: Arc<DashMap<String, CacheEntry>>,
    writes: Arc<AtomicU64>,
}

impl InProcessCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live(now));
        before - self.entries.len()
    }

    /// Number of stored entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ShortTermBackend for InProcessCache {
    async fn get(&self, key: &str) -> Result<Option<Value>, RepositoryError> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if entry.is_live(now) {
                return Ok(Some(entry.value.clone()));
            }
        }
        // Expired (or absent): remove under the shard lock only if still stale.
        self.entries.remove_if(key, |_, entry| !entry.is_live(now));
        Ok(None)
    }

    async fn set(&self, key: &str, value: &Value, ttl: Duration) -> Result<(), RepositoryError> {
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value: value.clone(),
                expires_at: Instant::now().checked_add(ttl),
            },
        );

        let writes = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        if writes % PURGE_EVERY_WRITES == 0 {
            let purged = self.purge_expired();
            if purged > 0 {
                tracing::debug!(purged, "purged expired short-term entries");
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), RepositoryError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        Ok(())
    }
}

//! The cache store and its freshness policy.

use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tokio::time::{Duration, Instant};
use tracing::debug;
use waybill_types::QueryKey;

/// Freshness policy for a cached query result.
///
/// `stale_time` controls when a served value should be revalidated in the
/// background; `cache_time` controls when it stops being served at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    /// How long a value counts as fresh.
    pub stale_time: Duration,
    /// How long a value may be served before eviction. Clamped to at least
    /// `stale_time` on write so `stale_at <= expire_at` always holds.
    pub cache_time: Duration,
}

impl CachePolicy {
    /// Creates a policy from explicit durations.
    #[must_use]
    pub const fn new(stale_time: Duration, cache_time: Duration) -> Self {
        Self {
            stale_time,
            cache_time,
        }
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            stale_time: Duration::from_secs(30),
            cache_time: Duration::from_secs(300),
        }
    }
}

/// A cached value with its freshness metadata.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The cached value.
    pub value: Value,
    /// When the entry was written.
    pub created_at: Instant,
    /// When the value stops being fresh.
    pub stale_at: Instant,
    /// When the value stops being served.
    pub expire_at: Instant,
}

/// In-memory store mapping canonical query keys to cached values.
///
/// At most one live entry exists per key at any time. Eviction is lazy:
/// an expired entry is dropped when `get` touches it, never by a
/// background sweep.
#[derive(Debug, Default)]
pub struct CacheStore {
    entries: RwLock<HashMap<QueryKey, CacheEntry>>,
}

impl CacheStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached value for a key while it is inside its expiry
    /// window. An entry at or past `expire_at` is evicted and `None` is
    /// returned.
    pub async fn get(&self, key: &QueryKey) -> Option<Value> {
        let now = Instant::now();

        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if now < entry.expire_at => return Some(entry.value.clone()),
                Some(_) => {} // expired, fall through to evict
                None => return None,
            }
        }

        let mut entries = self.entries.write().await;
        // Re-check under the write lock: another task may have rewritten
        // the entry between the two locks.
        match entries.get(key) {
            Some(entry) if now < entry.expire_at => Some(entry.value.clone()),
            Some(_) => {
                debug!(key = %key, "evicting expired cache entry");
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Stores a value under a key, overwriting any prior entry.
    pub async fn set(&self, key: QueryKey, value: Value, policy: &CachePolicy) {
        let now = Instant::now();
        let cache_time = policy.cache_time.max(policy.stale_time);
        let entry = CacheEntry {
            value,
            created_at: now,
            stale_at: now + policy.stale_time,
            expire_at: now + cache_time,
        };
        self.entries.write().await.insert(key, entry);
    }

    /// Returns true when no entry exists or the entry has passed its stale
    /// deadline. Never evicts.
    pub async fn is_stale(&self, key: &QueryKey) -> bool {
        let entries = self.entries.read().await;
        match entries.get(key) {
            Some(entry) => Instant::now() >= entry.stale_at,
            None => true,
        }
    }

    /// Marks an entry immediately stale without dropping its value, so the
    /// next reader revalidates while still seeing last-known-good data.
    /// Used by write paths that know a read is now out of date.
    pub async fn invalidate(&self, key: &QueryKey) {
        if let Some(entry) = self.entries.write().await.get_mut(key) {
            entry.stale_at = Instant::now();
            debug!(key = %key, "cache entry invalidated");
        }
    }

    /// Drops all entries. Used for test isolation and logout-style resets.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    /// Number of live entries, including stale-but-unexpired ones.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Returns true when the store holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

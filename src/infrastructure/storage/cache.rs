// In-memory response cache using DashMap
use dashmap::DashMap;
use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: Value,
    pub stored_at: Instant,
    pub ttl: Duration,
}

impl CacheEntry {
    pub fn is_fresh(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) < self.ttl
    }
}

/// Thread-safe TTL cache keyed by request cache key.
///
/// Expiry is lazy: a stale entry is only dropped when [`get_fresh`] sees it.
/// [`get_any`] deliberately ignores the TTL for the stale-under-throttle path.
///
/// [`get_fresh`]: ResponseCache::get_fresh
/// [`get_any`]: ResponseCache::get_any
#[derive(Debug, Default)]
pub struct ResponseCache {
    map: DashMap<String, CacheEntry>,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self {
            map: DashMap::new(),
        }
    }

    pub fn get_fresh(&self, key: &str) -> Option<Value> {
        let now = Instant::now();
        // remove_if re-checks under the shard lock, so a concurrent refresh survives
        if self
            .map
            .remove_if(key, |_, entry| !entry.is_fresh(now))
            .is_some()
        {
            return None;
        }
        self.map.get(key).map(|entry| entry.value.clone())
    }

    pub fn get_any(&self, key: &str) -> Option<Value> {
        self.map.get(key).map(|entry| entry.value.clone())
    }

    pub fn insert(&self, key: String, value: Value, ttl: Duration) {
        self.map.insert(
            key,
            CacheEntry {
                value,
                stored_at: Instant::now(),
                ttl,
            },
        );
    }

    /// Drop every entry whose key starts with `prefix`. Returns how many went.
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        let before = self.map.len();
        self.map.retain(|key, _| !key.starts_with(prefix));
        before.saturating_sub(self.map.len())
    }

    pub fn clear(&self) {
        self.map.clear();
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

//! Result cache for idempotent tool calls.
//!
//! An [`LruCache`] bounded by `max_entries` with a per-entry TTL. Expired
//! entries are dropped lazily when they are looked up;
//! [`CacheManager::purge_expired`] exists for the periodic maintenance sweep.
//! `push` evicts the least recently used entry before the cap is exceeded.

mod key;

pub use key::{cache_key, canonical_json};

use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use lru::LruCache;
use serde_json::Value;
use tracing::debug;

use crate::clock::SharedClock;
use crate::error::ServeError;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    inserted_at: Instant,
    ttl: Duration,
    last_accessed_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now > self.inserted_at + self.ttl
    }
}

pub struct CacheManager {
    entries: Mutex<LruCache<String, CacheEntry>>,
    default_ttl: Duration,
    clock: SharedClock,
}

impl CacheManager {
    /// `max_entries` of zero is rejected by config validation; it is treated as one here.
    pub fn new(max_entries: usize, default_ttl: Duration, clock: SharedClock) -> Self {
        let capacity = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            default_ttl,
            clock,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, LruCache<String, CacheEntry>>, ServeError> {
        self.entries
            .lock()
            .map_err(|_| ServeError::CacheUnavailable("cache lock poisoned".to_string()))
    }

    /// Returns the cached value, or `None` on a miss or an expired entry.
    pub fn get(&self, key: &str) -> Result<Option<Value>, ServeError> {
        let now = self.clock.now();
        let mut entries = self.lock()?;

        let expired = match entries.peek(key) {
            None => return Ok(None),
            Some(entry) => entry.is_expired(now),
        };
        if expired {
            debug!("Cache entry {} expired", key);
            entries.pop(key);
            return Ok(None);
        }

        Ok(entries.get_mut(key).map(|entry| {
            entry.last_accessed_at = now;
            entry.value.clone()
        }))
    }

    /// Inserts or replaces `key`. `ttl = None` uses the configured default.
    pub fn put(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<(), ServeError> {
        let now = self.clock.now();
        let entry = CacheEntry {
            value,
            inserted_at: now,
            ttl: ttl.unwrap_or(self.default_ttl),
            last_accessed_at: now,
        };
        let mut entries = self.lock()?;

        if let Some((evicted, _)) = entries.push(key.to_string(), entry) {
            if evicted != key {
                debug!("Evicted cache entry {}", evicted);
            }
        }
        debug_assert!(entries.len() <= entries.cap().get());
        Ok(())
    }

    pub fn invalidate(&self, key: &str) -> Result<bool, ServeError> {
        Ok(self.lock()?.pop(key).is_some())
    }

    /// Drops every entry in one step; concurrent readers see all or nothing.
    pub fn invalidate_all(&self) -> Result<usize, ServeError> {
        let mut entries = self.lock()?;
        let cleared = entries.len();
        entries.clear();
        Ok(cleared)
    }

    /// Removes every expired entry. Returns how many were dropped.
    pub fn purge_expired(&self) -> Result<usize, ServeError> {
        let now = self.clock.now();
        let mut entries = self.lock()?;
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            entries.pop(key);
        }
        Ok(expired.len())
    }

    pub fn len(&self) -> usize {
        self.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.lock().map(|entries| entries.cap().get()).unwrap_or(0)
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// When `key` was last read or written, if present. Does not count as an access.
    pub fn last_accessed(&self, key: &str) -> Option<Instant> {
        self.lock()
            .ok()?
            .peek(key)
            .map(|entry| entry.last_accessed_at)
    }

    #[cfg(test)]
    pub(crate) fn poison_for_test(&self) {
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = self.entries.lock().unwrap();
            panic!("poisoning cache lock");
        }));
    }
}

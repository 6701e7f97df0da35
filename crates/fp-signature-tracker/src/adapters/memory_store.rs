//! In-memory [`ResultCacheStore`]: LRU-bounded, with per-entry TTL.

use crate::ports::outbound::ResultCacheStore;
use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::time::Duration;
use tokio::time::Instant;

/// LRU key/value store whose entries expire after their TTL.
///
/// Expiry uses the tokio clock so paused-time tests can advance it.
pub struct InMemoryResultStore {
    entries: Mutex<LruCache<String, (String, Instant)>>,
}

impl InMemoryResultStore {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl ResultCacheStore for InMemoryResultStore {
    async fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock();
        let expired = match entries.get(key) {
            Some((value, expires_at)) if *expires_at > Instant::now() => return Some(value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.pop(key);
        }
        None
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) {
        self.entries
            .lock()
            .put(key.to_string(), (value, Instant::now() + ttl));
    }
}

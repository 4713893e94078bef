//! Idempotency cache for detect requests.
//!
//! Maps `(request_id, event_fingerprint)` to the finished result list so a
//! coordinator retry never re-runs the detector. Bounded LRU, process-local;
//! restarting the worker clears it. Shared across concurrent requests
//! behind an exclusive lock.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;

use crate::wire::WireFinding;

pub type CacheKey = (String, String);

pub struct IdempotencyCache {
    inner: Mutex<LruCache<CacheKey, Arc<Vec<WireFinding>>>>,
}

impl IdempotencyCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Fetch a cached result, refreshing its recency.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<Vec<WireFinding>>> {
        self.inner.lock().get(key).cloned()
    }

    pub fn insert(&self, key: CacheKey, results: Vec<WireFinding>) {
        self.inner.lock().put(key, Arc::new(results));
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

//! Content-addressed payload cache.
//!
//! Highly repetitive log text (health checks, heartbeats, poll loops) is
//! interned here so identical payloads share one allocation. The cache is
//! bounded by entry count and evicts the least recently *accessed* entry;
//! both lookups and inserts refresh recency.

use crate::memory::MemoryReporter;
use crate::types::LogLineDat;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Snapshot of cache counters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub len: usize,
    pub capacity: usize,
    pub memory_bytes: u64,
}

impl CacheStats {
    /// Fraction of lookups served from the cache, `0.0` before any lookup.
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct Inner {
    entries: LruCache<Arc<str>, Arc<LogLineDat>>,
    hits: u64,
    misses: u64,
    memory_bytes: u64,
}

pub struct PayloadCache {
    inner: Mutex<Inner>,
}

impl PayloadCache {
    /// `max_entries` of zero is treated as one.
    pub fn new(max_entries: usize) -> Self {
        let cap = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::new(cap),
                hits: 0,
                misses: 0,
                memory_bytes: 0,
            }),
        }
    }

    /// Return the shared payload for `text`, creating and caching it on a miss.
    pub fn intern(&self, text: &str) -> Arc<LogLineDat> {
        let mut inner = self.inner.lock();

        if let Some(found) = inner.entries.get(text) {
            let found = Arc::clone(found);
            inner.hits += 1;
            return found;
        }

        inner.misses += 1;
        let payload = Arc::new(LogLineDat::new(text));
        let added = payload.memory_size();
        if let Some((_, evicted)) = inner.entries.push(payload.key(), Arc::clone(&payload)) {
            inner.memory_bytes = inner.memory_bytes.saturating_sub(evicted.memory_size());
        }
        inner.memory_bytes += added;
        payload
    }

    /// Look `text` up without inserting. Refreshes recency on a hit.
    pub fn get(&self, text: &str) -> Option<Arc<LogLineDat>> {
        self.inner.lock().entries.get(text).cloned()
    }

    pub fn contains(&self, text: &str) -> bool {
        self.inner.lock().entries.contains(text)
    }

    /// Drop every cached payload. Records already issued keep their own
    /// references and stay valid; only future deduplication suffers.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.memory_bytes = 0;
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            len: inner.entries.len(),
            capacity: inner.entries.cap().get(),
            memory_bytes: inner.memory_bytes,
        }
    }
}

impl MemoryReporter for PayloadCache {
    fn name(&self) -> &str {
        "payload-cache"
    }

    fn current_memory_bytes(&self) -> u64 {
        self.inner.lock().memory_bytes
    }

    fn free_memory(&self) {
        self.clear();
    }
}

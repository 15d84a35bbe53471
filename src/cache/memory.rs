use std::sync::Mutex;

use indexmap::IndexMap;
use polars::prelude::DataFrame;
use tracing::{debug, warn};

use crate::cache::{CacheStats, DataCache, cache_key};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

struct Inner {
    // Insertion order doubles as recency order: hits reinsert at the tail,
    // eviction pops the head.
    entries: IndexMap<String, (DataFrame, f64)>,
    size_mb: f64,
    hits: u64,
    misses: u64,
}

/// Thread-safe in-memory cache with LRU eviction, bounded by an estimated
/// size budget in megabytes.
pub struct MemoryCache {
    max_size_mb: f64,
    inner: Mutex<Inner>,
}

impl MemoryCache {
    pub fn new(max_size_mb: f64) -> Self {
        Self {
            max_size_mb,
            inner: Mutex::new(Inner {
                entries: IndexMap::new(),
                size_mb: 0.0,
                hits: 0,
                misses: 0,
            }),
        }
    }
}

impl DataCache for MemoryCache {
    fn get(
        &self,
        symbols: &[String],
        start: Option<&str>,
        end: Option<&str>,
    ) -> Option<DataFrame> {
        let key = cache_key(symbols, start, end);
        let mut inner = self.inner.lock().ok()?;

        match inner.entries.shift_remove(&key) {
            Some((frame, size)) => {
                inner.hits += 1;
                debug!(key = &key[..8], "Cache HIT");
                let result = frame.clone();
                // Reinsert at the tail: most recently used.
                inner.entries.insert(key, (frame, size));
                Some(result)
            }
            None => {
                inner.misses += 1;
                debug!(key = &key[..8], "Cache MISS");
                None
            }
        }
    }

    fn set(&self, symbols: &[String], start: Option<&str>, end: Option<&str>, data: &DataFrame) {
        let key = cache_key(symbols, start, end);
        let size_mb = data.estimated_size() as f64 / BYTES_PER_MB;

        // A single entry larger than the whole budget is rejected outright.
        if size_mb > self.max_size_mb {
            warn!(
                size_mb,
                max_size_mb = self.max_size_mb,
                "Data too large to cache"
            );
            return;
        }

        let Ok(mut inner) = self.inner.lock() else {
            return;
        };

        if let Some((_, old_size)) = inner.entries.shift_remove(&key) {
            inner.size_mb -= old_size;
        }

        // Evict least-recently-used entries until the new frame fits.
        while inner.size_mb + size_mb > self.max_size_mb && !inner.entries.is_empty() {
            if let Some((evicted_key, (_, evicted_size))) = inner.entries.shift_remove_index(0) {
                inner.size_mb -= evicted_size;
                debug!(key = &evicted_key[..8], "Evicted cache entry");
            }
        }

        inner.entries.insert(key, (data.clone(), size_mb));
        inner.size_mb += size_mb;
    }

    fn clear(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.entries.clear();
            inner.size_mb = 0.0;
            inner.hits = 0;
            inner.misses = 0;
        }
    }

    fn stats(&self) -> CacheStats {
        match self.inner.lock() {
            Ok(inner) => CacheStats {
                entries: inner.entries.len(),
                size_mb: inner.size_mb,
                max_size_mb: self.max_size_mb,
                hits: inner.hits,
                misses: inner.misses,
            },
            Err(_) => CacheStats::default(),
        }
    }
}

//! Time-boxed result cache.

use dashmap::DashMap;
use serde::Serialize;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

use crate::observability::metrics;

/// Composite key of a retrieval query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    pub query: String,
    pub document: Option<String>,
    pub results_count: u32,
}

impl QueryKey {
    pub fn new(query: impl Into<String>, document: Option<String>, results_count: u32) -> Self {
        Self {
            query: query.into(),
            document,
            results_count,
        }
    }
}

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    inserted_at: Instant,
}

/// Hit/miss counters for the admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub ttl_secs: u64,
}

/// Keyed TTL store with lazy expiry.
///
/// Entries are visible while younger than `ttl`. A stale entry stays in
/// memory until the next lookup of the same key removes it.
#[derive(Debug)]
pub struct ResultCache<V, K: Eq + Hash = QueryKey> {
    entries: DashMap<K, Entry<V>>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V, K> ResultCache<V, K>
where
    V: Clone,
    K: Eq + Hash,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let removed = self
            .entries
            .remove_if(key, |_, entry| now.duration_since(entry.inserted_at) >= self.ttl);

        let found = match removed {
            Some(_) => None,
            None => self.entries.get(key).map(|entry| entry.value.clone()),
        };

        metrics::record_cache_lookup(found.is_some());
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            if removed.is_some() {
                metrics::record_cache_size(self.entries.len());
            }
        }
        found
    }

    /// Insert or overwrite with a fresh timestamp.
    pub fn set(&self, key: K, value: V) {
        self.entries.insert(
            key,
            Entry {
                value,
                inserted_at: Instant::now(),
            },
        );
        metrics::record_cache_size(self.entries.len());
    }

    pub fn clear(&self) {
        self.entries.clear();
        metrics::record_cache_size(0);
    }

    /// Stored entries, stale ones included.
    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            ttl_secs: self.ttl.as_secs(),
        }
    }
}

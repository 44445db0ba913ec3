//! In-memory response index
//!
//! Fronts the on-disk partitions with a Moka cache so repeated lookups for the
//! same request key do not hit the filesystem.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use moka::sync::Cache;
use tracing::{debug, trace};

use super::storage::CachedResponse;
use crate::net::RequestKey;

/// Default time an indexed entry stays in memory
const DEFAULT_TTL: Duration = Duration::from_secs(600);

/// Default number of indexed entries
const DEFAULT_CAPACITY: u64 = 10_000;

type IndexKey = (String, RequestKey);

/// Response index with hit/miss accounting
pub struct ResponseIndex {
    entries: Cache<IndexKey, CachedResponse>,
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Snapshot of index counters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub entries: u64,
}

impl ResponseIndex {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_TTL, DEFAULT_CAPACITY)
    }

    /// Create an index with a custom TTL and capacity
    pub fn with_limits(ttl: Duration, capacity: u64) -> Self {
        let entries = Cache::builder()
            .time_to_live(ttl)
            .max_capacity(capacity)
            .name("response_index")
            .build();

        Self {
            entries,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up an entry, updating hit/miss counters
    pub fn get(&self, partition: &str, key: &RequestKey) -> Option<CachedResponse> {
        match self.entries.get(&(partition.to_string(), key.clone())) {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                trace!(partition = partition, key = %key, "Index HIT");
                Some(entry)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                trace!(partition = partition, key = %key, "Index MISS");
                None
            }
        }
    }

    pub fn insert(&self, entry: CachedResponse) {
        let key = (entry.partition.clone(), entry.key());
        self.entries.insert(key, entry);
    }

    pub fn invalidate(&self, partition: &str, key: &RequestKey) {
        self.entries.invalidate(&(partition.to_string(), key.clone()));
    }

    /// Drop every indexed entry
    ///
    /// Used when a whole partition goes away.
    pub fn clear(&self) {
        self.entries.invalidate_all();
        debug!("Cleared response index");
    }

    pub fn stats(&self) -> IndexStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        IndexStats {
            hits,
            misses,
            hit_rate,
            entries: self.entries.entry_count(),
        }
    }
}

impl Default for ResponseIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::{Request, Response};
    use chrono::Utc;

    fn entry(url: &str) -> CachedResponse {
        CachedResponse {
            request: Request::get(url),
            response: Response::new(200, b"ok".to_vec()),
            partition: "backup-data-v1".to_string(),
            captured_at: Utc::now(),
        }
    }

    #[test]
    fn test_index_hit_miss() {
        let index = ResponseIndex::new();
        let cached = entry("http://localhost/api/backup/1");
        let key = cached.key();

        assert!(index.get("backup-data-v1", &key).is_none());

        index.insert(cached);
        assert!(index.get("backup-data-v1", &key).is_some());
        // Same key in a different partition is a separate entry
        assert!(index.get("app-shell-v2", &key).is_none());

        let stats = index.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
    }

    #[test]
    fn test_index_invalidation() {
        let index = ResponseIndex::new();
        let cached = entry("http://localhost/api/backup/1");
        let key = cached.key();

        index.insert(cached);
        index.invalidate("backup-data-v1", &key);
        assert!(index.get("backup-data-v1", &key).is_none());
    }

    #[test]
    fn test_index_clear() {
        let index = ResponseIndex::new();
        let first = entry("http://localhost/a");
        let second = entry("http://localhost/b");
        let (k1, k2) = (first.key(), second.key());

        index.insert(first);
        index.insert(second);
        index.clear();

        assert!(index.get("backup-data-v1", &k1).is_none());
        assert!(index.get("backup-data-v1", &k2).is_none());
    }
}

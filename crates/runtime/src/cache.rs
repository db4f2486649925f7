//! Bounded result cache.
//!
//! Results are cached by fingerprint in a `moka` cache with a byte weigher,
//! a hard capacity, and a TTL, so memory stays bounded no matter how many
//! distinct queries arrive. Every entry stores a checksum of its rows; a
//! checksum mismatch on read evicts the entry and reports a miss rather than
//! serving corrupt rows.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use granary_common::config::CacheSettings;
use granary_error::{ErrorCode, ErrorContext, GranaryError};
use granary_sql::Fingerprint;
use moka::sync::Cache;
use tracing::{debug, warn};

use crate::rows::ResultSet;

/// Fixed per-entry overhead added to the weigher, covering the key and the
/// entry bookkeeping.
const ENTRY_OVERHEAD_BYTES: usize = 256;

/// One cached result with its integrity checksum.
#[derive(Debug)]
pub struct CachedResult {
    pub fingerprint: Fingerprint,
    pub result: ResultSet,
    pub checksum: String,
}

/// Counters observed since the cache was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub corruptions: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// TTL + size bounded cache of query results keyed by fingerprint.
pub struct ResultCache {
    inner: Cache<String, Arc<CachedResult>>,
    hits: AtomicU64,
    misses: AtomicU64,
    corruptions: AtomicU64,
    evictions: Arc<AtomicU64>,
}

impl ResultCache {
    pub fn new(settings: &CacheSettings) -> Self {
        let evictions = Arc::new(AtomicU64::new(0));
        let listener_evictions = Arc::clone(&evictions);

        let inner = Cache::builder()
            .max_capacity(settings.max_size_mb * 1024 * 1024)
            .initial_capacity(settings.initial_entries as usize)
            .time_to_live(Duration::from_secs(settings.ttl_seconds))
            .weigher(|_key: &String, value: &Arc<CachedResult>| {
                (value.result.estimated_bytes() + ENTRY_OVERHEAD_BYTES)
                    .min(u32::MAX as usize) as u32
            })
            .eviction_listener(move |key: Arc<String>, _value, cause| {
                debug!(fingerprint = %&key[..12.min(key.len())], ?cause, "cache entry evicted");
                listener_evictions.fetch_add(1, Ordering::Relaxed);
            })
            .build();

        Self {
            inner,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            corruptions: AtomicU64::new(0),
            evictions,
        }
    }

    /// Look up a result. A checksum mismatch counts as corruption: the entry
    /// is dropped and the lookup reports a miss.
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<Arc<CachedResult>> {
        let Some(entry) = self.inner.get(fingerprint.as_str()) else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        let actual = entry.result.checksum();
        if actual != entry.checksum {
            let err = GranaryError::new(
                ErrorCode::CacheCorruption,
                format!("checksum mismatch for cached entry {}", fingerprint.short()),
            )
            .with_context(ErrorContext::CacheCorruption {
                fingerprint: fingerprint.as_str().to_string(),
                expected_checksum: entry.checksum.clone(),
                actual_checksum: actual,
            });
            warn!(error = %err.to_json(), "cache corruption, evicting entry");
            self.inner.invalidate(fingerprint.as_str());
            self.corruptions.fetch_add(1, Ordering::Relaxed);
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        self.hits.fetch_add(1, Ordering::Relaxed);
        Some(entry)
    }

    /// Store a result. Overwrites any entry with the same fingerprint, which
    /// is idempotent because the fingerprint pins descriptor, source, and
    /// data version.
    pub fn put(&self, fingerprint: Fingerprint, result: ResultSet) {
        let checksum = result.checksum();
        let key = fingerprint.as_str().to_string();
        self.inner.insert(
            key,
            Arc::new(CachedResult {
                fingerprint,
                result,
                checksum,
            }),
        );
        // Apply evictions eagerly so size bounds hold right after insert.
        self.inner.run_pending_tasks();
    }

    /// Insert an entry whose stored checksum does not describe its rows.
    #[cfg(test)]
    fn put_with_checksum(&self, fingerprint: Fingerprint, result: ResultSet, checksum: String) {
        let key = fingerprint.as_str().to_string();
        self.inner.insert(
            key,
            Arc::new(CachedResult {
                fingerprint,
                result,
                checksum,
            }),
        );
        self.inner.run_pending_tasks();
    }

    pub fn invalidate_all(&self) {
        self.inner.invalidate_all();
        self.inner.run_pending_tasks();
    }

    pub fn entry_count(&self) -> u64 {
        self.inner.run_pending_tasks();
        self.inner.entry_count()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            corruptions: self.corruptions.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rows::Value;

    fn settings() -> CacheSettings {
        CacheSettings {
            enabled: true,
            max_size_mb: 1,
            ttl_seconds: 60,
            initial_entries: 16,
        }
    }

    fn fingerprint(tag: u64) -> Fingerprint {
        let desc = granary_sql::canonicalize(
            &granary_sql::QueryDoc::from_json(
                r#"{"select": [{"agg": "count", "col": "*"}], "from": "events"}"#,
            )
            .unwrap(),
        )
        .unwrap();
        Fingerprint::compute(&desc, "events", tag)
    }

    fn result(n: i64) -> ResultSet {
        ResultSet {
            columns: vec!["count_star()".into()],
            rows: vec![vec![Value::Int(n)]],
        }
    }

    #[test]
    fn stores_and_returns_by_fingerprint() {
        let cache = ResultCache::new(&settings());
        let fp = fingerprint(1);

        assert!(cache.get(&fp).is_none());
        cache.put(fp.clone(), result(42));

        let hit = cache.get(&fp).unwrap();
        assert_eq!(hit.result.rows[0][0], Value::Int(42));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn put_overwrites_idempotently() {
        let cache = ResultCache::new(&settings());
        let fp = fingerprint(1);
        cache.put(fp.clone(), result(1));
        cache.put(fp.clone(), result(1));
        assert_eq!(cache.entry_count(), 1);
    }

    #[test]
    fn empty_results_are_cached() {
        let cache = ResultCache::new(&settings());
        let fp = fingerprint(2);
        cache.put(fp.clone(), ResultSet::new(vec!["count_star()".into()]));
        assert!(cache.get(&fp).is_some());
    }

    #[test]
    fn invalidate_all_empties_the_cache() {
        let cache = ResultCache::new(&settings());
        for tag in 0..5 {
            cache.put(fingerprint(tag), result(tag as i64));
        }
        assert_eq!(cache.entry_count(), 5);
        cache.invalidate_all();
        assert_eq!(cache.entry_count(), 0);
        assert!(cache.get(&fingerprint(0)).is_none());
    }

    #[test]
    fn corrupt_entry_is_evicted_and_reported_as_miss() {
        let cache = ResultCache::new(&settings());
        let fp = fingerprint(1);
        cache.put_with_checksum(fp.clone(), result(42), "not-the-real-checksum".into());

        assert!(cache.get(&fp).is_none());
        let stats = cache.stats();
        assert_eq!(stats.corruptions, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 0);

        // The entry is gone; a clean re-put serves normally again.
        cache.put(fp.clone(), result(42));
        assert!(cache.get(&fp).is_some());
        assert_eq!(cache.stats().corruptions, 1);
    }

    #[test]
    fn byte_capacity_bounds_the_cache() {
        let tiny = CacheSettings {
            enabled: true,
            max_size_mb: 1,
            ttl_seconds: 60,
            initial_entries: 1024,
        };
        let cache = ResultCache::new(&tiny);

        // Each entry is ~130KB of text; 1MB cannot hold all twenty.
        for tag in 0..20u64 {
            let rows = (0..1000)
                .map(|i| vec![Value::Text(format!("row-{tag}-{i}-{}", "x".repeat(100)))])
                .collect();
            cache.put(
                fingerprint(tag),
                ResultSet {
                    columns: vec!["payload".into()],
                    rows,
                },
            );
        }
        assert!(cache.entry_count() < 20);
        assert!(cache.stats().evictions > 0);
    }

    #[test]
    fn ttl_expires_entries() {
        let short = CacheSettings {
            enabled: true,
            max_size_mb: 1,
            ttl_seconds: 1,
            initial_entries: 16,
        };
        let cache = ResultCache::new(&short);
        let fp = fingerprint(1);
        cache.put(fp.clone(), result(1));
        assert!(cache.get(&fp).is_some());

        std::thread::sleep(Duration::from_millis(1100));
        assert!(cache.get(&fp).is_none());
    }
}

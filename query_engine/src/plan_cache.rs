//! The per-store plan cache.
//!
//! Maps a structural fingerprint to its optimized plan. Reads take a shared
//! lock and bump an atomic access stamp; hit/miss counters are atomics, so
//! statistics never contend with lookups. Eviction is approximate LRU: when
//! the cache outgrows its bound, the oldest quarter (by access stamp) is
//! dropped in one pass.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use hashbrown::HashMap;
use observability_deps::tracing::debug;
use parking_lot::RwLock;

use crate::plan::LogicalPlan;

#[derive(Debug)]
struct CacheEntry {
    plan: Arc<LogicalPlan>,
    last_access: AtomicU64,
}

/// Hit/miss counters, monotonically non-decreasing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    /// Fraction of lookups served from the cache; 0 when none happened.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug)]
pub struct PlanCache {
    max_entries: usize,
    entries: RwLock<HashMap<String, CacheEntry>>,
    clock: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl PlanCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries: max_entries.max(1),
            entries: RwLock::new(HashMap::new()),
            clock: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up `fingerprint`, or build, cache and return the plan via
    /// `build` on a miss.
    pub fn get_or_insert_with(
        &self,
        fingerprint: &str,
        build: impl FnOnce() -> LogicalPlan,
    ) -> Arc<LogicalPlan> {
        let stamp = self.clock.fetch_add(1, Ordering::Relaxed);

        {
            let entries = self.entries.read();
            if let Some(entry) = entries.get(fingerprint) {
                entry.last_access.store(stamp, Ordering::Relaxed);
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Arc::clone(&entry.plan);
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let plan = Arc::new(build());

        let mut entries = self.entries.write();
        // another writer may have raced us here; keep the existing entry
        if let Some(entry) = entries.get(fingerprint) {
            entry.last_access.store(stamp, Ordering::Relaxed);
            return Arc::clone(&entry.plan);
        }

        entries.insert(
            fingerprint.to_owned(),
            CacheEntry {
                plan: Arc::clone(&plan),
                last_access: AtomicU64::new(stamp),
            },
        );

        if entries.len() > self.max_entries {
            evict_oldest_quarter(&mut entries);
        }

        plan
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

// Drop the ~25% least recently stamped entries in one pass. Exact LRU is
// not required; a stale stamp only costs a rebuild later.
fn evict_oldest_quarter(entries: &mut HashMap<String, CacheEntry>) {
    let mut stamps = entries
        .values()
        .map(|e| e.last_access.load(Ordering::Relaxed))
        .collect::<Vec<_>>();
    stamps.sort_unstable();

    let evict = (entries.len() / 4).max(1);
    let cutoff = stamps[evict - 1];
    let before = entries.len();
    entries.retain(|_, e| e.last_access.load(Ordering::Relaxed) > cutoff);
    debug!(evicted = before - entries.len(), "plan cache eviction");
}

#[cfg(test)]
mod test {
    use super::*;

    fn plan(limit: usize) -> LogicalPlan {
        LogicalPlan::Limit {
            input: Box::new(LogicalPlan::scan()),
            limit,
        }
    }

    #[test]
    fn hit_and_miss_accounting() {
        let cache = PlanCache::new(8);
        let a1 = cache.get_or_insert_with("a", || plan(1));
        assert_eq!(cache.stats(), CacheStats { hits: 0, misses: 1 });

        let a2 = cache.get_or_insert_with("a", || unreachable!("must hit"));
        assert_eq!(cache.stats(), CacheStats { hits: 1, misses: 1 });
        assert!(Arc::ptr_eq(&a1, &a2));

        cache.get_or_insert_with("b", || plan(2));
        let stats = cache.stats();
        assert_eq!(stats, CacheStats { hits: 1, misses: 2 });
        assert!((stats.hit_rate() - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn eviction_drops_oldest() {
        let cache = PlanCache::new(4);
        for i in 0..4 {
            cache.get_or_insert_with(&format!("p{}", i), || plan(i));
        }
        // touch p2/p3 so p0 is the stalest alongside p1
        cache.get_or_insert_with("p2", || unreachable!());
        cache.get_or_insert_with("p3", || unreachable!());

        // overflow triggers eviction of roughly a quarter
        cache.get_or_insert_with("p4", || plan(4));
        assert!(cache.len() <= 4, "len {}", cache.len());

        // most recently used entries survive
        let before = cache.stats().hits;
        cache.get_or_insert_with("p4", || unreachable!());
        cache.get_or_insert_with("p3", || unreachable!());
        assert_eq!(cache.stats().hits, before + 2);
    }

    #[test]
    fn hits_are_monotonic() {
        let cache = PlanCache::new(4);
        cache.get_or_insert_with("a", || plan(1));
        let mut last = 0;
        for _ in 0..10 {
            cache.get_or_insert_with("a", || unreachable!());
            let hits = cache.stats().hits;
            assert!(hits > last);
            last = hits;
        }
    }
}

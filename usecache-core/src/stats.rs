use std::sync::atomic::{AtomicU64, Ordering};

/// Per-computation counters.
///
/// Atomic with `Relaxed` ordering: counters are monotonic and only read for
/// reporting.
///
/// # Examples
///
/// ```
/// use usecache_core::CacheStats;
///
/// let stats = CacheStats::new();
/// stats.record_hit();
/// stats.record_hit();
/// stats.record_miss();
/// stats.record_stale_hit();
///
/// assert_eq!(stats.hits(), 3);
/// assert_eq!(stats.stale_hits(), 1);
/// assert_eq!(stats.total_accesses(), 4);
/// assert!((stats.hit_rate() - 0.75).abs() < 0.001);
/// ```
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    stale_hits: AtomicU64,
    dynamic_holes: AtomicU64,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a fresh hit.
    #[inline]
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a hit served stale while a refresh runs; counts as a hit too.
    #[inline]
    pub fn record_stale_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        self.stale_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a miss, an expired entry or a discarded entry.
    #[inline]
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an invocation that became a dynamic hole.
    #[inline]
    pub fn record_dynamic_hole(&self) {
        self.dynamic_holes.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn stale_hits(&self) -> u64 {
        self.stale_hits.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn dynamic_holes(&self) -> u64 {
        self.dynamic_holes.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn total_accesses(&self) -> u64 {
        self.hits() + self.misses()
    }

    /// Hits over total accesses; 0.0 before the first access.
    #[inline]
    pub fn hit_rate(&self) -> f64 {
        let total = self.total_accesses();
        if total == 0 {
            0.0
        } else {
            self.hits() as f64 / total as f64
        }
    }

    #[inline]
    pub fn miss_rate(&self) -> f64 {
        1.0 - self.hit_rate()
    }

    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.stale_hits.store(0, Ordering::Relaxed);
        self.dynamic_holes.store(0, Ordering::Relaxed);
    }
}

impl Clone for CacheStats {
    fn clone(&self) -> Self {
        Self {
            hits: AtomicU64::new(self.hits()),
            misses: AtomicU64::new(self.misses()),
            stale_hits: AtomicU64::new(self.stale_hits()),
            dynamic_holes: AtomicU64::new(self.dynamic_holes()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_new_stats() {
        let stats = CacheStats::new();
        assert_eq!(stats.total_accesses(), 0);
        assert_eq!(stats.hit_rate(), 0.0);
        assert_eq!(stats.miss_rate(), 1.0);
    }

    #[test]
    fn test_dynamic_holes_are_not_accesses() {
        let stats = CacheStats::new();
        stats.record_dynamic_hole();
        assert_eq!(stats.dynamic_holes(), 1);
        assert_eq!(stats.total_accesses(), 0);
    }

    #[test]
    fn test_reset() {
        let stats = CacheStats::new();
        stats.record_stale_hit();
        stats.record_miss();
        stats.reset();
        assert_eq!(stats.total_accesses(), 0);
        assert_eq!(stats.stale_hits(), 0);
    }

    #[test]
    fn test_clone_snapshots_counters() {
        let stats = CacheStats::new();
        stats.record_hit();
        let snapshot = stats.clone();
        stats.record_hit();
        assert_eq!(snapshot.hits(), 1);
        assert_eq!(stats.hits(), 2);
    }

    #[test]
    fn test_concurrent_updates() {
        let stats = Arc::new(CacheStats::new());
        let handles: Vec<_> = (0..10)
            .map(|_| {
                let stats = Arc::clone(&stats);
                thread::spawn(move || {
                    for _ in 0..100 {
                        stats.record_hit();
                        stats.record_miss();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(stats.hits(), 1_000);
        assert_eq!(stats.misses(), 1_000);
    }
}

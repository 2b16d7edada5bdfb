use std::sync::Arc;

use dashmap::DashMap;

use crate::CacheStats;

/// Statistics of every cached computation known to a runtime, by computation id.
///
/// # Examples
///
/// ```
/// use usecache_core::stats_registry::StatsRegistry;
///
/// let registry = StatsRegistry::new();
/// registry.stats_for("getUser").record_miss();
/// registry.stats_for("getUser").record_hit();
///
/// let stats = registry.get("getUser").unwrap();
/// assert_eq!(stats.hits(), 1);
/// assert_eq!(registry.list(), vec!["getUser".to_string()]);
/// ```
#[derive(Debug, Default)]
pub struct StatsRegistry {
    stats: DashMap<String, Arc<CacheStats>>,
}

impl StatsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live counters for `id`, registered on first use.
    pub fn stats_for(&self, id: &str) -> Arc<CacheStats> {
        if let Some(stats) = self.stats.get(id) {
            return Arc::clone(&stats);
        }
        Arc::clone(
            &self
                .stats
                .entry(id.to_string())
                .or_insert_with(|| Arc::new(CacheStats::new())),
        )
    }

    /// Snapshot of the counters for `id`.
    pub fn get(&self, id: &str) -> Option<CacheStats> {
        self.stats.get(id).map(|stats| (**stats).clone())
    }

    /// Registered computation ids, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.stats.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Zeroes the counters of `id`; returns false if it is unknown.
    pub fn reset(&self, id: &str) -> bool {
        match self.stats.get(id) {
            Some(stats) => {
                stats.reset();
                true
            }
            None => false,
        }
    }

    /// Forgets every registered computation.
    pub fn clear(&self) {
        self.stats.clear();
    }
}

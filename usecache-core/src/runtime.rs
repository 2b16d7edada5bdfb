//! Process-wide engine state.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;

use crate::cache_entry::PendingEntry;
use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::invalidation::{validate_tags, ImplicitTags, TagInvalidationTracker};
use crate::store::{CacheHandler, InMemoryCacheHandler};
#[cfg(feature = "stats")]
use crate::{stats_registry::StatsRegistry, CacheStats};

/// Name of the handler used by caches that do not name one.
pub const DEFAULT_HANDLER: &str = "default";

/// Owner of everything that outlives a single request: the build id,
/// configuration, registered handlers, the tag tracker and statistics.
///
/// # Examples
///
/// ```
/// use usecache_core::{CacheConfig, CacheRuntime};
///
/// let runtime = CacheRuntime::with_config("build-1", CacheConfig::default());
/// assert_eq!(runtime.build_id(), "build-1");
/// assert!(runtime.handler(Some("default")).is_ok());
/// assert!(runtime.handler(Some("remote")).is_err());
/// ```
pub struct CacheRuntime {
    build_id: String,
    config: CacheConfig,
    handlers: HashMap<String, Arc<dyn CacheHandler>>,
    tags: Arc<TagInvalidationTracker>,
    in_flight: DashMap<String, PendingEntry>,
    refreshing: DashMap<String, ()>,
    #[cfg(feature = "stats")]
    stats: StatsRegistry,
}

impl CacheRuntime {
    pub fn new(build_id: impl Into<String>) -> Self {
        Self::with_config(build_id, CacheConfig::default())
    }

    pub fn with_config(build_id: impl Into<String>, config: CacheConfig) -> Self {
        let tags = Arc::new(TagInvalidationTracker::new());
        let default: Arc<dyn CacheHandler> =
            Arc::new(InMemoryCacheHandler::from_config(&config, Arc::clone(&tags)));
        Self {
            build_id: build_id.into(),
            config,
            handlers: HashMap::from([(DEFAULT_HANDLER.to_string(), default)]),
            tags,
            in_flight: DashMap::new(),
            refreshing: DashMap::new(),
            #[cfg(feature = "stats")]
            stats: StatsRegistry::new(),
        }
    }

    /// Registers (or replaces) a named handler.
    pub fn with_handler(mut self, name: impl Into<String>, handler: Arc<dyn CacheHandler>) -> Self {
        self.handlers.insert(name.into(), handler);
        self
    }

    pub fn build_id(&self) -> &str {
        &self.build_id
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn tag_tracker(&self) -> &Arc<TagInvalidationTracker> {
        &self.tags
    }

    /// Resolves a handler by name; `None` means the default handler.
    pub fn handler(&self, name: Option<&str>) -> Result<Arc<dyn CacheHandler>, CacheError> {
        let name = name.unwrap_or(DEFAULT_HANDLER);
        self.handlers.get(name).cloned().ok_or_else(|| {
            CacheError::contract(format!("no cache handler registered under `{name}`"))
        })
    }

    /// Tells every handler about tags that expired elsewhere.
    ///
    /// Called once per request before the first cache read. Handler failures
    /// are logged and skipped.
    pub async fn receive_expired_tags(&self, tags: &[String]) {
        if tags.is_empty() {
            return;
        }
        for (name, handler) in &self.handlers {
            if let Err(err) = handler.receive_expired_tags(tags).await {
                tracing::warn!(handler = %name, error = %err, "failed to propagate expired tags");
            }
        }
    }

    /// Expires `tags` on every handler.
    ///
    /// Invalid tags are dropped; returns the tags that were expired.
    pub async fn revalidate_tag<I, S>(&self, tags: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tags = validate_tags(tags, "revalidate_tag()");
        tracing::debug!(?tags, "revalidating tags");
        self.receive_expired_tags(&tags).await;
        tags
    }

    /// Couples `tags` with the latest expiration any handler reports for them.
    pub async fn implicit_tags(&self, tags: Vec<String>) -> ImplicitTags {
        let mut expiration = 0;
        for (name, handler) in &self.handlers {
            match handler.get_expiration(&tags).await {
                Ok(value) => expiration = expiration.max(value),
                Err(err) => {
                    tracing::warn!(handler = %name, error = %err, "failed to read tag expiration")
                }
            }
        }
        ImplicitTags::new(tags, expiration)
    }

    /// Generation currently running for `key`, if any.
    #[cfg(test)]
    pub(crate) fn in_flight(&self, key: &str) -> Option<PendingEntry> {
        self.in_flight.get(key).map(|pending| pending.clone())
    }

    /// Registers a generation for `key` unless one is already running.
    ///
    /// Returns the generation callers should await and whether it is the one
    /// passed in.
    pub(crate) fn join_or_start(&self, key: &str, pending: PendingEntry) -> (PendingEntry, bool) {
        match self.in_flight.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(existing) => (existing.get().clone(), false),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(pending.clone());
                (pending, true)
            }
        }
    }

    pub(crate) fn finish_in_flight(&self, key: &str) {
        self.in_flight.remove(key);
    }

    /// Claims the background refresh of `key`. `false` if one is running.
    pub(crate) fn start_refresh(&self, key: &str) -> bool {
        self.refreshing.insert(key.to_string(), ()).is_none()
    }

    pub(crate) fn finish_refresh(&self, key: &str) {
        self.refreshing.remove(key);
    }

    /// Live counters of computation `id`.
    #[cfg(feature = "stats")]
    pub fn stats_for(&self, id: &str) -> Arc<CacheStats> {
        self.stats.stats_for(id)
    }

    /// Snapshot of the counters of computation `id`.
    #[cfg(feature = "stats")]
    pub fn stats(&self, id: &str) -> Option<CacheStats> {
        self.stats.get(id)
    }

    /// Ids of every computation with counters, sorted.
    #[cfg(feature = "stats")]
    pub fn stats_ids(&self) -> Vec<String> {
        self.stats.list()
    }

    /// Zeroes the counters of `id`; false if it never ran.
    #[cfg(feature = "stats")]
    pub fn reset_stats(&self, id: &str) -> bool {
        self.stats.reset(id)
    }

    #[cfg(feature = "stats")]
    pub fn clear_stats(&self) {
        self.stats.clear()
    }
}

impl fmt::Debug for CacheRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut handlers: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        handlers.sort_unstable();
        f.debug_struct("CacheRuntime")
            .field("build_id", &self.build_id)
            .field("config", &self.config)
            .field("handlers", &handlers)
            .field("in_flight", &self.in_flight.len())
            .field("refreshing", &self.refreshing.len())
            .finish_non_exhaustive()
    }
}

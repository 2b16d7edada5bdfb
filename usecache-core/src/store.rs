//! # Cache handlers
//!
//! Shared backends behind public cached computations. A handler only sees
//! complete entries keyed by cache key; everything about work units and
//! prerender passes stays in the wrapper.
//!
//! [`InMemoryCacheHandler`] is the process-local default: a `DashMap` of
//! drained entries with an eviction-order queue bounded by entry count and
//! estimated memory, plus a tag index so expired tags evict eagerly.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::cache_entry::{CacheEntry, PendingEntry};
use crate::config::CacheConfig;
use crate::error::{CacheError, StreamError};
use crate::invalidation::TagInvalidationTracker;
use crate::lifetimes::CacheLife;
use crate::stream::ByteStream;
use crate::utils::{move_key_to_end, now_ms, remove_key_from_order};
use crate::{EvictionPolicy, MemoryEstimator};

/// A pluggable shared cache backend.
///
/// Errors from `get` are treated as misses and errors from `set` are logged;
/// a failing backend never fails a render.
#[async_trait]
pub trait CacheHandler: Send + Sync + fmt::Debug {
    /// Returns the entry stored under `key`, if it may still be served.
    async fn get(&self, key: &str, implicit_tags: &[String]) -> Result<Option<CacheEntry>, CacheError>;

    /// Stores the entry once it resolves. An entry that resolves to `None`
    /// is not stored.
    async fn set(&self, key: &str, entry: PendingEntry) -> Result<(), CacheError>;

    /// Marks `tags` as expired now. Called once per request, before any read,
    /// with tags revalidated elsewhere, and by `revalidate_tag`.
    async fn receive_expired_tags(&self, tags: &[String]) -> Result<(), CacheError>;

    /// Latest expiration (epoch ms) among `tags`; 0 if none expired.
    async fn get_expiration(&self, tags: &[String]) -> Result<u64, CacheError>;
}

#[derive(Debug, Clone)]
struct StoredEntry {
    chunks: Vec<Bytes>,
    end: Result<(), StreamError>,
    timestamp: u64,
    life: CacheLife,
    tags: Vec<String>,
}

impl StoredEntry {
    fn to_entry(&self) -> CacheEntry {
        let value = ByteStream::from_parts(self.chunks.clone(), self.end.clone());
        CacheEntry::with_timestamp(value, self.timestamp, self.life, self.tags.clone())
    }
}

impl MemoryEstimator for StoredEntry {
    fn estimate_memory(&self) -> usize {
        std::mem::size_of::<Self>() + self.chunks.estimate_memory() + self.tags.estimate_memory()
    }
}

/// Process-local handler used for the `default` cache kind.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use usecache_core::store::{CacheHandler, InMemoryCacheHandler};
/// use usecache_core::invalidation::TagInvalidationTracker;
/// use usecache_core::utils::now_ms;
/// use usecache_core::{ready_entry, CacheEntry, CacheLife, EvictionPolicy};
///
/// # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
/// let handler = InMemoryCacheHandler::new(
///     Some(100),
///     None,
///     EvictionPolicy::LRU,
///     Arc::new(TagInvalidationTracker::new()),
/// );
/// let written = now_ms() - 1_000;
/// let entry = CacheEntry::with_timestamp("Alice", written, CacheLife::MINUTES, vec!["user:42".to_string()]);
/// handler.set("k", ready_entry(entry)).await.unwrap();
///
/// let hit = handler.get("k", &[]).await.unwrap().unwrap();
/// assert_eq!(hit.value.collect().await.unwrap(), "Alice");
///
/// handler.receive_expired_tags(&["user:42".to_string()]).await.unwrap();
/// assert!(handler.get("k", &[]).await.unwrap().is_none());
/// # });
/// ```
pub struct InMemoryCacheHandler {
    entries: DashMap<String, StoredEntry>,
    order: Mutex<VecDeque<String>>,
    limit: Option<usize>,
    max_memory: Option<usize>,
    policy: EvictionPolicy,
    tags: Arc<TagInvalidationTracker>,
}

impl InMemoryCacheHandler {
    pub fn new(
        limit: Option<usize>,
        max_memory: Option<usize>,
        policy: EvictionPolicy,
        tags: Arc<TagInvalidationTracker>,
    ) -> Self {
        Self {
            entries: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
            limit,
            max_memory,
            policy,
            tags,
        }
    }

    pub fn from_config(config: &CacheConfig, tags: Arc<TagInvalidationTracker>) -> Self {
        Self::new(config.max_entries, config.max_memory, config.eviction, tags)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn clear(&self) {
        let mut order = self.order.lock();
        for key in order.drain(..) {
            self.tags.unregister(&key);
        }
        self.entries.clear();
    }

    fn remove(&self, key: &str, order: &mut VecDeque<String>) {
        self.entries.remove(key);
        remove_key_from_order(order, key);
        self.tags.unregister(key);
    }

    fn current_memory(&self) -> usize {
        self.entries
            .iter()
            .map(|entry| entry.value().estimate_memory())
            .sum()
    }

    /// Evicts from the front of the order queue until `incoming` bytes fit
    /// and the entry limit leaves room for one more entry.
    fn make_room(&self, incoming: usize, order: &mut VecDeque<String>) {
        if let Some(max_memory) = self.max_memory {
            while self.current_memory() + incoming > max_memory {
                let Some(evict_key) = order.pop_front() else {
                    break;
                };
                tracing::debug!(key = %evict_key, "evicting entry over memory limit");
                self.entries.remove(&evict_key);
                self.tags.unregister(&evict_key);
            }
        }

        if let Some(limit) = self.limit {
            while self.entries.len() >= limit {
                let Some(evict_key) = order.pop_front() else {
                    break;
                };
                // keys already removed elsewhere are skipped
                if self.entries.remove(&evict_key).is_some() {
                    tracing::debug!(key = %evict_key, "evicting entry over entry limit");
                }
                self.tags.unregister(&evict_key);
            }
        }
    }

    fn insert(&self, key: &str, stored: StoredEntry) {
        let size = stored.estimate_memory();
        if self.max_memory.is_some_and(|max| size > max) {
            tracing::debug!(key, size, "entry larger than memory limit, not stored");
            return;
        }
        if self.limit == Some(0) {
            return;
        }

        let mut order = self.order.lock();
        if self.entries.contains_key(key) {
            self.remove(key, &mut order);
        }
        self.make_room(size, &mut order);

        self.tags.register(key, &stored.tags);
        order.push_back(key.to_string());
        self.entries.insert(key.to_string(), stored);
    }
}

impl fmt::Debug for InMemoryCacheHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryCacheHandler")
            .field("entries", &self.entries.len())
            .field("limit", &self.limit)
            .field("max_memory", &self.max_memory)
            .field("policy", &self.policy)
            .finish()
    }
}

#[async_trait]
impl CacheHandler for InMemoryCacheHandler {
    async fn get(&self, key: &str, implicit_tags: &[String]) -> Result<Option<CacheEntry>, CacheError> {
        let Some(stored) = self.entries.get(key).map(|e| e.value().clone()) else {
            return Ok(None);
        };

        let now = now_ms();
        let entry = stored.to_entry();
        if entry.is_expired(now) || self.tags.is_stale(&stored.tags, stored.timestamp) {
            let mut order = self.order.lock();
            self.remove(key, &mut order);
            return Ok(None);
        }
        if self.tags.is_stale(implicit_tags, stored.timestamp) {
            return Ok(None);
        }

        if self.policy.reorders_on_hit() {
            let mut order = self.order.lock();
            if self.entries.contains_key(key) {
                move_key_to_end(&mut order, key);
            }
        }
        Ok(Some(entry))
    }

    async fn set(&self, key: &str, entry: PendingEntry) -> Result<(), CacheError> {
        let Some(entry) = entry.await else {
            return Ok(());
        };
        let timestamp = entry.timestamp;
        let life = entry.life();
        let tags = entry.tags.clone();
        let (chunks, end) = entry.collect_value().await;

        self.insert(
            key,
            StoredEntry {
                chunks,
                end,
                timestamp,
                life,
                tags,
            },
        );
        Ok(())
    }

    async fn receive_expired_tags(&self, tags: &[String]) -> Result<(), CacheError> {
        let keys = self.tags.expire_tags(tags, now_ms());
        if keys.is_empty() {
            return Ok(());
        }
        let mut order = self.order.lock();
        for key in &keys {
            self.remove(key, &mut order);
        }
        tracing::debug!(evicted = keys.len(), ?tags, "evicted entries for expired tags");
        Ok(())
    }

    async fn get_expiration(&self, tags: &[String]) -> Result<u64, CacheError> {
        Ok(self.tags.expiration(tags))
    }
}

use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt, Shared};

use crate::lifetimes::CacheLife;
use crate::stream::ByteStream;
use crate::utils::now_ms;
use crate::MemoryEstimator;

/// A memoized result plus the metadata needed to decide whether it may be served.
///
/// The value is a [`ByteStream`]; cloning an entry tees the stream, producing
/// a logically equal entry that owns an independent branch.
///
/// # Fields
///
/// * `value` - The rendered bytes (possibly ending in a replayed error)
/// * `timestamp` - Unix epoch milliseconds at which generation started
/// * `revalidate` - Seconds after `timestamp` the entry turns stale
/// * `expire` - Seconds after `timestamp` the entry must not be served
/// * `stale` - Seconds a client may reuse the value without asking
/// * `tags` - Tags collected while generating the entry
///
/// # Examples
///
/// ```
/// use usecache_core::{CacheEntry, CacheLife};
///
/// let entry = CacheEntry::new("Alice", CacheLife::MINUTES, vec!["user:42".to_string()]);
/// assert!(!entry.is_expired(entry.timestamp + 1_000));
/// assert!(entry.is_expired(entry.timestamp + 3_601_000));
/// ```
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: ByteStream,
    pub timestamp: u64,
    pub revalidate: u64,
    pub expire: u64,
    pub stale: u64,
    pub tags: Vec<String>,
}

impl CacheEntry {
    /// Creates an entry stamped with the current time.
    pub fn new(value: impl Into<ByteStream>, life: CacheLife, tags: Vec<String>) -> Self {
        Self::with_timestamp(value, now_ms(), life, tags)
    }

    pub fn with_timestamp(
        value: impl Into<ByteStream>,
        timestamp: u64,
        life: CacheLife,
        tags: Vec<String>,
    ) -> Self {
        Self {
            value: value.into(),
            timestamp,
            revalidate: life.revalidate,
            expire: life.expire,
            stale: life.stale,
            tags,
        }
    }

    pub fn life(&self) -> CacheLife {
        CacheLife::new(self.stale, self.revalidate, self.expire)
    }

    /// True once `now` is past `timestamp + expire`.
    pub fn is_expired(&self, now: u64) -> bool {
        now > self.timestamp.saturating_add(self.expire.saturating_mul(1_000))
    }

    /// True once `now` is past `timestamp + revalidate`.
    pub fn is_stale(&self, now: u64) -> bool {
        now > self
            .timestamp
            .saturating_add(self.revalidate.saturating_mul(1_000))
    }

    /// Splits the entry into two logically equal entries with their own branches.
    pub fn tee(self) -> (CacheEntry, CacheEntry) {
        let other = self.clone();
        (self, other)
    }

    /// Drains the value into memory, for backends that store bytes.
    pub async fn collect_value(self) -> (Vec<Bytes>, Result<(), crate::StreamError>) {
        self.value.drain().await
    }
}

impl MemoryEstimator for CacheEntry {
    fn estimate_memory(&self) -> usize {
        let tags: usize = self.tags.iter().map(|t| t.capacity()).sum();
        // value is counted by its own estimator; subtract its inline part to
        // avoid counting it twice
        std::mem::size_of::<Self>() + tags + self.value.estimate_memory()
            - std::mem::size_of::<ByteStream>()
    }
}

/// An entry that may still be generating.
///
/// Resolves to `None` when generation produced nothing worth storing.
/// Awaiting the same pending entry several times yields independent branches.
pub type PendingEntry = Shared<BoxFuture<'static, Option<CacheEntry>>>;

/// Wraps a finished entry as a [`PendingEntry`].
pub fn ready_entry(entry: CacheEntry) -> PendingEntry {
    futures::future::ready(Some(entry)).boxed().shared()
}

/// Wraps an in-flight entry as a [`PendingEntry`].
pub fn pending_entry<F>(future: F) -> PendingEntry
where
    F: std::future::Future<Output = Option<CacheEntry>> + Send + 'static,
{
    future.boxed().shared()
}

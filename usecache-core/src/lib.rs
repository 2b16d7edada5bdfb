//! # usecache core
//!
//! Execution contexts and the cached-computation engine behind static,
//! incremental and dynamic rendering.
//!
//! ## Features
//!
//! - **Work units**: one typed execution context per task (request, cache fill
//!   or one of the prerender variants), scoped through `tokio` task-locals
//! - **Cached computations**: deterministic keys, resume data caches,
//!   pluggable backends, stale-while-revalidate and single-flight generation
//! - **Dynamic holes**: request-dependent output during prerendering becomes a
//!   hanging placeholder, a postponement or a dynamic bail-out
//! - **Tags and lifetimes**: `cache_tag`, `cache_life` and on-demand
//!   revalidation, propagated from nested caches to their parents
//! - **Statistics**: per-computation hit/miss counters (feature `stats`)
//!
//! ## Module Organization
//!
//! - [`context`] - task-local work unit and work store
//! - [`work_unit`] - the work unit variants and their accessors
//! - [`wrapper`] - [`cache`] and the call state machine
//! - [`keys`] - argument encoding and cache keys
//! - [`store`] - the backend trait and the in-memory backend
//! - [`invalidation`] - tag expiry tracking and implicit tags
//! - [`resume`] - resume data caches handed between passes
//! - [`signal`] - cache and render signals of a prerender pass
//! - [`stream`] - replayable byte streams
mod cache_entry;
mod config;
mod error;
mod eviction_policy;
mod lifetimes;
mod memory_estimator;
mod runtime;
mod work_store;

pub mod context;
pub mod dynamic;
pub mod invalidation;
pub mod keys;
pub mod params;
pub mod request;
pub mod resume;
pub mod signal;
pub mod store;
pub mod stream;
pub mod tags;
pub mod utils;
pub mod work_unit;
pub mod wrapper;

#[cfg(feature = "stats")]
mod stats;

#[cfg(feature = "stats")]
pub mod stats_registry;

pub use cache_entry::{pending_entry, ready_entry, CacheEntry, PendingEntry};
pub use config::{CacheConfig, DEFAULT_DYNAMIC_EXPIRE_SECS, DEFAULT_USE_CACHE_TIMEOUT_MS};
pub use dynamic::{DynamicHole, HangingPlaceholder};
pub use error::{CacheError, ComputationError, KeyError, Result, StreamError};
pub use eviction_policy::EvictionPolicy;
pub use invalidation::ImplicitTags;
pub use keys::{CacheArg, CacheKey};
pub use lifetimes::{CacheLife, RevalidateStore, BUILTIN_PROFILES, INFINITE_CACHE};
pub use memory_estimator::MemoryEstimator;
pub use params::{RouteParam, RouteParams};
pub use request::{cookies, draft_mode, headers, Headers, ReadonlyCookies, RequestDataError, RequestPhase};
pub use runtime::{CacheRuntime, DEFAULT_HANDLER};
pub use signal::{AbortReason, CacheReadGuard, CacheSignal, PrerenderController, RenderSignal};
pub use store::{CacheHandler, InMemoryCacheHandler};
pub use stream::{ByteStream, StreamWriter};
pub use tags::{cache_life, cache_life_profile, cache_tag, revalidate_tag};
pub use work_store::WorkStore;
pub use work_unit::{
    PrerenderStoreLegacy, PrerenderStoreModern, PrerenderStorePpr, RequestStore, WorkUnit,
    WorkUnitKind,
};
pub use wrapper::{cache, CacheKind, CacheOutput, CachedFunction, Computation, IntoRendered};

#[cfg(feature = "stats")]
pub use stats::CacheStats;

//! # usecache
//!
//! Cached computations for server rendering.
//!
//! A renderer enters a route with a [`WorkStore`] and a [`WorkUnit`] (a live
//! request or a prerender pass). Functions marked `#[use_cache]` are then
//! memoized across requests: their arguments form a deterministic key, their
//! results are stored with revalidate/expire budgets and tags, and nested
//! cached calls report both upwards. During prerendering, anything that
//! depends on request data becomes a dynamic hole instead of a wrong static
//! value.
//!
//! ## Features
//!
//! - **Easy to use**: add `#[use_cache]` to any async function
//! - **Private caches**: `#[use_cache(private)]` may read cookies and headers
//!   and never leaves the request
//! - **Tags**: `cache_tag`, `revalidate_tag` and route-derived implicit tags
//! - **Lifetimes**: `cache_life` with built-in and configured profiles
//! - **Pluggable backends**: implement [`CacheHandler`] and register it under
//!   a name
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use usecache::{context, use_cache, CacheRuntime, RequestStore, WorkStore};
//!
//! #[use_cache(tags = ["users"])]
//! async fn get_user(id: u64) -> String {
//!     format!("user #{id}")
//! }
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let runtime = Arc::new(CacheRuntime::new("build-1"));
//! let store = WorkStore::new("/users/[id]", runtime).into_shared();
//! let request = RequestStore::new("/users/42").into_unit();
//!
//! let name = context::enter(store, Some(request), async {
//!     get_user(42).await?.collect().await
//! })
//! .await
//! .unwrap();
//! assert_eq!(name, "user #42");
//! # });
//! ```
//!
//! ## Configuration
//!
//! [`CacheConfig::load`] layers an optional TOML file under `USECACHE__*`
//! environment variables:
//!
//! ```toml
//! use_cache_timeout_ms = 50000
//! dev = false
//! max_entries = 10000
//! eviction = "lru"
//!
//! [profiles.blog]
//! revalidate = 600
//! expire = 86400
//! ```

pub use usecache_core::*;
pub use usecache_macros::use_cache;

/// The items most routes need.
pub mod prelude {
    pub use usecache_core::{
        cache, cache_life, cache_life_profile, cache_tag, context, cookies, draft_mode, headers,
        revalidate_tag, CacheArg, CacheError, CacheKind, CacheLife, CacheOutput, CacheRuntime,
        CachedFunction, RequestStore, WorkStore,
    };
    pub use usecache_macros::use_cache;
}

//! Execution-context store.
//!
//! The active [`WorkUnit`] and the route-level [`WorkStore`] live in
//! `tokio::task_local!` slots. A value is visible to the future it was scoped
//! around (and everything that future awaits) and is restored when that
//! future completes, so concurrent requests never observe each other.
//!
//! Task-locals do not follow `tokio::spawn`; spawned work has to be scoped
//! again explicitly.

use std::future::Future;
use std::sync::Arc;

use crate::work_store::WorkStore;
use crate::work_unit::WorkUnit;

tokio::task_local! {
    static WORK_UNIT: Option<WorkUnit>;
    static WORK_STORE: Arc<WorkStore>;
}

/// Runs `fut` with `unit` as the active work unit.
pub async fn run<F: Future>(unit: WorkUnit, fut: F) -> F::Output {
    WORK_UNIT.scope(Some(unit), fut).await
}

/// Runs `f` with `unit` as the active work unit.
pub fn run_sync<R>(unit: WorkUnit, f: impl FnOnce() -> R) -> R {
    WORK_UNIT.sync_scope(Some(unit), f)
}

/// Runs `fut` with no active work unit.
pub async fn run_detached<F: Future>(fut: F) -> F::Output {
    WORK_UNIT.scope(None, fut).await
}

/// Enters a route: `store` becomes the work store and `unit` the work unit.
///
/// This is where renderers start every request and prerender pass.
///
/// ```
/// use std::sync::Arc;
/// use usecache_core::{context, CacheRuntime, RequestStore, WorkStore};
///
/// # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
/// let runtime = Arc::new(CacheRuntime::new("v1"));
/// let store = WorkStore::new("/blog", runtime).into_shared();
/// let kind = context::enter(store, Some(RequestStore::new("/blog").into_unit()), async {
///     context::current().map(|unit| unit.kind())
/// })
/// .await;
/// assert!(kind.is_some());
/// assert!(context::current().is_none());
/// # });
/// ```
pub async fn enter<F: Future>(store: Arc<WorkStore>, unit: Option<WorkUnit>, fut: F) -> F::Output {
    WORK_STORE.scope(store, WORK_UNIT.scope(unit, fut)).await
}

/// The active work unit, if any.
pub fn current() -> Option<WorkUnit> {
    WORK_UNIT.try_with(|unit| unit.clone()).ok().flatten()
}

/// The active work store, if any.
pub fn work_store() -> Option<Arc<WorkStore>> {
    WORK_STORE.try_with(Arc::clone).ok()
}

/// Route of the active work store, for error messages.
pub fn current_route() -> String {
    work_store()
        .map(|store| store.route.clone())
        .unwrap_or_else(|| "(unknown route)".to_string())
}

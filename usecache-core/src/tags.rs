//! Tagging and lifetime APIs callable from inside cached computations, plus
//! on-demand revalidation.

use crate::context;
use crate::error::CacheError;
use crate::invalidation::validate_tags;
use crate::lifetimes::{CacheLife, RevalidateStore};
use crate::request::RequestPhase;
use crate::work_unit::WorkUnit;

/// Revalidate store of the enclosing cache scope, or a contract violation.
fn cache_scope<'a>(unit: Option<&'a WorkUnit>, api: &str) -> Result<&'a RevalidateStore, CacheError> {
    match unit {
        Some(WorkUnit::Cache(store)) => Ok(&store.revalidate),
        Some(WorkUnit::PrivateCache(store)) => Ok(&store.revalidate),
        Some(
            WorkUnit::Request(_)
            | WorkUnit::UnstableCache(_)
            | WorkUnit::Prerender(_)
            | WorkUnit::PrerenderClient(_)
            | WorkUnit::PrerenderPpr(_)
            | WorkUnit::PrerenderLegacy(_),
        ) => Err(CacheError::contract(format!(
            "{api} can only be called inside a cached function"
        ))),
        None => Err(CacheError::outside(api)),
    }
}

/// Tags the entry being generated.
///
/// Invalid tags are dropped with a warning.
pub fn cache_tag<I, S>(tags: I) -> Result<(), CacheError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let unit = context::current();
    let store = cache_scope(unit.as_ref(), "cache_tag()")?;
    store.add_tags(validate_tags(tags, "cache_tag()"));
    Ok(())
}

/// Overrides the budgets of the entry being generated.
///
/// Calling it twice keeps the tighter value of each budget.
pub fn cache_life(life: CacheLife) -> Result<(), CacheError> {
    let unit = context::current();
    cache_scope(unit.as_ref(), "cache_life()")?.set_explicit(life);
    Ok(())
}

/// Like [`cache_life`] with a named profile; configured profiles shadow the
/// built-in ones.
pub fn cache_life_profile(name: &str) -> Result<(), CacheError> {
    let work_store = context::work_store().ok_or_else(|| CacheError::outside("cache_life()"))?;
    let life = work_store
        .runtime
        .config()
        .profile(name)
        .ok_or_else(|| CacheError::contract(format!("unknown cache life profile `{name}`")))?;
    cache_life(life)
}

/// Expires `tags` everywhere and remembers them for the rest of the request,
/// so later reads in the same request do not serve entries carrying them.
///
/// Only legal from actions and after-response work of a request.
pub async fn revalidate_tag<I, S>(tags: I) -> Result<(), CacheError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let work_store = context::work_store().ok_or_else(|| CacheError::outside("revalidate_tag()"))?;
    match context::current() {
        Some(WorkUnit::Cache(_) | WorkUnit::PrivateCache(_) | WorkUnit::UnstableCache(_)) => {
            return Err(CacheError::contract(format!(
                "route {} used revalidate_tag() inside a cached function",
                work_store.route
            )));
        }
        Some(
            WorkUnit::Prerender(_)
            | WorkUnit::PrerenderClient(_)
            | WorkUnit::PrerenderPpr(_)
            | WorkUnit::PrerenderLegacy(_),
        ) => {
            return Err(CacheError::contract(format!(
                "route {} used revalidate_tag() during prerendering",
                work_store.route
            )));
        }
        Some(WorkUnit::Request(store)) if store.phase() == RequestPhase::Render => {
            return Err(CacheError::contract(format!(
                "route {} used revalidate_tag() during render",
                work_store.route
            )));
        }
        Some(WorkUnit::Request(_)) | None => {}
    }

    let tags = work_store.runtime.revalidate_tag(tags).await;
    work_store.record_revalidated_tags(&tags);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::runtime::CacheRuntime;
    use crate::work_store::WorkStore;
    use crate::work_unit::{InheritedFields, RequestStore, UseCacheStore};

    fn cache_unit() -> (WorkUnit, Arc<UseCacheStore>) {
        let store = Arc::new(UseCacheStore::new(InheritedFields::default(), CacheLife::DEFAULT));
        (WorkUnit::Cache(Arc::clone(&store)), store)
    }

    #[test]
    fn test_cache_tag_outside_cache_scope_fails() {
        assert!(matches!(
            cache_tag(["a"]),
            Err(CacheError::OutsideWorkUnit { .. })
        ));
        let err = context::run_sync(RequestStore::new("/").into_unit(), || cache_tag(["a"]));
        assert!(err.unwrap_err().is_contract_violation());
    }

    #[test]
    fn test_cache_tag_appends_to_the_scope() {
        let (unit, store) = cache_unit();
        context::run_sync(unit, || {
            cache_tag(["a", "b"]).unwrap();
            cache_tag(["a", "x".repeat(300).as_str()]).unwrap();
        });
        assert_eq!(store.revalidate.tags(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_cache_life_keeps_the_tighter_value() {
        let (unit, store) = cache_unit();
        context::run_sync(unit, || {
            cache_life(CacheLife::HOURS).unwrap();
            cache_life(CacheLife::MINUTES).unwrap();
        });
        assert_eq!(store.revalidate.effective().revalidate, 60);
    }

    #[tokio::test]
    async fn test_cache_life_profile_resolves_builtins() {
        let work_store = WorkStore::new("/", Arc::new(CacheRuntime::new("v1"))).into_shared();
        let (unit, store) = cache_unit();
        context::enter(work_store, Some(unit), async {
            cache_life_profile("seconds").unwrap();
            assert!(cache_life_profile("nope").unwrap_err().is_contract_violation());
        })
        .await;
        assert_eq!(store.revalidate.effective().revalidate, 1);
    }

    #[tokio::test]
    async fn test_revalidate_tag_is_illegal_during_render() {
        let work_store = WorkStore::new("/", Arc::new(CacheRuntime::new("v1"))).into_shared();
        let unit = RequestStore::new("/").into_unit();
        let err = context::enter(work_store, Some(unit), revalidate_tag(["a"]))
            .await
            .unwrap_err();
        assert!(err.is_contract_violation());
    }

    #[tokio::test]
    async fn test_revalidate_tag_in_action_records_tags() {
        let runtime = Arc::new(CacheRuntime::new("v1"));
        let work_store = WorkStore::new("/", Arc::clone(&runtime)).into_shared();
        let unit = RequestStore::new("/")
            .with_phase(RequestPhase::Action)
            .into_unit();

        context::enter(Arc::clone(&work_store), Some(unit), revalidate_tag(["posts"]))
            .await
            .unwrap();
        assert!(work_store.was_revalidated(&["posts".to_string()]));
        assert!(runtime.tag_tracker().expiration(&["posts".to_string()]) > 0);
    }
}

//! Tests for the `#[use_cache]` attribute

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use usecache::work_unit::get_revalidate_store;
use usecache::{
    context, cookies, use_cache, CacheError, CacheLife, CacheRuntime, PrerenderStoreLegacy,
    PrerenderStoreModern, ReadonlyCookies, RequestStore, RouteParam, RouteParams, WorkStore,
};

static RENDERS: AtomicUsize = AtomicUsize::new(0);

#[use_cache(tags = ["users"])]
async fn get_user(id: u64) -> String {
    RENDERS.fetch_add(1, Ordering::SeqCst);
    format!("user #{id}")
}

#[use_cache(profile = "minutes", id = "reports#daily")]
async fn daily_report(day: String) -> String {
    format!("report for {day}")
}

#[use_cache(private)]
async fn greeting() -> Result<String, String> {
    match cookies() {
        Ok(cookies) => Ok(format!("hi {}", cookies.get("name").unwrap_or("anon"))),
        Err(err) => Err(format!("{err:?}")),
    }
}

#[use_cache(entry_point)]
async fn post_page(slug: RouteParam) -> Result<String, CacheError> {
    slug.value().await.map(|slug| format!("<h1>{slug}</h1>"))
}

#[use_cache(profile = "fortnightly")]
async fn unknown_profile() -> String {
    "never rendered".to_string()
}

fn work_store() -> Arc<WorkStore> {
    WorkStore::new("/", Arc::new(CacheRuntime::new("v1"))).into_shared()
}

#[tokio::test]
async fn test_repeated_calls_hit_the_cache() {
    let store = work_store();
    let unit = RequestStore::new("/users/7").into_unit();

    let (first, second) = context::enter(Arc::clone(&store), Some(unit), async {
        let first = get_user(7).await.unwrap().collect().await.unwrap();
        let second = get_user(7).await.unwrap().collect().await.unwrap();
        (first, second)
    })
    .await;

    assert_eq!(first, "user #7");
    assert_eq!(first, second);
    assert_eq!(RENDERS.load(Ordering::SeqCst), 1);

    let stats = store.runtime.stats("macro_tests::get_user").unwrap();
    assert_eq!(stats.hits(), 1);
    assert_eq!(stats.misses(), 1);

    assert_eq!(store.runtime.stats_ids(), vec!["macro_tests::get_user".to_string()]);
    assert!(store.runtime.reset_stats("macro_tests::get_user"));
    assert_eq!(store.runtime.stats("macro_tests::get_user").unwrap().hits(), 0);
    store.runtime.clear_stats();
    assert!(store.runtime.stats_ids().is_empty());
}

#[tokio::test]
async fn test_profile_and_tags_reach_the_outer_unit() {
    let unit = PrerenderStoreLegacy::new(RouteParams::default()).into_unit();

    let report = context::enter(work_store(), Some(unit.clone()), async {
        daily_report("monday".to_string()).await?.collect().await
    })
    .await
    .unwrap();
    assert_eq!(report, "report for monday");

    let revalidate = get_revalidate_store(&unit).unwrap();
    assert_eq!(revalidate.effective(), CacheLife::MINUTES);
    assert!(revalidate.tags().is_empty());
}

#[tokio::test]
async fn test_private_cache_sees_request_cookies() {
    let unit = RequestStore::new("/")
        .with_cookies(ReadonlyCookies::new([("name", "ada")]))
        .into_unit();

    let value = context::enter(work_store(), Some(unit), async {
        greeting().await?.collect().await
    })
    .await
    .unwrap();
    assert_eq!(value, "hi ada");
}

#[tokio::test]
async fn test_entry_point_with_fallback_parameter_is_dynamic() {
    let prerender = PrerenderStoreModern::new(RouteParams::new(
        Vec::<(String, String)>::new(),
        ["slug".to_string()],
    ));
    let slug = prerender.params.get("slug").unwrap();
    let unit = prerender.into_unit();

    let output = context::enter(work_store(), Some(unit), post_page(slug))
        .await
        .unwrap();
    assert!(output.is_dynamic());
}

#[tokio::test]
async fn test_entry_point_renders_known_parameter() {
    let params = RouteParams::known([("slug".to_string(), "hello".to_string())]);
    let slug = params.get("slug").unwrap();
    let unit = RequestStore::new("/blog/hello")
        .with_params(params)
        .into_unit();

    let page = context::enter(work_store(), Some(unit), async {
        post_page(slug).await?.collect().await
    })
    .await
    .unwrap();
    assert_eq!(page, "<h1>hello</h1>");
}

#[tokio::test]
async fn test_unknown_profile_fails_the_computation() {
    let unit = RequestStore::new("/").into_unit();
    let err = context::enter(work_store(), Some(unit), async {
        unknown_profile().await?.collect().await
    })
    .await
    .unwrap_err();
    assert!(err.to_string().contains("fortnightly"));
}

#[tokio::test]
async fn test_calls_outside_a_route_are_rejected() {
    let err = get_user(1).await.unwrap_err();
    assert!(matches!(err, CacheError::OutsideWorkUnit { .. }));
}

//! Cached computations served to live requests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;
use usecache::keys::CacheKeyBuilder;
use usecache::utils::now_ms;
use usecache::work_unit::{get_revalidate_store, UnstableCacheStore};
use usecache::{
    cache, cache_life, cache_tag, context, cookies, draft_mode, ready_entry, revalidate_tag, ByteStream,
    CacheArg, CacheEntry, CacheError, CacheKind, CacheLife, CachedFunction, CacheRuntime,
    PrerenderStoreLegacy, ReadonlyCookies, RequestPhase, RequestStore, RouteParams, WorkStore,
    WorkUnit, INFINITE_CACHE,
};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

fn work_store(build_id: &str) -> Arc<WorkStore> {
    WorkStore::new("/users/[id]", Arc::new(CacheRuntime::new(build_id))).into_shared()
}

fn request() -> WorkUnit {
    RequestStore::new("/users/42").into_unit()
}

/// `getUser(id)`: tagged `user:<id>`, revalidates after a minute.
fn get_user(calls: Arc<AtomicUsize>) -> CachedFunction {
    cache(CacheKind::Default, "getUser", vec![], move |args: Vec<CacheArg>| {
        let calls = Arc::clone(&calls);
        async move {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            let id = args[0].as_str().unwrap_or_default().to_string();
            cache_tag([format!("user:{id}")])?;
            cache_life(CacheLife::new(300, 60, INFINITE_CACHE))?;
            let name = if n == 0 { "Alice" } else { "Alice (v2)" };
            Ok::<_, CacheError>(name.to_string())
        }
    })
}

fn user_key(build_id: &str, id: &str) -> String {
    CacheKeyBuilder::new(build_id, "getUser")
        .args(vec![id.into()])
        .build()
        .unwrap()
        .as_str()
        .to_string()
}

async fn call_string(f: &CachedFunction, args: Vec<CacheArg>) -> Result<String, CacheError> {
    let bytes = f.call(args).await?.collect().await?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[tokio::test]
async fn test_user_is_cached_until_its_tag_expires() {
    init_tracing();
    let calls = Arc::new(AtomicUsize::new(0));
    let f = get_user(Arc::clone(&calls));
    let store = work_store("v1");

    let first = context::enter(Arc::clone(&store), Some(request()), call_string(&f, vec!["42".into()]))
        .await
        .unwrap();
    assert_eq!(first, "Alice");

    let handler = store.runtime.handler(None).unwrap();
    let entry = handler.get(&user_key("v1", "42"), &[]).await.unwrap().unwrap();
    assert_eq!(entry.revalidate, 60);
    assert_eq!(entry.tags, vec!["user:42".to_string()]);

    let second = context::enter(Arc::clone(&store), Some(request()), call_string(&f, vec!["42".into()]))
        .await
        .unwrap();
    assert_eq!(second, "Alice");
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_millis(2)).await;
    store.runtime.receive_expired_tags(&["user:42".to_string()]).await;

    let third = context::enter(Arc::clone(&store), Some(request()), call_string(&f, vec!["42".into()]))
        .await
        .unwrap();
    assert_eq!(third, "Alice (v2)");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_build_id_is_part_of_the_key() {
    init_tracing();
    assert_ne!(user_key("v1", "42"), user_key("v2", "42"));
    assert_eq!(user_key("v1", "42"), user_key("v1", "42"));
}

#[tokio::test]
async fn test_expired_entry_is_regenerated() {
    init_tracing();
    let calls = Arc::new(AtomicUsize::new(0));
    let f = get_user(Arc::clone(&calls));
    let store = work_store("v1");

    let handler = store.runtime.handler(None).unwrap();
    let old = CacheEntry::with_timestamp(
        "Mallory",
        now_ms() - 10_000,
        CacheLife::new(1, 1, 5),
        vec!["user:42".to_string()],
    );
    handler.set(&user_key("v1", "42"), ready_entry(old)).await.unwrap();

    let value = context::enter(store, Some(request()), call_string(&f, vec!["42".into()]))
        .await
        .unwrap();
    assert_eq!(value, "Alice");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_stale_entry_is_served_while_refreshing() {
    init_tracing();
    let calls = Arc::new(AtomicUsize::new(0));
    let f = get_user(Arc::clone(&calls));
    let store = work_store("v1");

    let handler = store.runtime.handler(None).unwrap();
    let stale = CacheEntry::with_timestamp(
        "Mallory",
        now_ms() - 5_000,
        CacheLife::new(0, 1, INFINITE_CACHE),
        vec!["user:42".to_string()],
    );
    handler.set(&user_key("v1", "42"), ready_entry(stale)).await.unwrap();

    let served = context::enter(Arc::clone(&store), Some(request()), call_string(&f, vec!["42".into()]))
        .await
        .unwrap();
    assert_eq!(served, "Mallory");

    store.wait_for_pending_revalidates().await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(store.pending_revalidates(), 0);

    let refreshed = context::enter(Arc::clone(&store), Some(request()), call_string(&f, vec!["42".into()]))
        .await
        .unwrap();
    assert_eq!(refreshed, "Alice");
}

#[tokio::test]
async fn test_nested_caches_propagate_tags_and_budgets() {
    init_tracing();
    let inner = cache(CacheKind::Default, "inner", vec![], |_: Vec<CacheArg>| async {
        cache_tag(["b"])?;
        cache_life(CacheLife::new(300, 10, INFINITE_CACHE))?;
        Ok::<_, CacheError>("inner")
    });
    let outer = cache(CacheKind::Default, "outer", vec![], move |_: Vec<CacheArg>| {
        let inner = inner.clone();
        async move {
            cache_tag(["a"])?;
            let nested = inner.call(vec![]).await?.collect().await?;
            Ok::<_, CacheError>(format!("outer({})", String::from_utf8_lossy(&nested)))
        }
    });

    let store = work_store("v1");
    let unit = PrerenderStoreLegacy::new(RouteParams::default()).into_unit();
    let value = context::enter(Arc::clone(&store), Some(unit.clone()), call_string(&outer, vec![]))
        .await
        .unwrap();
    assert_eq!(value, "outer(inner)");

    let key = CacheKeyBuilder::new("v1", "outer").build().unwrap();
    let entry = store.runtime.handler(None).unwrap().get(key.as_str(), &[]).await.unwrap().unwrap();
    assert_eq!(entry.revalidate, 10);
    let mut entry_tags = entry.tags.clone();
    entry_tags.sort();
    assert_eq!(entry_tags, vec!["a".to_string(), "b".to_string()]);

    let revalidate = get_revalidate_store(&unit).unwrap();
    assert_eq!(revalidate.effective().revalidate, 10);
    let mut tags = revalidate.tags();
    tags.sort();
    assert_eq!(tags, vec!["a".to_string(), "b".to_string()]);
}

#[tokio::test]
async fn test_caller_and_cache_see_the_same_bytes() {
    init_tracing();
    let chunked = cache(CacheKind::Default, "chunked", vec![], |_: Vec<CacheArg>| async {
        let (mut writer, stream) = ByteStream::channel();
        tokio::spawn(async move {
            for chunk in ["<ul>", "<li>one</li>", "<li>two</li>", "</ul>"] {
                writer.push(chunk);
                tokio::task::yield_now().await;
            }
            writer.finish();
        });
        stream
    });
    let store = work_store("v1");

    let (generated, replayed) = context::enter(store, Some(request()), async {
        let generated = chunked.call(vec![]).await.unwrap().collect().await.unwrap();
        let replayed = chunked.call(vec![]).await.unwrap().collect().await.unwrap();
        (generated, replayed)
    })
    .await;
    assert_eq!(generated, "<ul><li>one</li><li>two</li></ul>");
    assert_eq!(generated, replayed);
}

#[tokio::test]
async fn test_concurrent_requests_do_not_share_units() {
    init_tracing();
    let store = work_store("v1");

    let handles: Vec<_> = ["alice", "bob", "carol"]
        .into_iter()
        .map(|user| {
            let unit = RequestStore::new("/")
                .with_cookies(ReadonlyCookies::new([("session", user)]))
                .into_unit();
            tokio::spawn(context::enter(Arc::clone(&store), Some(unit), async move {
                tokio::task::yield_now().await;
                cookies().unwrap().get("session").map(str::to_string)
            }))
        })
        .collect();

    let mut seen = Vec::new();
    for handle in handles {
        seen.push(handle.await.unwrap().unwrap());
    }
    assert_eq!(seen, vec!["alice", "bob", "carol"]);
    assert!(context::current().is_none());
}

#[tokio::test]
async fn test_request_data_inside_public_cache_is_rejected() {
    init_tracing();
    let leaky = cache(CacheKind::Default, "leaky", vec![], |_: Vec<CacheArg>| async {
        match cookies() {
            Ok(_) => Ok("read cookies".to_string()),
            Err(err) => Err(format!("{err:?}")),
        }
    });

    let err = context::enter(work_store("v1"), Some(request()), call_string(&leaky, vec![]))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("shared cache scope"));
}

#[tokio::test]
async fn test_tagging_outside_a_cache_is_rejected() {
    init_tracing();
    assert!(matches!(
        cache_tag(["x"]),
        Err(CacheError::OutsideWorkUnit { .. })
    ));

    let err = context::enter(work_store("v1"), Some(request()), async { cache_life(CacheLife::HOURS) })
        .await
        .unwrap_err();
    assert!(err.is_contract_violation());
}

#[tokio::test]
async fn test_private_cache_reads_cookies_and_skips_the_handler() {
    init_tracing();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let greeting = cache(CacheKind::Private, "greeting", vec![], move |_: Vec<CacheArg>| {
        counter.fetch_add(1, Ordering::SeqCst);
        async {
            match cookies() {
                Ok(cookies) => Ok(format!("hi {}", cookies.get("name").unwrap_or("anon"))),
                Err(err) => Err(format!("{err:?}")),
            }
        }
    });
    let store = work_store("v1");

    for name in ["ada", "grace"] {
        let unit = RequestStore::new("/")
            .with_cookies(ReadonlyCookies::new([("name", name)]))
            .into_unit();
        let value = context::enter(Arc::clone(&store), Some(unit), call_string(&greeting, vec![]))
            .await
            .unwrap();
        assert_eq!(value, format!("hi {name}"));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_private_cache_inside_legacy_named_cache_sees_no_cookies() {
    init_tracing();
    let greeting = cache(CacheKind::Private, "greeting", vec![], |_: Vec<CacheArg>| async {
        match cookies() {
            Ok(cookies) => Ok(format!("hi {}", cookies.get("name").unwrap_or("anon"))),
            Err(err) => Err(format!("{err:?}")),
        }
    });
    let unit = WorkUnit::UnstableCache(Arc::new(UnstableCacheStore::new(None)));

    let value = context::enter(work_store("v1"), Some(unit), call_string(&greeting, vec![]))
        .await
        .unwrap();
    assert_eq!(value, "hi anon");
}

#[tokio::test]
async fn test_revalidate_tag_in_action_hides_entries_for_the_rest_of_the_request() {
    init_tracing();
    let calls = Arc::new(AtomicUsize::new(0));
    let f = get_user(Arc::clone(&calls));
    let store = work_store("v1");

    let unit = RequestStore::new("/users/42")
        .with_phase(RequestPhase::Action)
        .into_unit();
    let after = context::enter(Arc::clone(&store), Some(unit), async {
        call_string(&f, vec!["42".into()]).await.unwrap();
        revalidate_tag(["user:42"]).await.unwrap();
        call_string(&f, vec!["42".into()]).await.unwrap()
    })
    .await;

    assert_eq!(after, "Alice (v2)");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(store.revalidated_tags(), vec!["user:42".to_string()]);
}

#[tokio::test]
async fn test_revalidate_tag_during_render_is_rejected() {
    init_tracing();
    let err = context::enter(work_store("v1"), Some(request()), revalidate_tag(["user:42"]))
        .await
        .unwrap_err();
    assert!(err.is_contract_violation());
}

#[tokio::test]
async fn test_stale_entry_is_refreshed_once_per_key() {
    init_tracing();
    let calls = Arc::new(AtomicUsize::new(0));
    let f = get_user(Arc::clone(&calls));
    let store = work_store("v1");

    let handler = store.runtime.handler(None).unwrap();
    let stale = CacheEntry::with_timestamp(
        "Mallory",
        now_ms() - 5_000,
        CacheLife::new(0, 1, INFINITE_CACHE),
        vec!["user:42".to_string()],
    );
    handler.set(&user_key("v1", "42"), ready_entry(stale)).await.unwrap();

    let first = context::enter(Arc::clone(&store), Some(request()), async {
        let first = call_string(&f, vec!["42".into()]).await.unwrap();
        for _ in 0..4 {
            call_string(&f, vec!["42".into()]).await.unwrap();
        }
        first
    })
    .await;
    assert_eq!(first, "Mallory");

    store.wait_for_pending_revalidates().await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let refreshed = context::enter(Arc::clone(&store), Some(request()), call_string(&f, vec!["42".into()]))
        .await
        .unwrap();
    assert_eq!(refreshed, "Alice");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_draft_request_never_shares_a_generation() {
    init_tracing();
    let preview = cache(CacheKind::Default, "preview", vec![], |_: Vec<CacheArg>| async {
        tokio::time::sleep(Duration::from_millis(30)).await;
        let draft = draft_mode().map(|provider| provider.is_enabled()).unwrap_or(false);
        Ok::<_, CacheError>(if draft { "DRAFT-CONTENT" } else { "public" })
    });
    let store = work_store("v1");

    let draft_unit = RequestStore::new("/preview").with_draft_mode(true).into_unit();
    let draft = tokio::spawn(context::enter(Arc::clone(&store), Some(draft_unit), {
        let preview = preview.clone();
        async move { call_string(&preview, vec![]).await }
    }));
    tokio::time::sleep(Duration::from_millis(5)).await;
    let normal = tokio::spawn(context::enter(Arc::clone(&store), Some(request()), {
        let preview = preview.clone();
        async move { call_string(&preview, vec![]).await }
    }));

    assert_eq!(draft.await.unwrap().unwrap(), "DRAFT-CONTENT");
    assert_eq!(normal.await.unwrap().unwrap(), "public");

    let key = CacheKeyBuilder::new("v1", "preview").build().unwrap();
    let stored = store.runtime.handler(None).unwrap().get(key.as_str(), &[]).await.unwrap().unwrap();
    assert_eq!(stored.value.collect().await.unwrap(), "public");
}

#[tokio::test]
async fn test_legacy_named_cache_collects_nested_budgets() {
    init_tracing();
    let profile = cache(CacheKind::Default, "profile", vec![], |_: Vec<CacheArg>| async {
        cache_tag(["profile"])?;
        cache_life(CacheLife::new(300, 30, INFINITE_CACHE))?;
        Ok::<_, CacheError>("profile")
    });
    let unit = WorkUnit::UnstableCache(Arc::new(UnstableCacheStore::new(None)));

    let value = context::enter(work_store("v1"), Some(unit.clone()), call_string(&profile, vec![]))
        .await
        .unwrap();
    assert_eq!(value, "profile");

    let revalidate = get_revalidate_store(&unit).unwrap();
    assert_eq!(revalidate.effective().revalidate, 30);
    assert_eq!(revalidate.tags(), vec!["profile".to_string()]);
}

//! # Cached computations
//!
//! [`cache`] turns an async computation into a [`CachedFunction`]. Each call
//! decides, from the active work unit, whether the result may be served from
//! a cache, must be generated, or has to become a dynamic hole:
//!
//! 1. classify the call against the outer unit (some nestings are contract
//!    violations, some become holes immediately)
//! 2. derive the key from build id, computation id and arguments
//! 3. probe the resume data cache of the current pass
//! 4. probe the cache handler (public caches only)
//! 5. on a miss, generate inside a fresh cache scope, racing a timeout and
//!    dynamic accesses during modern prerenders
//! 6. fold budgets and tags into the outer unit, tee the result to the
//!    caller and to the stores
//!
//! Stale hits outside static passes are served immediately while a refresh
//! runs in the background, one refresh per key at a time.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{debug, error, warn};

use crate::cache_entry::{pending_entry, ready_entry, CacheEntry};
use crate::context;
use crate::dynamic::{self, postpone_with_tracking, DynamicAccessTracker, HangingPlaceholder};
use crate::error::{CacheError, ComputationError, KeyError, StreamError};
use crate::keys::{CacheArg, CacheKeyBuilder, FallbackParams};
use crate::lifetimes::CacheLife;
use crate::runtime::CacheRuntime;
use crate::signal::CacheReadGuard;
use crate::store::CacheHandler;
use crate::stream::ByteStream;
use crate::utils::now_ms;
use crate::work_store::WorkStore;
use crate::work_unit::{
    get_cache_signal, get_draft_mode_provider, get_hmr_refresh_hash, get_implicit_tags,
    get_prerender_resume_data_cache, get_render_resume_data_cache, get_revalidate_store,
    inherited_fields, PrerenderStoreModern, PrivateUseCacheStore, UseCacheStore, WorkUnit,
};

/// Which cache a computation is memoized in.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CacheKind {
    /// Public cache served by the default handler.
    #[default]
    Default,
    /// Public cache served by a handler registered under this name.
    Named(String),
    /// Per-request cache; may read cookies and headers, never reaches a handler.
    Private,
}

impl CacheKind {
    pub fn is_private(&self) -> bool {
        matches!(self, CacheKind::Private)
    }

    fn handler_name(&self) -> Option<&str> {
        match self {
            CacheKind::Named(name) => Some(name),
            CacheKind::Default | CacheKind::Private => None,
        }
    }
}

impl fmt::Display for CacheKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKind::Default => f.write_str("default"),
            CacheKind::Named(name) => f.write_str(name),
            CacheKind::Private => f.write_str("private"),
        }
    }
}

/// What a cached call hands back.
#[derive(Debug)]
pub enum CacheOutput {
    /// The rendered value, possibly ending in a replayed error.
    Stream(ByteStream),
    /// A value that is never produced during this pass.
    Hanging(HangingPlaceholder),
}

impl CacheOutput {
    pub fn into_stream(self) -> Option<ByteStream> {
        match self {
            CacheOutput::Stream(stream) => Some(stream),
            CacheOutput::Hanging(_) => None,
        }
    }

    pub fn into_placeholder(self) -> Option<HangingPlaceholder> {
        match self {
            CacheOutput::Stream(_) => None,
            CacheOutput::Hanging(placeholder) => Some(placeholder),
        }
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self, CacheOutput::Hanging(_))
    }

    /// Reads the whole value. A hanging placeholder reports the dynamic usage
    /// that caused it.
    pub async fn collect(self) -> Result<Bytes, CacheError> {
        match self {
            CacheOutput::Stream(stream) => Ok(stream.collect().await?),
            CacheOutput::Hanging(placeholder) => Err(CacheError::DynamicUsage {
                route: placeholder.route().to_string(),
                expression: placeholder.expression().to_string(),
            }),
        }
    }
}

/// Values a computation may produce.
pub trait IntoRendered {
    fn into_rendered(self) -> Result<ByteStream, ComputationError>;
}

impl IntoRendered for ByteStream {
    fn into_rendered(self) -> Result<ByteStream, ComputationError> {
        Ok(self)
    }
}

impl IntoRendered for Bytes {
    fn into_rendered(self) -> Result<ByteStream, ComputationError> {
        Ok(ByteStream::from_bytes(self))
    }
}

impl IntoRendered for String {
    fn into_rendered(self) -> Result<ByteStream, ComputationError> {
        Ok(ByteStream::from(self))
    }
}

impl IntoRendered for &'static str {
    fn into_rendered(self) -> Result<ByteStream, ComputationError> {
        Ok(ByteStream::from(self))
    }
}

impl IntoRendered for Vec<u8> {
    fn into_rendered(self) -> Result<ByteStream, ComputationError> {
        Ok(ByteStream::from(self))
    }
}

impl<T, E> IntoRendered for Result<T, E>
where
    T: IntoRendered,
    E: fmt::Display,
{
    fn into_rendered(self) -> Result<ByteStream, ComputationError> {
        match self {
            Ok(value) => value.into_rendered(),
            Err(err) => Err(ComputationError::new(err.to_string())),
        }
    }
}

/// The body of a cached function.
///
/// Receives bound arguments followed by call arguments. Implemented for every
/// `Fn(Vec<CacheArg>) -> impl Future` whose output is [`IntoRendered`].
pub trait Computation: Send + Sync + 'static {
    fn invoke(&self, args: Vec<CacheArg>) -> BoxFuture<'static, Result<ByteStream, ComputationError>>;
}

impl<F, Fut> Computation for F
where
    F: Fn(Vec<CacheArg>) -> Fut + Send + Sync + 'static,
    Fut: Future + Send + 'static,
    Fut::Output: IntoRendered,
{
    fn invoke(&self, args: Vec<CacheArg>) -> BoxFuture<'static, Result<ByteStream, ComputationError>> {
        let fut = self(args);
        async move { fut.await.into_rendered() }.boxed()
    }
}

#[derive(Clone)]
struct CachedInner {
    kind: CacheKind,
    id: String,
    bound: Vec<CacheArg>,
    computation: Arc<dyn Computation>,
    entry_point: bool,
}

/// A memoized computation. Cheap to clone.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use usecache_core::{cache, context, CacheKind, CacheRuntime, RequestStore, WorkStore};
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let greet = cache(CacheKind::Default, "greet", vec![], |args: Vec<usecache_core::CacheArg>| async move {
///     format!("hello {}", args[0].as_str().unwrap_or("?"))
/// });
///
/// let store = WorkStore::new("/", Arc::new(CacheRuntime::new("v1"))).into_shared();
/// let unit = RequestStore::new("/").into_unit();
/// let value = context::enter(store, Some(unit), async {
///     greet.call(vec!["world".into()]).await?.collect().await
/// })
/// .await
/// .unwrap();
/// assert_eq!(value, "hello world");
/// # });
/// ```
#[derive(Clone)]
pub struct CachedFunction {
    inner: Arc<CachedInner>,
}

/// Wraps `computation` as a cached function.
///
/// `id` must be unique and stable across builds; `bound_args` are prepended
/// to every call's arguments and are part of the key.
pub fn cache<C>(kind: CacheKind, id: impl Into<String>, bound_args: Vec<CacheArg>, computation: C) -> CachedFunction
where
    C: Computation,
{
    CachedFunction {
        inner: Arc::new(CachedInner {
            kind,
            id: id.into(),
            bound: bound_args,
            computation: Arc::new(computation),
            entry_point: false,
        }),
    }
}

enum Generated {
    Entry(CacheEntry),
    Hole(String),
    TimedOut(ByteStream),
}

#[derive(Clone, Copy)]
enum Outcome {
    Hit,
    StaleHit,
    Miss,
    DynamicHole,
}

impl CachedFunction {
    /// Marks the function as a route entry point. Entry points encode fallback
    /// parameters by name and may be skipped entirely when the pass allows an
    /// empty static shell.
    pub fn entry_point(mut self) -> Self {
        Arc::make_mut(&mut self.inner).entry_point = true;
        self
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn kind(&self) -> &CacheKind {
        &self.inner.kind
    }

    pub fn is_entry_point(&self) -> bool {
        self.inner.entry_point
    }

    /// Runs the cached function with `args` in the current work unit.
    pub async fn call(&self, args: Vec<CacheArg>) -> Result<CacheOutput, CacheError> {
        let work_store = context::work_store()
            .ok_or_else(|| CacheError::outside(format!("cached function `{}`", self.inner.id)))?;
        let outer = context::current();
        let outer = outer.as_ref();
        let runtime = Arc::clone(&work_store.runtime);
        let route = work_store.route.clone();

        if let Some(early) = self.classify(outer, &route).await? {
            record(&runtime, &self.inner.id, Outcome::DynamicHole);
            return Ok(early);
        }

        let handler = match self.inner.kind {
            CacheKind::Private => None,
            CacheKind::Default | CacheKind::Named(_) => {
                Some(runtime.handler(self.inner.kind.handler_name())?)
            }
        };

        let salt = if runtime.config().dev {
            outer.and_then(get_hmr_refresh_hash)
        } else {
            None
        };
        let policy = if self.inner.entry_point {
            FallbackParams::EncodeByName
        } else {
            FallbackParams::Reject
        };
        let key = CacheKeyBuilder::new(runtime.build_id(), &self.inner.id)
            .bound(self.inner.bound.clone())
            .args(args.clone())
            .refresh_salt(salt.as_deref())
            .fallback_params(policy)
            .build();
        let key = match key {
            Ok(key) => key.as_str().to_string(),
            Err(KeyError::DynamicAccess { param }) => {
                debug!(id = %self.inner.id, %route, %param, "arguments depend on a fallback parameter");
                record(&runtime, &self.inner.id, Outcome::DynamicHole);
                return dynamic_hole(outer, &route, &format!("params.{param}")).await;
            }
        };

        let prerendering = outer.is_some_and(WorkUnit::is_prerender);
        let read = outer
            .and_then(get_cache_signal)
            .map(|signal| signal.begin_read());

        if let Some(rdc) = outer.and_then(get_render_resume_data_cache) {
            if let Some(pending) = rdc.get(&key) {
                if let Some(entry) = pending.await {
                    if matches!(outer, Some(WorkUnit::Prerender(_)))
                        && (entry.revalidate == 0
                            || entry.expire < runtime.config().dynamic_expire_secs)
                    {
                        drop(read);
                        debug!(id = %self.inner.id, %key, "short-lived entry during prerender");
                        record(&runtime, &self.inner.id, Outcome::DynamicHole);
                        return dynamic_hole(outer, &route, "short-lived cache").await;
                    }
                    debug!(id = %self.inner.id, %key, "resume data cache hit");
                    record(&runtime, &self.inner.id, Outcome::Hit);
                    propagate(outer, entry.life(), &entry.tags);
                    if let Some(prerender_rdc) = outer.and_then(get_prerender_resume_data_cache) {
                        if !prerender_rdc.contains(&key) {
                            prerender_rdc.set(&key, ready_entry(entry.clone()));
                        }
                    }
                    return Ok(CacheOutput::Stream(with_read(entry.value, read)));
                }
            }
        }

        if self.inner.entry_point {
            if let Some(WorkUnit::Prerender(store)) = outer {
                if store.allow_empty_static_shell {
                    drop(read);
                    debug!(id = %self.inner.id, "skipping entry point, empty static shell allowed");
                    record(&runtime, &self.inner.id, Outcome::DynamicHole);
                    return Ok(CacheOutput::Hanging(HangingPlaceholder::new(
                        &store.render_signal,
                        route,
                        "entry point",
                    )));
                }
            }
        }

        let draft = is_draft_mode(outer, &work_store);
        let bypass = bypasses_handler(outer, &work_store, draft);
        if let Some(handler) = &handler {
            if bypass {
                debug!(id = %self.inner.id, %key, "bypassing cache handler");
            } else if let Some(entry) = probe_handler(&**handler, &key, outer, &work_store).await {
                let now = now_ms();
                let stale = entry.is_stale(now);
                let static_pass = prerendering || work_store.is_static_generation;
                if !entry.is_expired(now) && !(static_pass && stale) {
                    return Ok(self.serve_hit(entry, stale, &key, outer, &work_store, handler, args, read));
                }
                debug!(id = %self.inner.id, %key, stale, "regenerating entry");
            }
        }

        record(&runtime, &self.inner.id, Outcome::Miss);
        let unit = self.scope_for(outer, &runtime);
        let generation = Generation {
            work_store: Arc::clone(&work_store),
            unit,
            computation: Arc::clone(&self.inner.computation),
            args: self.full_args(args),
        };

        let mut started = true;
        let generated = if let Some(WorkUnit::Prerender(store)) = outer {
            self.generate_in_prerender(store, generation, &work_store).await
        } else if handler.is_some() && !bypass && !dynamic::is_tracking() {
            // bypassing calls never join or lend a generation: draft content
            // must not reach other requests
            let pending = pending_entry(generation.run().map(Some));
            let (pending, fresh) = runtime.join_or_start(&key, pending);
            started = fresh;
            let _in_flight = fresh.then(|| InFlight {
                runtime: Arc::clone(&runtime),
                key: key.clone(),
            });
            match pending.await {
                Some(entry) => Generated::Entry(entry),
                None => Generated::TimedOut(ByteStream::errored(StreamError::Aborted)),
            }
        } else {
            Generated::Entry(generation.run().await)
        };

        let entry = match generated {
            Generated::Entry(entry) => entry,
            Generated::Hole(expression) => {
                drop(read);
                record(&runtime, &self.inner.id, Outcome::DynamicHole);
                return dynamic_hole(outer, &route, &expression).await;
            }
            Generated::TimedOut(stream) => return Ok(CacheOutput::Stream(stream)),
        };

        debug!(id = %self.inner.id, %key, revalidate = entry.revalidate, tags = ?entry.tags, "generated entry");
        propagate(outer, entry.life(), &entry.tags);
        if let Some(prerender_rdc) = outer.and_then(get_prerender_resume_data_cache) {
            prerender_rdc.set(&key, ready_entry(entry.clone()));
        }
        if let Some(handler) = &handler {
            if started && !draft {
                if let Err(err) = handler.set(&key, ready_entry(entry.clone())).await {
                    warn!(id = %self.inner.id, %key, error = %err, "failed to store cache entry");
                }
            }
        }
        Ok(CacheOutput::Stream(with_read(entry.value, read)))
    }

    /// Checks the outer unit before any work. `Some` short-circuits the call.
    async fn classify(&self, outer: Option<&WorkUnit>, route: &str) -> Result<Option<CacheOutput>, CacheError> {
        match (&self.inner.kind, outer) {
            (_, Some(WorkUnit::PrerenderClient(_))) => Err(CacheError::contract(format!(
                "cached function `{}` was called while prerendering client components",
                self.inner.id
            ))),
            (CacheKind::Private, Some(WorkUnit::Cache(_))) => Err(CacheError::contract(format!(
                "private cache `{}` cannot be used inside a public cache",
                self.inner.id
            ))),
            (CacheKind::Private, Some(unit @ (WorkUnit::Prerender(_) | WorkUnit::PrerenderPpr(_) | WorkUnit::PrerenderLegacy(_)))) => {
                dynamic_hole(Some(unit), route, "private cache").await.map(Some)
            }
            (
                CacheKind::Private,
                None
                | Some(
                    WorkUnit::Request(_) | WorkUnit::PrivateCache(_) | WorkUnit::UnstableCache(_),
                ),
            ) => Ok(None),
            (
                CacheKind::Default | CacheKind::Named(_),
                None
                | Some(
                    WorkUnit::Request(_)
                    | WorkUnit::Cache(_)
                    | WorkUnit::PrivateCache(_)
                    | WorkUnit::UnstableCache(_)
                    | WorkUnit::Prerender(_)
                    | WorkUnit::PrerenderPpr(_)
                    | WorkUnit::PrerenderLegacy(_),
                ),
            ) => Ok(None),
        }
    }

    /// The unit a generation runs in.
    fn scope_for(&self, outer: Option<&WorkUnit>, runtime: &CacheRuntime) -> WorkUnit {
        let inherited = inherited_fields(outer);
        let default_life = runtime.config().default_life();
        match self.inner.kind {
            CacheKind::Private => {
                let (cookies, headers) = match outer {
                    Some(WorkUnit::Request(store)) => (store.cookies.clone(), store.headers.clone()),
                    Some(WorkUnit::PrivateCache(store)) => (store.cookies.clone(), store.headers.clone()),
                    Some(
                        WorkUnit::Cache(_)
                        | WorkUnit::UnstableCache(_)
                        | WorkUnit::Prerender(_)
                        | WorkUnit::PrerenderClient(_)
                        | WorkUnit::PrerenderPpr(_)
                        | WorkUnit::PrerenderLegacy(_),
                    )
                    | None => Default::default(),
                };
                WorkUnit::PrivateCache(Arc::new(PrivateUseCacheStore::new(
                    inherited,
                    cookies,
                    headers,
                    default_life,
                )))
            }
            CacheKind::Default | CacheKind::Named(_) => {
                WorkUnit::Cache(Arc::new(UseCacheStore::new(inherited, default_life)))
            }
        }
    }

    fn full_args(&self, args: Vec<CacheArg>) -> Vec<CacheArg> {
        self.inner.bound.iter().cloned().chain(args).collect()
    }

    /// Generates under a modern prerender, racing the timeout, the pass's
    /// render signal and dynamic accesses.
    async fn generate_in_prerender(
        &self,
        store: &PrerenderStoreModern,
        generation: Generation,
        work_store: &WorkStore,
    ) -> Generated {
        let tracker = DynamicAccessTracker::new();
        let timeout = work_store.runtime.config().use_cache_timeout();
        let rendering = tracker.scope(generation.run());

        tokio::select! {
            biased;
            entry = rendering => Generated::Entry(entry),
            _ = tracker.triggered() => {
                Generated::Hole(tracker.expression().unwrap_or_else(|| "dynamic access".to_string()))
            }
            _ = store.render_signal.cancelled() => Generated::Hole("prerender aborted".to_string()),
            _ = tokio::time::sleep(timeout) => {
                let route = work_store.route.clone();
                let recorded = work_store.set_invalid_dynamic_usage_error(CacheError::Timeout {
                    route: route.clone(),
                    timeout,
                });
                if recorded {
                    error!(id = %self.inner.id, %route, ?timeout, "filling a cache during prerender timed out");
                }
                Generated::TimedOut(ByteStream::errored(StreamError::Timeout { route, timeout }))
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn serve_hit(
        &self,
        entry: CacheEntry,
        stale: bool,
        key: &str,
        outer: Option<&WorkUnit>,
        work_store: &Arc<WorkStore>,
        handler: &Arc<dyn CacheHandler>,
        args: Vec<CacheArg>,
        read: Option<CacheReadGuard>,
    ) -> CacheOutput {
        let runtime = &work_store.runtime;
        debug!(id = %self.inner.id, %key, stale, "cache hit");
        propagate(outer, entry.life(), &entry.tags);
        if let Some(prerender_rdc) = outer.and_then(get_prerender_resume_data_cache) {
            prerender_rdc.set(key, ready_entry(entry.clone()));
        }
        if stale && !outer.is_some_and(WorkUnit::is_prerender) {
            record(runtime, &self.inner.id, Outcome::StaleHit);
            self.spawn_refresh(work_store, Arc::clone(handler), key.to_string(), args);
        } else {
            record(runtime, &self.inner.id, Outcome::Hit);
        }
        CacheOutput::Stream(with_read(entry.value, read))
    }

    /// Regenerates a stale entry detached from the current unit.
    fn spawn_refresh(&self, work_store: &Arc<WorkStore>, handler: Arc<dyn CacheHandler>, key: String, args: Vec<CacheArg>) {
        if !work_store.runtime.start_refresh(&key) {
            debug!(id = %self.inner.id, %key, "background revalidation already running");
            return;
        }
        let refreshing = Refreshing {
            runtime: Arc::clone(&work_store.runtime),
            key: key.clone(),
        };
        let generation = Generation {
            work_store: Arc::clone(work_store),
            unit: self.scope_for(None, &work_store.runtime),
            computation: Arc::clone(&self.inner.computation),
            args: self.full_args(args),
        };
        let id = self.inner.id.clone();
        let refresh = async move {
            let _refreshing = refreshing;
            let entry = generation.run().await;
            match handler.set(&key, ready_entry(entry)).await {
                Ok(()) => debug!(%id, %key, "background revalidation stored"),
                Err(err) => warn!(%id, %key, error = %err, "background revalidation failed"),
            }
        };
        let handle = tokio::spawn(context::enter(Arc::clone(work_store), None, refresh));
        work_store.track_revalidate(handle);
    }
}

impl fmt::Debug for CachedFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedFunction")
            .field("kind", &self.inner.kind)
            .field("id", &self.inner.id)
            .field("bound", &self.inner.bound.len())
            .field("entry_point", &self.inner.entry_point)
            .finish_non_exhaustive()
    }
}

/// One run of a computation inside its cache scope.
struct Generation {
    work_store: Arc<WorkStore>,
    unit: WorkUnit,
    computation: Arc<dyn Computation>,
    args: Vec<CacheArg>,
}

impl Generation {
    /// Runs to completion. Computation failures end the stream with an error;
    /// the value is drained so every tag reported while streaming is seen.
    async fn run(self) -> CacheEntry {
        let timestamp = now_ms();
        let unit = self.unit.clone();
        let computation = self.computation;
        let args = self.args;
        let value = context::enter(self.work_store, Some(self.unit), async move {
            let stream = match computation.invoke(args).await {
                Ok(stream) => stream,
                Err(err) => ByteStream::errored(StreamError::Computation(err.0)),
            };
            let (chunks, end) = stream.drain().await;
            ByteStream::from_parts(chunks, end)
        })
        .await;

        let (life, tags) = match get_revalidate_store(&unit) {
            Some(store) => (store.effective(), store.tags()),
            None => (CacheLife::DEFAULT, Vec::new()),
        };
        CacheEntry::with_timestamp(value, timestamp, life, tags)
    }
}

/// Removes a single-flight registration when the generating call finishes or
/// is dropped.
struct InFlight {
    runtime: Arc<CacheRuntime>,
    key: String,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.runtime.finish_in_flight(&self.key);
    }
}

/// Releases the background refresh claim on `key`.
struct Refreshing {
    runtime: Arc<CacheRuntime>,
    key: String,
}

impl Drop for Refreshing {
    fn drop(&mut self) {
        self.runtime.finish_refresh(&self.key);
    }
}

/// Turns a request-data dependency into whatever the outer unit uses for it.
async fn dynamic_hole(outer: Option<&WorkUnit>, route: &str, expression: &str) -> Result<CacheOutput, CacheError> {
    match outer {
        Some(WorkUnit::Prerender(store)) => Ok(CacheOutput::Hanging(HangingPlaceholder::new(
            &store.render_signal,
            route,
            expression,
        ))),
        Some(WorkUnit::PrerenderPpr(store)) => Err(postpone_with_tracking(
            route,
            expression,
            Some(&store.dynamic_tracking),
        )),
        Some(WorkUnit::PrerenderLegacy(store)) => {
            store.revalidate.force_dynamic();
            Err(dynamic_usage(route, expression))
        }
        Some(WorkUnit::PrerenderClient(_)) => Err(CacheError::contract(format!(
            "`{expression}` was used while prerendering client components"
        ))),
        Some(
            WorkUnit::Request(_)
            | WorkUnit::Cache(_)
            | WorkUnit::PrivateCache(_)
            | WorkUnit::UnstableCache(_),
        )
        | None => {
            // nested under a generation that races dynamic accesses
            if dynamic::report_access(expression) {
                return std::future::pending().await;
            }
            Err(dynamic_usage(route, expression))
        }
    }
}

fn dynamic_usage(route: &str, expression: &str) -> CacheError {
    CacheError::DynamicUsage {
        route: route.to_string(),
        expression: expression.to_string(),
    }
}

/// Reads `key` from the handler and drops entries invalidated by tags.
async fn probe_handler(
    handler: &dyn CacheHandler,
    key: &str,
    outer: Option<&WorkUnit>,
    work_store: &WorkStore,
) -> Option<CacheEntry> {
    let implicit = outer.and_then(get_implicit_tags).unwrap_or_default();
    let entry = match handler.get(key, &implicit.tags).await {
        Ok(entry) => entry?,
        Err(err) => {
            warn!(%key, error = %err, "cache handler read failed, treating as miss");
            return None;
        }
    };
    if entry.timestamp < implicit.expiration {
        debug!(%key, "entry predates revalidation of the route");
        return None;
    }
    let prerendering = outer.is_some_and(WorkUnit::is_prerender);
    if !prerendering
        && (work_store.was_revalidated(&entry.tags) || work_store.was_revalidated(&implicit.tags))
    {
        debug!(%key, "entry tags revalidated during this request");
        return None;
    }
    Some(entry)
}

fn is_draft_mode(outer: Option<&WorkUnit>, work_store: &WorkStore) -> bool {
    work_store.is_draft_mode
        || outer
            .and_then(get_draft_mode_provider)
            .is_some_and(|provider| provider.is_enabled())
}

/// On-demand revalidation, draft mode and forced refreshes in development
/// never read from the handler.
fn bypasses_handler(outer: Option<&WorkUnit>, work_store: &WorkStore, draft: bool) -> bool {
    if work_store.is_on_demand_revalidate || draft {
        return true;
    }
    if !work_store.runtime.config().dev {
        return false;
    }
    let no_cache = matches!(outer, Some(WorkUnit::Request(store)) if store.headers.is_no_cache());
    work_store.force_revalidate || no_cache
}

fn propagate(outer: Option<&WorkUnit>, life: CacheLife, tags: &[String]) {
    if let Some(store) = outer.and_then(get_revalidate_store) {
        store.propagate(life, tags);
    }
}

fn with_read(value: ByteStream, read: Option<CacheReadGuard>) -> ByteStream {
    match read {
        Some(guard) => value.track_read(guard),
        None => value,
    }
}

fn record(runtime: &CacheRuntime, id: &str, outcome: Outcome) {
    #[cfg(feature = "stats")]
    {
        let stats = runtime.stats_for(id);
        match outcome {
            Outcome::Hit => stats.record_hit(),
            Outcome::StaleHit => stats.record_stale_hit(),
            Outcome::Miss => stats.record_miss(),
            Outcome::DynamicHole => stats.record_dynamic_hole(),
        }
    }
    #[cfg(not(feature = "stats"))]
    let _ = (runtime, id, outcome);
}

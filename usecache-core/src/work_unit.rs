//! # Work units
//!
//! A [`WorkUnit`] describes what kind of generation is running: a live
//! request, a cache fill, or one of the prerender variants. Exactly one unit
//! (or none) is active per task. Each concept that only some units carry is
//! exposed through an accessor that matches every variant explicitly, so a new
//! variant fails to compile until every accessor has decided what it means.

use std::sync::Arc;

use crate::dynamic::DynamicTracking;
use crate::invalidation::ImplicitTags;
use crate::lifetimes::{CacheLife, RevalidateStore};
use crate::params::RouteParams;
use crate::request::{DraftModeProvider, Headers, MutableCookies, ReadonlyCookies, RequestPhase};
use crate::resume::{PrerenderResumeDataCache, RenderResumeDataCache};
use crate::signal::{CacheSignal, PrerenderController, RenderSignal};

/// The execution context of the current task.
#[derive(Debug, Clone)]
pub enum WorkUnit {
    Request(Arc<RequestStore>),
    Cache(Arc<UseCacheStore>),
    PrivateCache(Arc<PrivateUseCacheStore>),
    UnstableCache(Arc<UnstableCacheStore>),
    /// Modern prerender: dynamic access becomes a hanging placeholder.
    Prerender(Arc<PrerenderStoreModern>),
    /// Prerender of client components; caching is illegal here.
    PrerenderClient(Arc<PrerenderStoreModern>),
    /// Partial prerender: dynamic access postpones.
    PrerenderPpr(Arc<PrerenderStorePpr>),
    /// Legacy static generation: dynamic access bails out of static output.
    PrerenderLegacy(Arc<PrerenderStoreLegacy>),
}

/// Variant name without payload, for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkUnitKind {
    Request,
    Cache,
    PrivateCache,
    UnstableCache,
    Prerender,
    PrerenderClient,
    PrerenderPpr,
    PrerenderLegacy,
}

impl WorkUnitKind {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkUnitKind::Request => "request",
            WorkUnitKind::Cache => "cache",
            WorkUnitKind::PrivateCache => "private-cache",
            WorkUnitKind::UnstableCache => "unstable-cache",
            WorkUnitKind::Prerender => "prerender",
            WorkUnitKind::PrerenderClient => "prerender-client",
            WorkUnitKind::PrerenderPpr => "prerender-ppr",
            WorkUnitKind::PrerenderLegacy => "prerender-legacy",
        }
    }
}

impl WorkUnit {
    pub fn kind(&self) -> WorkUnitKind {
        match self {
            WorkUnit::Request(_) => WorkUnitKind::Request,
            WorkUnit::Cache(_) => WorkUnitKind::Cache,
            WorkUnit::PrivateCache(_) => WorkUnitKind::PrivateCache,
            WorkUnit::UnstableCache(_) => WorkUnitKind::UnstableCache,
            WorkUnit::Prerender(_) => WorkUnitKind::Prerender,
            WorkUnit::PrerenderClient(_) => WorkUnitKind::PrerenderClient,
            WorkUnit::PrerenderPpr(_) => WorkUnitKind::PrerenderPpr,
            WorkUnit::PrerenderLegacy(_) => WorkUnitKind::PrerenderLegacy,
        }
    }

    pub fn is_prerender(&self) -> bool {
        match self {
            WorkUnit::Prerender(_)
            | WorkUnit::PrerenderClient(_)
            | WorkUnit::PrerenderPpr(_)
            | WorkUnit::PrerenderLegacy(_) => true,
            WorkUnit::Request(_)
            | WorkUnit::Cache(_)
            | WorkUnit::PrivateCache(_)
            | WorkUnit::UnstableCache(_) => false,
        }
    }

    /// True for units created while filling a cache.
    pub fn is_cache_scope(&self) -> bool {
        match self {
            WorkUnit::Cache(_) | WorkUnit::PrivateCache(_) | WorkUnit::UnstableCache(_) => true,
            WorkUnit::Request(_)
            | WorkUnit::Prerender(_)
            | WorkUnit::PrerenderClient(_)
            | WorkUnit::PrerenderPpr(_)
            | WorkUnit::PrerenderLegacy(_) => false,
        }
    }
}

/// A live request.
#[derive(Debug)]
pub struct RequestStore {
    pub url: String,
    pub pathname: String,
    pub headers: Headers,
    pub cookies: ReadonlyCookies,
    pub mutable_cookies: MutableCookies,
    pub draft_mode: Arc<DraftModeProvider>,
    phase: parking_lot::Mutex<RequestPhase>,
    pub implicit_tags: ImplicitTags,
    pub params: Arc<RouteParams>,
    pub revalidate: RevalidateStore,
    /// Development only: changes whenever sources are edited.
    pub hmr_refresh_hash: Option<String>,
    pub render_resume_data_cache: Option<RenderResumeDataCache>,
    pub prerender_resume_data_cache: Option<PrerenderResumeDataCache>,
}

impl RequestStore {
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        let pathname = url.split(['?', '#']).next().unwrap_or("/").to_string();
        Self {
            url,
            pathname,
            headers: Headers::default(),
            cookies: ReadonlyCookies::default(),
            mutable_cookies: MutableCookies::default(),
            draft_mode: Arc::new(DraftModeProvider::default()),
            phase: parking_lot::Mutex::new(RequestPhase::Render),
            implicit_tags: ImplicitTags::default(),
            params: Arc::new(RouteParams::default()),
            revalidate: RevalidateStore::unbounded(),
            hmr_refresh_hash: None,
            render_resume_data_cache: None,
            prerender_resume_data_cache: None,
        }
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_cookies(mut self, cookies: ReadonlyCookies) -> Self {
        self.cookies = cookies;
        self
    }

    pub fn with_draft_mode(mut self, enabled: bool) -> Self {
        self.draft_mode = Arc::new(DraftModeProvider::new(enabled));
        self
    }

    pub fn with_phase(self, phase: RequestPhase) -> Self {
        *self.phase.lock() = phase;
        self
    }

    pub fn with_implicit_tags(mut self, implicit_tags: ImplicitTags) -> Self {
        self.implicit_tags = implicit_tags;
        self
    }

    pub fn with_params(mut self, params: RouteParams) -> Self {
        self.params = Arc::new(params);
        self
    }

    pub fn with_hmr_refresh_hash(mut self, hash: impl Into<String>) -> Self {
        self.hmr_refresh_hash = Some(hash.into());
        self
    }

    pub fn with_render_resume_data_cache(mut self, rdc: RenderResumeDataCache) -> Self {
        self.render_resume_data_cache = Some(rdc);
        self
    }

    pub fn with_prerender_resume_data_cache(mut self, rdc: PrerenderResumeDataCache) -> Self {
        self.prerender_resume_data_cache = Some(rdc);
        self
    }

    pub fn phase(&self) -> RequestPhase {
        *self.phase.lock()
    }

    pub fn set_phase(&self, phase: RequestPhase) {
        *self.phase.lock() = phase;
    }

    pub fn into_unit(self) -> WorkUnit {
        WorkUnit::Request(Arc::new(self))
    }
}

/// Fields copied across the boundary into a cache scope. Nothing else from
/// the outer unit is visible inside.
#[derive(Debug, Clone, Default)]
pub struct InheritedFields {
    pub implicit_tags: ImplicitTags,
    pub draft_mode: Option<Arc<DraftModeProvider>>,
    pub hmr_refresh_hash: Option<String>,
}

/// A public cache fill.
#[derive(Debug)]
pub struct UseCacheStore {
    pub implicit_tags: ImplicitTags,
    pub draft_mode: Option<Arc<DraftModeProvider>>,
    pub hmr_refresh_hash: Option<String>,
    /// Budgets (explicit overrides plus what nested caches reported) and tags.
    pub revalidate: RevalidateStore,
}

impl UseCacheStore {
    pub fn new(inherited: InheritedFields, default_life: CacheLife) -> Self {
        Self {
            implicit_tags: inherited.implicit_tags,
            draft_mode: inherited.draft_mode,
            hmr_refresh_hash: inherited.hmr_refresh_hash,
            revalidate: RevalidateStore::new(default_life),
        }
    }
}

/// A private cache fill; may read the originating request's cookies and headers.
#[derive(Debug)]
pub struct PrivateUseCacheStore {
    pub implicit_tags: ImplicitTags,
    pub draft_mode: Option<Arc<DraftModeProvider>>,
    pub hmr_refresh_hash: Option<String>,
    pub cookies: ReadonlyCookies,
    pub headers: Headers,
    pub revalidate: RevalidateStore,
}

impl PrivateUseCacheStore {
    pub fn new(
        inherited: InheritedFields,
        cookies: ReadonlyCookies,
        headers: Headers,
        default_life: CacheLife,
    ) -> Self {
        Self {
            implicit_tags: inherited.implicit_tags,
            draft_mode: inherited.draft_mode,
            hmr_refresh_hash: inherited.hmr_refresh_hash,
            cookies,
            headers,
            revalidate: RevalidateStore::new(default_life),
        }
    }
}

/// Fill of a legacy named cache.
#[derive(Debug)]
pub struct UnstableCacheStore {
    pub draft_mode: Option<Arc<DraftModeProvider>>,
    /// What nested caches reported.
    pub revalidate: RevalidateStore,
}

impl UnstableCacheStore {
    pub fn new(draft_mode: Option<Arc<DraftModeProvider>>) -> Self {
        Self {
            draft_mode,
            revalidate: RevalidateStore::unbounded(),
        }
    }
}

/// Shared by the modern and client prerender variants.
#[derive(Debug)]
pub struct PrerenderStoreModern {
    pub render_signal: RenderSignal,
    pub controller: PrerenderController,
    pub cache_signal: Option<Arc<CacheSignal>>,
    pub dynamic_tracking: Option<Arc<DynamicTracking>>,
    /// Entry points may become dynamic holes without paying generation cost.
    pub allow_empty_static_shell: bool,
    pub implicit_tags: ImplicitTags,
    /// Carries the fallback parameters not known during this pass.
    pub params: Arc<RouteParams>,
    pub revalidate: RevalidateStore,
    pub hmr_refresh_hash: Option<String>,
    pub render_resume_data_cache: Option<RenderResumeDataCache>,
    pub prerender_resume_data_cache: Option<PrerenderResumeDataCache>,
}

impl PrerenderStoreModern {
    /// Creates a pass with its own controller, cache signal and resume cache.
    pub fn new(params: RouteParams) -> Self {
        let controller = PrerenderController::new();
        Self {
            render_signal: controller.signal(),
            controller,
            cache_signal: Some(CacheSignal::new()),
            dynamic_tracking: None,
            allow_empty_static_shell: false,
            implicit_tags: ImplicitTags::default(),
            params: Arc::new(params),
            revalidate: RevalidateStore::unbounded(),
            hmr_refresh_hash: None,
            render_resume_data_cache: None,
            prerender_resume_data_cache: Some(PrerenderResumeDataCache::new()),
        }
    }

    pub fn with_controller(mut self, controller: PrerenderController) -> Self {
        self.render_signal = controller.signal();
        self.controller = controller;
        self
    }

    pub fn with_implicit_tags(mut self, implicit_tags: ImplicitTags) -> Self {
        self.implicit_tags = implicit_tags;
        self
    }

    pub fn with_allow_empty_static_shell(mut self, allow: bool) -> Self {
        self.allow_empty_static_shell = allow;
        self
    }

    pub fn with_dynamic_tracking(mut self, tracking: Arc<DynamicTracking>) -> Self {
        self.dynamic_tracking = Some(tracking);
        self
    }

    pub fn with_render_resume_data_cache(mut self, rdc: RenderResumeDataCache) -> Self {
        self.render_resume_data_cache = Some(rdc);
        self
    }

    pub fn with_hmr_refresh_hash(mut self, hash: impl Into<String>) -> Self {
        self.hmr_refresh_hash = Some(hash.into());
        self
    }

    pub fn into_unit(self) -> WorkUnit {
        WorkUnit::Prerender(Arc::new(self))
    }

    pub fn into_client_unit(self) -> WorkUnit {
        WorkUnit::PrerenderClient(Arc::new(self))
    }
}

/// Partial prerender pass.
#[derive(Debug)]
pub struct PrerenderStorePpr {
    pub dynamic_tracking: Arc<DynamicTracking>,
    pub implicit_tags: ImplicitTags,
    pub params: Arc<RouteParams>,
    pub revalidate: RevalidateStore,
    pub prerender_resume_data_cache: Option<PrerenderResumeDataCache>,
}

impl PrerenderStorePpr {
    pub fn new(params: RouteParams) -> Self {
        Self {
            dynamic_tracking: Arc::new(DynamicTracking::new()),
            implicit_tags: ImplicitTags::default(),
            params: Arc::new(params),
            revalidate: RevalidateStore::unbounded(),
            prerender_resume_data_cache: Some(PrerenderResumeDataCache::new()),
        }
    }

    pub fn with_implicit_tags(mut self, implicit_tags: ImplicitTags) -> Self {
        self.implicit_tags = implicit_tags;
        self
    }

    pub fn into_unit(self) -> WorkUnit {
        WorkUnit::PrerenderPpr(Arc::new(self))
    }
}

/// Legacy static generation pass.
#[derive(Debug)]
pub struct PrerenderStoreLegacy {
    pub implicit_tags: ImplicitTags,
    pub params: Arc<RouteParams>,
    pub revalidate: RevalidateStore,
}

impl PrerenderStoreLegacy {
    pub fn new(params: RouteParams) -> Self {
        Self {
            implicit_tags: ImplicitTags::default(),
            params: Arc::new(params),
            revalidate: RevalidateStore::unbounded(),
        }
    }

    pub fn with_implicit_tags(mut self, implicit_tags: ImplicitTags) -> Self {
        self.implicit_tags = implicit_tags;
        self
    }

    pub fn into_unit(self) -> WorkUnit {
        WorkUnit::PrerenderLegacy(Arc::new(self))
    }
}

/// Cache signal of the pass, if the unit belongs to one that tracks reads.
pub fn get_cache_signal(unit: &WorkUnit) -> Option<Arc<CacheSignal>> {
    match unit {
        WorkUnit::Prerender(store) | WorkUnit::PrerenderClient(store) => store.cache_signal.clone(),
        WorkUnit::Request(_)
        | WorkUnit::Cache(_)
        | WorkUnit::PrivateCache(_)
        | WorkUnit::UnstableCache(_)
        | WorkUnit::PrerenderPpr(_)
        | WorkUnit::PrerenderLegacy(_) => None,
    }
}

/// Entries handed over from an earlier static pass.
///
/// A pass without a handed-over cache reads its own prerender cache instead.
pub fn get_render_resume_data_cache(unit: &WorkUnit) -> Option<RenderResumeDataCache> {
    match unit {
        WorkUnit::Request(store) => store.render_resume_data_cache.clone().or_else(|| {
            store
                .prerender_resume_data_cache
                .as_ref()
                .map(PrerenderResumeDataCache::as_render)
        }),
        WorkUnit::Prerender(store) | WorkUnit::PrerenderClient(store) => {
            store.render_resume_data_cache.clone().or_else(|| {
                store
                    .prerender_resume_data_cache
                    .as_ref()
                    .map(PrerenderResumeDataCache::as_render)
            })
        }
        WorkUnit::PrerenderPpr(store) => store
            .prerender_resume_data_cache
            .as_ref()
            .map(PrerenderResumeDataCache::as_render),
        WorkUnit::Cache(_)
        | WorkUnit::PrivateCache(_)
        | WorkUnit::UnstableCache(_)
        | WorkUnit::PrerenderLegacy(_) => None,
    }
}

/// The mutable cache a static pass records its entries into.
pub fn get_prerender_resume_data_cache(unit: &WorkUnit) -> Option<PrerenderResumeDataCache> {
    match unit {
        WorkUnit::Prerender(store) => store.prerender_resume_data_cache.clone(),
        WorkUnit::PrerenderPpr(store) => store.prerender_resume_data_cache.clone(),
        WorkUnit::Request(store) => store.prerender_resume_data_cache.clone(),
        WorkUnit::PrerenderClient(_)
        | WorkUnit::PrerenderLegacy(_)
        | WorkUnit::Cache(_)
        | WorkUnit::PrivateCache(_)
        | WorkUnit::UnstableCache(_) => None,
    }
}

pub fn get_draft_mode_provider(unit: &WorkUnit) -> Option<Arc<DraftModeProvider>> {
    match unit {
        WorkUnit::Request(store) => Some(Arc::clone(&store.draft_mode)),
        WorkUnit::Cache(store) => store.draft_mode.clone(),
        WorkUnit::PrivateCache(store) => store.draft_mode.clone(),
        WorkUnit::UnstableCache(store) => store.draft_mode.clone(),
        WorkUnit::Prerender(_)
        | WorkUnit::PrerenderClient(_)
        | WorkUnit::PrerenderPpr(_)
        | WorkUnit::PrerenderLegacy(_) => None,
    }
}

pub fn get_hmr_refresh_hash(unit: &WorkUnit) -> Option<String> {
    match unit {
        WorkUnit::Request(store) => store.hmr_refresh_hash.clone(),
        WorkUnit::Cache(store) => store.hmr_refresh_hash.clone(),
        WorkUnit::PrivateCache(store) => store.hmr_refresh_hash.clone(),
        WorkUnit::Prerender(store) | WorkUnit::PrerenderClient(store) => {
            store.hmr_refresh_hash.clone()
        }
        WorkUnit::UnstableCache(_) | WorkUnit::PrerenderPpr(_) | WorkUnit::PrerenderLegacy(_) => {
            None
        }
    }
}

pub fn get_implicit_tags(unit: &WorkUnit) -> Option<ImplicitTags> {
    match unit {
        WorkUnit::Request(store) => Some(store.implicit_tags.clone()),
        WorkUnit::Cache(store) => Some(store.implicit_tags.clone()),
        WorkUnit::PrivateCache(store) => Some(store.implicit_tags.clone()),
        WorkUnit::Prerender(store) | WorkUnit::PrerenderClient(store) => {
            Some(store.implicit_tags.clone())
        }
        WorkUnit::PrerenderPpr(store) => Some(store.implicit_tags.clone()),
        WorkUnit::PrerenderLegacy(store) => Some(store.implicit_tags.clone()),
        WorkUnit::UnstableCache(_) => None,
    }
}

/// Budget bookkeeping that nested caches report into.
pub fn get_revalidate_store(unit: &WorkUnit) -> Option<&RevalidateStore> {
    match unit {
        WorkUnit::Request(store) => Some(&store.revalidate),
        WorkUnit::Cache(store) => Some(&store.revalidate),
        WorkUnit::PrivateCache(store) => Some(&store.revalidate),
        WorkUnit::Prerender(store) => Some(&store.revalidate),
        WorkUnit::PrerenderPpr(store) => Some(&store.revalidate),
        WorkUnit::PrerenderLegacy(store) => Some(&store.revalidate),
        WorkUnit::UnstableCache(store) => Some(&store.revalidate),
        WorkUnit::PrerenderClient(_) => None,
    }
}

pub fn get_route_params(unit: &WorkUnit) -> Option<Arc<RouteParams>> {
    match unit {
        WorkUnit::Request(store) => Some(Arc::clone(&store.params)),
        WorkUnit::Prerender(store) | WorkUnit::PrerenderClient(store) => {
            Some(Arc::clone(&store.params))
        }
        WorkUnit::PrerenderPpr(store) => Some(Arc::clone(&store.params)),
        WorkUnit::PrerenderLegacy(store) => Some(Arc::clone(&store.params)),
        WorkUnit::Cache(_) | WorkUnit::PrivateCache(_) | WorkUnit::UnstableCache(_) => None,
    }
}

/// Fields a cache scope started from `unit` inherits.
pub fn inherited_fields(unit: Option<&WorkUnit>) -> InheritedFields {
    match unit {
        Some(unit) => InheritedFields {
            implicit_tags: get_implicit_tags(unit).unwrap_or_default(),
            draft_mode: get_draft_mode_provider(unit),
            hmr_refresh_hash: get_hmr_refresh_hash(unit),
        },
        None => InheritedFields::default(),
    }
}

//! Request data (headers, cookies, draft mode) and the accessors that expose
//! it to code running inside a work unit.
//!
//! Request data must never reach a shared cache entry, so the accessors
//! refuse it inside public cache scopes and turn it into a dynamic signal
//! during prerendering.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::context;
use crate::dynamic::{self, HangingPlaceholder};
use crate::error::CacheError;
use crate::work_unit::{get_draft_mode_provider, WorkUnit};

/// Phase of a live request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPhase {
    Render,
    Action,
    After,
}

/// Request headers with case-insensitive lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Arc<BTreeMap<String, String>>);

impl Headers {
    pub fn new<I, K, V>(headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        Self(Arc::new(
            headers
                .into_iter()
                .map(|(k, v)| (k.as_ref().to_ascii_lowercase(), v.into()))
                .collect(),
        ))
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// True when the client asked to bypass caches.
    pub fn is_no_cache(&self) -> bool {
        self.get("cache-control")
            .map(|v| v.split(',').any(|d| d.trim().eq_ignore_ascii_case("no-cache")))
            .unwrap_or(false)
    }
}

/// Snapshot of the request cookies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadonlyCookies(Arc<BTreeMap<String, String>>);

impl ReadonlyCookies {
    pub fn new<I, K, V>(cookies: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self(Arc::new(
            cookies
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        ))
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn has(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Cookies written by an action; only writable in [`RequestPhase::Action`].
#[derive(Debug, Default)]
pub struct MutableCookies {
    jar: Mutex<BTreeMap<String, String>>,
}

impl MutableCookies {
    pub fn set(&self, name: impl Into<String>, value: impl Into<String>) {
        self.jar.lock().insert(name.into(), value.into());
    }

    pub fn delete(&self, name: &str) {
        self.jar.lock().remove(name);
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.jar.lock().get(name).cloned()
    }

    pub fn snapshot(&self) -> ReadonlyCookies {
        ReadonlyCookies::new(self.jar.lock().clone())
    }
}

/// Draft mode switch of one request.
#[derive(Debug, Default)]
pub struct DraftModeProvider {
    enabled: AtomicBool,
}

impl DraftModeProvider {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }
}

/// How request data was refused.
#[derive(Debug)]
pub enum RequestDataError {
    /// A regular error: contract violation, postponement or dynamic usage.
    Error(CacheError),
    /// A modern prerender turned the read into a dynamic hole.
    Hanging(HangingPlaceholder),
}

impl From<CacheError> for RequestDataError {
    fn from(err: CacheError) -> Self {
        RequestDataError::Error(err)
    }
}

/// Request cookies visible to the current unit.
pub fn cookies() -> Result<ReadonlyCookies, RequestDataError> {
    let unit = context::current().ok_or_else(|| CacheError::outside("cookies()"))?;
    match unit {
        WorkUnit::Request(store) => Ok(store.cookies.clone()),
        WorkUnit::PrivateCache(store) => Ok(store.cookies.clone()),
        unit => Err(refuse(&unit, "cookies()")),
    }
}

/// Request headers visible to the current unit.
pub fn headers() -> Result<Headers, RequestDataError> {
    let unit = context::current().ok_or_else(|| CacheError::outside("headers()"))?;
    match unit {
        WorkUnit::Request(store) => Ok(store.headers.clone()),
        WorkUnit::PrivateCache(store) => Ok(store.headers.clone()),
        unit => Err(refuse(&unit, "headers()")),
    }
}

/// Draft mode of the current request.
///
/// Cache scopes see the provider copied in from the request that started
/// them; prerenders never run in draft mode.
pub fn draft_mode() -> Result<Arc<DraftModeProvider>, RequestDataError> {
    let unit = context::current().ok_or_else(|| CacheError::outside("draft_mode()"))?;
    match &unit {
        WorkUnit::Request(store) => Ok(Arc::clone(&store.draft_mode)),
        WorkUnit::Cache(_) | WorkUnit::PrivateCache(_) | WorkUnit::UnstableCache(_) => {
            get_draft_mode_provider(&unit).ok_or_else(|| {
                CacheError::contract("draft_mode() inside a cache scope without an originating request")
                    .into()
            })
        }
        WorkUnit::Prerender(_)
        | WorkUnit::PrerenderClient(_)
        | WorkUnit::PrerenderPpr(_)
        | WorkUnit::PrerenderLegacy(_) => Ok(Arc::new(DraftModeProvider::new(false))),
    }
}

fn refuse(unit: &WorkUnit, expression: &str) -> RequestDataError {
    let route = context::current_route();
    match unit {
        WorkUnit::Cache(_) => RequestDataError::Error(CacheError::contract(format!(
            "route {route} used `{expression}` inside a shared cache scope; \
             request data must be read outside and passed in as an argument, \
             or the cache marked private"
        ))),
        WorkUnit::UnstableCache(_) => RequestDataError::Error(CacheError::contract(format!(
            "route {route} used `{expression}` inside a legacy named cache"
        ))),
        WorkUnit::Prerender(store) => {
            RequestDataError::Hanging(HangingPlaceholder::new(&store.render_signal, route, expression))
        }
        WorkUnit::PrerenderClient(_) => RequestDataError::Error(CacheError::contract(format!(
            "`{expression}` cannot be called while prerendering client components"
        ))),
        WorkUnit::PrerenderPpr(store) => RequestDataError::Error(dynamic::postpone_with_tracking(
            &route,
            expression,
            Some(&store.dynamic_tracking),
        )),
        WorkUnit::PrerenderLegacy(store) => {
            store.revalidate.force_dynamic();
            RequestDataError::Error(CacheError::DynamicUsage {
                route,
                expression: expression.to_string(),
            })
        }
        WorkUnit::Request(_) | WorkUnit::PrivateCache(_) => RequestDataError::Error(
            CacheError::contract(format!("`{expression}` refused in a request scope")),
        ),
    }
}

//! # Dynamic holes
//!
//! During a static pass, output that depends on request data cannot be
//! produced. Depending on the prerender variant that dependency is expressed
//! differently:
//!
//! - modern prerender: the computation is replaced by a [`HangingPlaceholder`],
//!   a future that only resolves once the pass's render signal fires
//! - partial prerender: rendering is postponed and the access is recorded in
//!   [`DynamicTracking`]
//! - legacy prerender: the route stops being static; revalidation is forced to 0
//!
//! A task-scoped [`DynamicAccessTracker`] lets deep code (route parameter
//! reads) report an access to whichever generation is racing it.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;

use crate::error::CacheError;
use crate::signal::{AbortReason, RenderSignal};

tokio::task_local! {
    static DYNAMIC_ACCESS: DynamicAccessTracker;
}

/// Collects the first dynamic access made by a generation.
#[derive(Debug, Clone, Default)]
pub struct DynamicAccessTracker {
    signal: RenderSignal,
}

impl DynamicAccessTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&self, expression: &str) {
        tracing::debug!(expression, "dynamic access during prerender");
        self.signal
            .cancel(AbortReason::DynamicAccess(expression.to_string()));
    }

    pub fn is_triggered(&self) -> bool {
        self.signal.is_cancelled()
    }

    /// Expression of the first reported access.
    pub fn expression(&self) -> Option<String> {
        match self.signal.reason() {
            Some(AbortReason::DynamicAccess(expression)) => Some(expression),
            _ => None,
        }
    }

    /// Completes once an access is reported.
    pub async fn triggered(&self) {
        self.signal.cancelled().await
    }

    /// Runs `fut` with this tracker as the task's dynamic-access sink.
    pub async fn scope<F: Future>(&self, fut: F) -> F::Output {
        DYNAMIC_ACCESS.scope(self.clone(), fut).await
    }
}

/// Reports a dynamic access to the enclosing tracker.
///
/// Returns false when no tracker is in scope.
pub fn report_access(expression: &str) -> bool {
    DYNAMIC_ACCESS
        .try_with(|tracker| tracker.report(expression))
        .is_ok()
}

/// True when the current task runs under a tracker.
pub fn is_tracking() -> bool {
    DYNAMIC_ACCESS.try_with(|_| ()).is_ok()
}

/// Marker produced when a hanging placeholder is released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamicHole {
    pub route: String,
    pub expression: String,
}

impl fmt::Display for DynamicHole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "dynamic hole in {} caused by `{}`",
            self.route, self.expression
        )
    }
}

/// A value that is deliberately never produced.
///
/// The placeholder stays pending until the render signal of the pass that
/// created it fires; it then resolves to a [`DynamicHole`], which renderers
/// treat as "this subtree is dynamic", never as a failure.
pub struct HangingPlaceholder {
    route: String,
    expression: String,
    released: BoxFuture<'static, ()>,
}

impl HangingPlaceholder {
    pub fn new(signal: &RenderSignal, route: impl Into<String>, expression: impl Into<String>) -> Self {
        let signal = signal.clone();
        Self {
            route: route.into(),
            expression: expression.into(),
            released: async move { signal.cancelled().await }.boxed(),
        }
    }

    pub fn route(&self) -> &str {
        &self.route
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }
}

impl fmt::Debug for HangingPlaceholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HangingPlaceholder")
            .field("route", &self.route)
            .field("expression", &self.expression)
            .finish_non_exhaustive()
    }
}

impl Future for HangingPlaceholder {
    type Output = DynamicHole;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.released.as_mut().poll(cx) {
            Poll::Ready(()) => Poll::Ready(DynamicHole {
                route: self.route.clone(),
                expression: self.expression.clone(),
            }),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// One request-data access recorded during a partial prerender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamicAccess {
    pub expression: String,
}

/// Accesses recorded by a partial prerender; the renderer uses them to decide
/// where the static shell ends.
#[derive(Debug, Default)]
pub struct DynamicTracking {
    accesses: Mutex<Vec<DynamicAccess>>,
}

impl DynamicTracking {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, expression: &str) {
        self.accesses.lock().push(DynamicAccess {
            expression: expression.to_string(),
        });
    }

    pub fn accesses(&self) -> Vec<DynamicAccess> {
        self.accesses.lock().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.accesses.lock().is_empty()
    }
}

/// Records `expression` and returns the postponement error.
pub fn postpone_with_tracking(
    route: &str,
    expression: &str,
    tracking: Option<&DynamicTracking>,
) -> CacheError {
    tracing::debug!(route, expression, "postponing partial prerender");
    if let Some(tracking) = tracking {
        tracking.record(expression);
    }
    CacheError::Postponed {
        route: route.to_string(),
        expression: expression.to_string(),
    }
}

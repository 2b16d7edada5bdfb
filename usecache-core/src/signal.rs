//! # Signals
//!
//! Two coordination primitives used by prerender passes:
//!
//! - [`CacheSignal`] counts outstanding cache reads so a static pass can wait
//!   until every read it triggered has landed before it finalizes output.
//! - [`RenderSignal`] is the cancellation source of a pass. Everything created
//!   during the pass, hanging placeholders included, is released when it fires.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

/// Counter of in-flight cache reads belonging to one prerender pass.
///
/// # Examples
///
/// ```
/// use usecache_core::CacheSignal;
///
/// # tokio_test_block_on(async {
/// let signal = CacheSignal::new();
/// let guard = signal.begin_read();
/// assert_eq!(signal.pending_reads(), 1);
/// drop(guard);
/// signal.wait_for_quiescence().await;
/// assert_eq!(signal.pending_reads(), 0);
/// # });
/// # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
/// # }
/// ```
#[derive(Debug, Default)]
pub struct CacheSignal {
    count: Mutex<usize>,
    idle: Notify,
}

impl CacheSignal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers a read and returns a guard that ends it when dropped.
    pub fn begin_read(self: &Arc<Self>) -> CacheReadGuard {
        self.begin_read_raw();
        CacheReadGuard {
            signal: Some(Arc::clone(self)),
        }
    }

    /// Increments the outstanding-reads counter.
    ///
    /// Prefer [`CacheSignal::begin_read`], which cannot leave the counter unbalanced.
    pub fn begin_read_raw(&self) {
        *self.count.lock() += 1;
    }

    /// Decrements the counter and wakes waiters when it reaches zero.
    pub fn end_read(&self) {
        let reached_zero = {
            let mut count = self.count.lock();
            if *count == 0 {
                tracing::warn!("cache signal end_read called without a matching begin_read");
                return;
            }
            *count -= 1;
            *count == 0
        };

        if reached_zero {
            self.idle.notify_waiters();
        }
    }

    pub fn pending_reads(&self) -> usize {
        *self.count.lock()
    }

    /// Returns once no reads are outstanding and none started in the meantime.
    ///
    /// After observing zero the task yields once so that reads scheduled by
    /// the completion of the last one get a chance to begin.
    pub async fn wait_for_quiescence(&self) {
        loop {
            let notified = self.idle.notified();
            if self.pending_reads() == 0 {
                tokio::task::yield_now().await;
                if self.pending_reads() == 0 {
                    return;
                }
                continue;
            }
            notified.await;
        }
    }
}

/// Ends one cache read when dropped.
#[derive(Debug)]
pub struct CacheReadGuard {
    signal: Option<Arc<CacheSignal>>,
}

impl CacheReadGuard {
    /// Ends the read now instead of at drop.
    pub fn finish(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(signal) = self.signal.take() {
            signal.end_read();
        }
    }
}

impl Drop for CacheReadGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// Why a [`RenderSignal`] fired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    /// The pass finished and released what it still held.
    PassComplete,
    /// A dependency on request data was detected.
    DynamicAccess(String),
    /// Caller-provided reason.
    Other(String),
}

#[derive(Debug, Default)]
struct SignalState {
    cancelled: AtomicBool,
    reason: Mutex<Option<AbortReason>>,
    notify: Notify,
}

/// Cancellation token shared by everything created under one pass.
#[derive(Debug, Clone, Default)]
pub struct RenderSignal {
    state: Arc<SignalState>,
}

impl RenderSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires the signal. Only the first reason is kept.
    pub fn cancel(&self, reason: AbortReason) {
        {
            let mut slot = self.state.reason.lock();
            if slot.is_none() {
                *slot = Some(reason);
            }
        }
        self.state.cancelled.store(true, Ordering::SeqCst);
        self.state.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    pub fn reason(&self) -> Option<AbortReason> {
        self.state.reason.lock().clone()
    }

    /// Completes once the signal fires.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.state.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Returns true if both handles refer to the same signal.
    pub fn same_as(&self, other: &RenderSignal) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

/// Ends a prerender pass by firing its [`RenderSignal`].
#[derive(Debug, Clone)]
pub struct PrerenderController {
    signal: RenderSignal,
}

impl PrerenderController {
    pub fn new() -> Self {
        Self {
            signal: RenderSignal::new(),
        }
    }

    pub fn signal(&self) -> RenderSignal {
        self.signal.clone()
    }

    pub fn abort(&self, reason: AbortReason) {
        self.signal.cancel(reason);
    }
}

impl Default for PrerenderController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_quiescence_waits_for_outstanding_reads() {
        let signal = CacheSignal::new();
        let guard = signal.begin_read();

        let waiter = {
            let signal = Arc::clone(&signal);
            tokio::spawn(async move { signal.wait_for_quiescence().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should finish")
            .unwrap();
        assert_eq!(signal.pending_reads(), 0);
    }

    #[tokio::test]
    async fn test_quiescence_returns_immediately_when_idle() {
        let signal = CacheSignal::new();
        tokio::time::timeout(Duration::from_millis(100), signal.wait_for_quiescence())
            .await
            .expect("idle signal should not block");
    }

    #[test]
    fn test_unbalanced_end_read_is_ignored() {
        let signal = CacheSignal::new();
        signal.end_read();
        assert_eq!(signal.pending_reads(), 0);
    }

    #[test]
    fn test_guard_finish_releases_once() {
        let signal = CacheSignal::new();
        let first = signal.begin_read();
        let _second = signal.begin_read();
        first.finish();
        assert_eq!(signal.pending_reads(), 1);
    }

    #[tokio::test]
    async fn test_render_signal_wakes_all_waiters() {
        let controller = PrerenderController::new();
        let a = controller.signal();
        let b = controller.signal();

        let wait_a = tokio::spawn(async move { a.cancelled().await });
        let wait_b = tokio::spawn(async move { b.cancelled().await });

        controller.abort(AbortReason::PassComplete);
        controller.abort(AbortReason::Other("ignored".to_string()));

        wait_a.await.unwrap();
        wait_b.await.unwrap();
        assert_eq!(controller.signal().reason(), Some(AbortReason::PassComplete));
    }
}

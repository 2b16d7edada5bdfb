use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::error::CacheError;
use crate::runtime::CacheRuntime;

/// Route-level state of one request or prerender pass.
///
/// Unlike the work unit, the work store is not shadowed by cache scopes: a
/// cache fill still belongs to the route that triggered it.
#[derive(Debug)]
pub struct WorkStore {
    pub route: String,
    pub runtime: Arc<CacheRuntime>,
    pub is_static_generation: bool,
    pub is_on_demand_revalidate: bool,
    pub is_draft_mode: bool,
    /// Development: the client asked to bypass caches.
    pub force_revalidate: bool,
    revalidated_tags: Mutex<HashSet<String>>,
    invalid_dynamic_usage_error: Mutex<Option<CacheError>>,
    pending_revalidates: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkStore {
    pub fn new(route: impl Into<String>, runtime: Arc<CacheRuntime>) -> Self {
        Self {
            route: route.into(),
            runtime,
            is_static_generation: false,
            is_on_demand_revalidate: false,
            is_draft_mode: false,
            force_revalidate: false,
            revalidated_tags: Mutex::new(HashSet::new()),
            invalid_dynamic_usage_error: Mutex::new(None),
            pending_revalidates: Mutex::new(Vec::new()),
        }
    }

    pub fn static_generation(mut self, enabled: bool) -> Self {
        self.is_static_generation = enabled;
        self
    }

    pub fn on_demand_revalidate(mut self, enabled: bool) -> Self {
        self.is_on_demand_revalidate = enabled;
        self
    }

    pub fn draft_mode(mut self, enabled: bool) -> Self {
        self.is_draft_mode = enabled;
        self
    }

    pub fn force_revalidate(mut self, enabled: bool) -> Self {
        self.force_revalidate = enabled;
        self
    }

    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Remembers tags revalidated while this request runs.
    pub fn record_revalidated_tags(&self, tags: &[String]) {
        self.revalidated_tags.lock().extend(tags.iter().cloned());
    }

    /// True if any of `tags` was revalidated during this request.
    pub fn was_revalidated(&self, tags: &[String]) -> bool {
        let revalidated = self.revalidated_tags.lock();
        tags.iter().any(|tag| revalidated.contains(tag))
    }

    pub fn revalidated_tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.revalidated_tags.lock().iter().cloned().collect();
        tags.sort();
        tags
    }

    /// Records the error that invalidates this pass. Only the first one is
    /// kept; returns whether `error` was recorded.
    pub fn set_invalid_dynamic_usage_error(&self, error: CacheError) -> bool {
        let mut slot = self.invalid_dynamic_usage_error.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(error);
        true
    }

    pub fn invalid_dynamic_usage_error(&self) -> Option<CacheError> {
        self.invalid_dynamic_usage_error.lock().clone()
    }

    pub(crate) fn track_revalidate(&self, handle: JoinHandle<()>) {
        let mut pending = self.pending_revalidates.lock();
        pending.retain(|h| !h.is_finished());
        pending.push(handle);
    }

    pub fn pending_revalidates(&self) -> usize {
        self.pending_revalidates
            .lock()
            .iter()
            .filter(|h| !h.is_finished())
            .count()
    }

    /// Waits for background refreshes started by stale hits.
    pub async fn wait_for_pending_revalidates(&self) {
        loop {
            let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.pending_revalidates.lock());
            if handles.is_empty() {
                return;
            }
            for handle in handles {
                if let Err(err) = handle.await {
                    tracing::warn!(route = %self.route, error = %err, "background revalidation task failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn store() -> WorkStore {
        WorkStore::new("/blog", Arc::new(CacheRuntime::new("test")))
    }

    #[test]
    fn test_invalid_dynamic_usage_is_set_once() {
        let store = store();
        let first = CacheError::Timeout {
            route: "/blog".to_string(),
            timeout: Duration::from_secs(50),
        };
        assert!(store.set_invalid_dynamic_usage_error(first));
        assert!(!store.set_invalid_dynamic_usage_error(CacheError::contract("second")));
        assert!(matches!(
            store.invalid_dynamic_usage_error(),
            Some(CacheError::Timeout { .. })
        ));
    }

    #[test]
    fn test_revalidated_tags() {
        let store = store();
        store.record_revalidated_tags(&["b".to_string(), "a".to_string()]);
        assert!(store.was_revalidated(&["a".to_string(), "z".to_string()]));
        assert!(!store.was_revalidated(&["z".to_string()]));
        assert_eq!(store.revalidated_tags(), vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_wait_for_pending_revalidates() {
        let store = store();
        let (tx, rx) = tokio::sync::oneshot::channel();
        store.track_revalidate(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let _ = tx.send(());
        }));
        store.wait_for_pending_revalidates().await;
        assert!(rx.await.is_ok());
        assert_eq!(store.pending_revalidates(), 0);
    }
}

//! Resume data caches.
//!
//! A static pass records every entry it produced in a
//! [`PrerenderResumeDataCache`]. When the same route is later resumed for a
//! real request, the recorded entries are handed back through a read-only
//! [`RenderResumeDataCache`] so the dynamic render sees exactly the values
//! the static shell was built from. Both handles are owned by one pass or
//! request and are dropped with it.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;

use crate::cache_entry::PendingEntry;

type Entries = Arc<DashMap<String, PendingEntry>>;

/// Mutable handle owned by a prerender pass.
#[derive(Clone, Default)]
pub struct PrerenderResumeDataCache {
    entries: Entries,
}

impl PrerenderResumeDataCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<PendingEntry> {
        self.entries.get(key).map(|entry| entry.clone())
    }

    /// Records an entry, replacing whatever the pass stored under `key` before.
    pub fn set(&self, key: &str, entry: PendingEntry) {
        self.entries.insert(key.to_string(), entry);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    /// Read-only view over the same entries.
    pub fn as_render(&self) -> RenderResumeDataCache {
        RenderResumeDataCache {
            entries: Arc::clone(&self.entries),
        }
    }

    /// Freezes the pass's entries for handing off to a resume.
    pub fn into_render(self) -> RenderResumeDataCache {
        RenderResumeDataCache {
            entries: self.entries,
        }
    }
}

/// Read-only handle used while resuming a prerendered route.
#[derive(Clone, Default)]
pub struct RenderResumeDataCache {
    entries: Entries,
}

impl RenderResumeDataCache {
    pub fn get(&self, key: &str) -> Option<PendingEntry> {
        self.entries.get(key).map(|entry| entry.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for PrerenderResumeDataCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrerenderResumeDataCache")
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl fmt::Debug for RenderResumeDataCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderResumeDataCache")
            .field("entries", &self.entries.len())
            .finish()
    }
}

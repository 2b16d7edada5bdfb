//! Freshness budgets (`stale`, `revalidate`, `expire`) and the bookkeeping
//! that propagates them from inner caches to whatever encloses them.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde::Deserialize;

/// Budget value meaning "never".
pub const INFINITE_CACHE: u64 = 0xFFFF_FFFE;

/// Freshness budgets, in seconds.
///
/// Fields missing from a configured profile take the `default` profile's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheLife {
    /// How long a client may reuse the value without asking.
    pub stale: u64,
    /// After this many seconds the entry is served stale while refreshed.
    pub revalidate: u64,
    /// After this many seconds the entry must not be served at all.
    pub expire: u64,
}

impl CacheLife {
    pub const DEFAULT: CacheLife = CacheLife {
        stale: 300,
        revalidate: 900,
        expire: INFINITE_CACHE,
    };
    pub const SECONDS: CacheLife = CacheLife {
        stale: 30,
        revalidate: 1,
        expire: 60,
    };
    pub const MINUTES: CacheLife = CacheLife {
        stale: 300,
        revalidate: 60,
        expire: 3_600,
    };
    pub const HOURS: CacheLife = CacheLife {
        stale: 300,
        revalidate: 3_600,
        expire: 86_400,
    };
    pub const DAYS: CacheLife = CacheLife {
        stale: 300,
        revalidate: 86_400,
        expire: 604_800,
    };
    pub const WEEKS: CacheLife = CacheLife {
        stale: 300,
        revalidate: 604_800,
        expire: 2_592_000,
    };
    pub const MAX: CacheLife = CacheLife {
        stale: 300,
        revalidate: 2_592_000,
        expire: INFINITE_CACHE,
    };
    /// Starting point for min-folding: looser than any real budget.
    pub const UNBOUNDED: CacheLife = CacheLife {
        stale: INFINITE_CACHE,
        revalidate: INFINITE_CACHE,
        expire: INFINITE_CACHE,
    };

    pub const fn new(stale: u64, revalidate: u64, expire: u64) -> Self {
        Self {
            stale,
            revalidate,
            expire,
        }
    }

    /// Component-wise minimum.
    pub fn tightest(self, other: CacheLife) -> CacheLife {
        CacheLife {
            stale: self.stale.min(other.stale),
            revalidate: self.revalidate.min(other.revalidate),
            expire: self.expire.min(other.expire),
        }
    }
}

impl Default for CacheLife {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Built-in named profiles.
pub static BUILTIN_PROFILES: Lazy<HashMap<&'static str, CacheLife>> = Lazy::new(|| {
    HashMap::from([
        ("default", CacheLife::DEFAULT),
        ("seconds", CacheLife::SECONDS),
        ("minutes", CacheLife::MINUTES),
        ("hours", CacheLife::HOURS),
        ("days", CacheLife::DAYS),
        ("weeks", CacheLife::WEEKS),
        ("max", CacheLife::MAX),
    ])
});

/// Explicit overrides set through `cache_life`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExplicitLife {
    pub stale: Option<u64>,
    pub revalidate: Option<u64>,
    pub expire: Option<u64>,
}

impl ExplicitLife {
    /// Records `life`, keeping the tighter value where one is already set.
    pub fn apply(&mut self, life: CacheLife) {
        fn tighten(slot: &mut Option<u64>, value: u64) {
            *slot = Some(slot.map_or(value, |current| current.min(value)));
        }
        tighten(&mut self.stale, life.stale);
        tighten(&mut self.revalidate, life.revalidate);
        tighten(&mut self.expire, life.expire);
    }

    fn or(self, fallback: CacheLife) -> CacheLife {
        CacheLife {
            stale: self.stale.unwrap_or(fallback.stale),
            revalidate: self.revalidate.unwrap_or(fallback.revalidate),
            expire: self.expire.unwrap_or(fallback.expire),
        }
    }
}

#[derive(Debug)]
struct RevalidateState {
    base: CacheLife,
    explicit: ExplicitLife,
    inner: CacheLife,
    tags: Vec<String>,
}

/// Budget and tag bookkeeping of one work unit.
///
/// `base` is the starting budget (the default profile for caches, unbounded
/// for prerenders and requests), `explicit` holds `cache_life` overrides and
/// `inner` the tightest budget reported by nested caches. The effective budget
/// never ends up looser than anything nested inside the unit.
#[derive(Debug)]
pub struct RevalidateStore {
    state: Mutex<RevalidateState>,
}

impl RevalidateStore {
    pub fn new(base: CacheLife) -> Self {
        Self {
            state: Mutex::new(RevalidateState {
                base,
                explicit: ExplicitLife::default(),
                inner: CacheLife::UNBOUNDED,
                tags: Vec::new(),
            }),
        }
    }

    pub fn unbounded() -> Self {
        Self::new(CacheLife::UNBOUNDED)
    }

    pub fn set_explicit(&self, life: CacheLife) {
        self.state.lock().explicit.apply(life);
    }

    pub fn explicit(&self) -> ExplicitLife {
        self.state.lock().explicit
    }

    /// Folds a nested cache's budgets and tags into this unit.
    pub fn propagate(&self, life: CacheLife, tags: &[String]) {
        let mut state = self.state.lock();
        state.inner = state.inner.tightest(life);
        for tag in tags {
            if !state.tags.contains(tag) {
                state.tags.push(tag.clone());
            }
        }
    }

    pub fn add_tags<I>(&self, tags: I)
    where
        I: IntoIterator<Item = String>,
    {
        let mut state = self.state.lock();
        for tag in tags {
            if !state.tags.contains(&tag) {
                state.tags.push(tag);
            }
        }
    }

    /// Marks the unit as uncacheable.
    pub fn force_dynamic(&self) {
        let mut state = self.state.lock();
        state.inner.revalidate = 0;
    }

    pub fn effective(&self) -> CacheLife {
        let state = self.state.lock();
        state.explicit.or(state.base).tightest(state.inner)
    }

    pub fn tags(&self) -> Vec<String> {
        self.state.lock().tags.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inner_budget_wins_when_tighter() {
        let store = RevalidateStore::new(CacheLife::DEFAULT);
        store.set_explicit(CacheLife::new(300, 60, 3_600));
        store.propagate(CacheLife::new(300, 10, 3_600), &["a".to_string()]);
        store.add_tags(["b".to_string()]);

        let life = store.effective();
        assert_eq!(life.revalidate, 10);
        assert_eq!(life.expire, 3_600);
        assert_eq!(store.tags(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_explicit_override_replaces_base() {
        let store = RevalidateStore::new(CacheLife::DEFAULT);
        store.set_explicit(CacheLife::HOURS);
        assert_eq!(store.effective(), CacheLife::HOURS);
    }

    #[test]
    fn test_second_explicit_keeps_tighter_values() {
        let store = RevalidateStore::new(CacheLife::DEFAULT);
        store.set_explicit(CacheLife::MINUTES);
        store.set_explicit(CacheLife::DAYS);
        assert_eq!(store.effective().revalidate, 60);
    }

    #[test]
    fn test_tags_are_deduplicated() {
        let store = RevalidateStore::unbounded();
        store.propagate(CacheLife::MAX, &["x".to_string(), "x".to_string()]);
        store.propagate(CacheLife::MAX, &["x".to_string()]);
        assert_eq!(store.tags(), vec!["x".to_string()]);
    }

    #[test]
    fn test_builtin_profiles() {
        assert_eq!(BUILTIN_PROFILES["minutes"].revalidate, 60);
        assert_eq!(BUILTIN_PROFILES["max"].expire, INFINITE_CACHE);
    }
}

//! # Tag invalidation
//!
//! Tags group cache entries so they can be invalidated together. This module
//! provides:
//! - [`TagInvalidationTracker`]: records when tags were revalidated and indexes
//!   stored keys by tag, so a backend can evict eagerly
//! - tag validation shared by every tag-accepting API
//! - implicit tags derived from the route being rendered
//!
//! # Examples
//!
//! ```rust
//! use usecache_core::invalidation::TagInvalidationTracker;
//!
//! let tracker = TagInvalidationTracker::new();
//! tracker.register("key-1", &["user:42".to_string()]);
//!
//! tracker.expire_tags(&["user:42".to_string()], 2_000);
//! assert!(tracker.is_stale(&["user:42".to_string()], 1_000));
//! assert_eq!(tracker.keys_for_tag("user:42"), vec!["key-1".to_string()]);
//! ```

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;

/// Prefix of tags derived from the route rather than declared by code.
pub const IMPLICIT_TAG_PREFIX: &str = "_N_T_";
/// Longest accepted tag.
pub const MAX_TAG_LENGTH: usize = 256;
/// Most tags accepted in one call.
pub const MAX_TAGS_PER_CALL: usize = 128;

/// Revalidation timestamps and the tag -> keys index.
#[derive(Debug, Default)]
pub struct TagInvalidationTracker {
    /// Map from tag to the time (epoch ms) it was last revalidated
    expired_at: RwLock<HashMap<String, u64>>,
    /// Map from tag to the keys stored under it
    tag_to_keys: RwLock<HashMap<String, HashSet<String>>>,
    /// Map from key to its tags, used to unregister
    key_tags: RwLock<HashMap<String, Vec<String>>>,
}

impl TagInvalidationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `tags` as revalidated at `now` (epoch ms).
    ///
    /// Returns the keys stored under any of the tags.
    pub fn expire_tags(&self, tags: &[String], now: u64) -> Vec<String> {
        {
            let mut expired = self.expired_at.write();
            for tag in tags {
                let slot = expired.entry(tag.clone()).or_insert(0);
                *slot = (*slot).max(now);
            }
        }

        let index = self.tag_to_keys.read();
        let mut keys: Vec<String> = tags
            .iter()
            .filter_map(|tag| index.get(tag))
            .flatten()
            .cloned()
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        keys.sort();
        keys
    }

    /// Latest revalidation time among `tags`, 0 when none was revalidated.
    pub fn expiration(&self, tags: &[String]) -> u64 {
        let expired = self.expired_at.read();
        tags.iter()
            .filter_map(|tag| expired.get(tag))
            .copied()
            .max()
            .unwrap_or(0)
    }

    /// True if any tag was revalidated after `timestamp`.
    pub fn is_stale(&self, tags: &[String], timestamp: u64) -> bool {
        self.expiration(tags) > timestamp
    }

    /// Indexes `key` under each of its tags.
    pub fn register(&self, key: &str, tags: &[String]) {
        {
            let mut index = self.tag_to_keys.write();
            for tag in tags {
                index
                    .entry(tag.clone())
                    .or_insert_with(HashSet::new)
                    .insert(key.to_string());
            }
        }
        self.key_tags.write().insert(key.to_string(), tags.to_vec());
    }

    /// Removes `key` from the index.
    pub fn unregister(&self, key: &str) {
        let Some(tags) = self.key_tags.write().remove(key) else {
            return;
        };
        let mut index = self.tag_to_keys.write();
        for tag in tags {
            if let Some(keys) = index.get_mut(&tag) {
                keys.remove(key);
                if keys.is_empty() {
                    index.remove(&tag);
                }
            }
        }
    }

    pub fn keys_for_tag(&self, tag: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .tag_to_keys
            .read()
            .get(tag)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    /// Clears timestamps and index.
    pub fn clear(&self) {
        self.expired_at.write().clear();
        self.tag_to_keys.write().clear();
        self.key_tags.write().clear();
    }
}

/// Drops invalid tags, logging each one.
///
/// `description` names the API the tags were passed to.
pub fn validate_tags<I, S>(tags: I, description: &str) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut valid = Vec::new();
    for tag in tags {
        let tag = tag.into();
        if tag.len() > MAX_TAG_LENGTH {
            tracing::warn!(
                tag = %tag,
                api = description,
                "tag exceeds max length of {MAX_TAG_LENGTH}, dropping it"
            );
        } else if valid.len() >= MAX_TAGS_PER_CALL {
            tracing::warn!(
                tag = %tag,
                api = description,
                "exceeded max tag count of {MAX_TAGS_PER_CALL}, dropping it"
            );
        } else {
            valid.push(tag);
        }
    }
    valid
}

/// Tags inherited from the route being rendered, with the latest time any of
/// them was revalidated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImplicitTags {
    pub tags: Vec<String>,
    /// Epoch ms; entries created before this are invalid.
    pub expiration: u64,
}

impl ImplicitTags {
    pub fn new(tags: Vec<String>, expiration: u64) -> Self {
        Self { tags, expiration }
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

/// Derives the implicit tags for a page and, optionally, the concrete pathname.
///
/// ```
/// use usecache_core::invalidation::derive_implicit_tags;
///
/// let tags = derive_implicit_tags("/blog/[slug]/page", Some("/blog/hello"));
/// assert_eq!(
///     tags,
///     vec![
///         "_N_T_/layout",
///         "_N_T_/blog/layout",
///         "_N_T_/blog/[slug]/layout",
///         "_N_T_/blog/[slug]/page",
///         "_N_T_/blog/hello",
///     ]
/// );
/// ```
pub fn derive_implicit_tags(page: &str, pathname: Option<&str>) -> Vec<String> {
    let mut derived = vec!["/layout".to_string()];

    if page.starts_with('/') {
        let segments: Vec<&str> = page.split('/').collect();
        for end in 1..=segments.len() {
            let mut current = segments[..end].join("/");
            if current.is_empty() {
                continue;
            }
            if !current.ends_with("/page") && !current.ends_with("/route") {
                if !current.ends_with('/') {
                    current.push('/');
                }
                current.push_str("layout");
            }
            derived.push(current);
        }
    }

    let mut tags: Vec<String> = Vec::with_capacity(derived.len() + 1);
    let candidates = derived
        .into_iter()
        .map(|tag| format!("{IMPLICIT_TAG_PREFIX}{tag}"))
        .chain(pathname.map(|p| format!("{IMPLICIT_TAG_PREFIX}{p}")));
    for tag in candidates {
        if !tags.contains(&tag) {
            tags.push(tag);
        }
    }
    tags
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(list: &[&str]) -> Vec<String> {
        list.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_expiration_keeps_latest() {
        let tracker = TagInvalidationTracker::new();
        tracker.expire_tags(&tags(&["a"]), 5_000);
        tracker.expire_tags(&tags(&["a"]), 3_000);
        assert_eq!(tracker.expiration(&tags(&["a", "b"])), 5_000);
        assert_eq!(tracker.expiration(&tags(&["b"])), 0);
    }

    #[test]
    fn test_entry_created_after_revalidation_is_fresh() {
        let tracker = TagInvalidationTracker::new();
        tracker.expire_tags(&tags(&["a"]), 1_000);
        assert!(tracker.is_stale(&tags(&["a"]), 999));
        assert!(!tracker.is_stale(&tags(&["a"]), 1_000));
    }

    #[test]
    fn test_index_register_and_unregister() {
        let tracker = TagInvalidationTracker::new();
        tracker.register("k1", &tags(&["a", "b"]));
        tracker.register("k2", &tags(&["b"]));

        assert_eq!(tracker.keys_for_tag("b"), tags(&["k1", "k2"]));
        assert_eq!(tracker.expire_tags(&tags(&["a", "b"]), 1), tags(&["k1", "k2"]));

        tracker.unregister("k1");
        assert!(tracker.keys_for_tag("a").is_empty());
        assert_eq!(tracker.keys_for_tag("b"), tags(&["k2"]));
    }

    #[test]
    fn test_validate_drops_long_tags() {
        let long = "x".repeat(MAX_TAG_LENGTH + 1);
        let valid = validate_tags(vec!["ok".to_string(), long], "cache_tag()");
        assert_eq!(valid, tags(&["ok"]));
    }

    #[test]
    fn test_validate_caps_tag_count() {
        let many: Vec<String> = (0..MAX_TAGS_PER_CALL + 5).map(|i| format!("t{i}")).collect();
        assert_eq!(validate_tags(many, "cache_tag()").len(), MAX_TAGS_PER_CALL);
    }

    #[test]
    fn test_implicit_tags_for_route_handler() {
        let derived = derive_implicit_tags("/api/users/route", None);
        assert_eq!(
            derived,
            tags(&[
                "_N_T_/layout",
                "_N_T_/api/layout",
                "_N_T_/api/users/layout",
                "_N_T_/api/users/route",
            ])
        );
    }

    #[test]
    fn test_implicit_tags_for_root_page() {
        let derived = derive_implicit_tags("/page", Some("/"));
        assert_eq!(derived, tags(&["_N_T_/layout", "_N_T_/page", "_N_T_/"]));
    }
}

//! Tag Index
//!
//! Maps tags to the keys written under them, and each key back to its
//! current tags. Rewriting a key replaces its tags, so an untagged rewrite
//! leaves no stale membership behind. Every key carries the expiry of its
//! latest write and is dropped by [`TagIndex::prune_expired`] once the
//! value can no longer be resident in either tier.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use super::entry::CacheKey;

struct Tagged {
    tags: Vec<String>,
    expires_at: Instant,
}

#[derive(Default)]
struct TagState {
    by_tag: HashMap<String, HashSet<CacheKey>>,
    by_key: HashMap<CacheKey, Tagged>,
}

impl TagState {
    fn unlink(&mut self, key: &CacheKey) -> bool {
        let Some(old) = self.by_key.remove(key) else {
            return false;
        };
        for tag in &old.tags {
            if let Some(keys) = self.by_tag.get_mut(tag) {
                keys.remove(key);
                if keys.is_empty() {
                    self.by_tag.remove(tag);
                }
            }
        }
        true
    }
}

/// Bidirectional tag ↔ key index
#[derive(Default)]
pub struct TagIndex {
    state: Mutex<TagState>,
}

impl TagIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the tags of a fresh write, replacing whatever the key had.
    /// An empty tag list removes the key from the index.
    pub fn assign(&self, key: &CacheKey, tags: &[String], ttl: Duration) {
        let mut state = self.state.lock();
        state.unlink(key);
        if tags.is_empty() {
            return;
        }

        let mut unique: Vec<String> = Vec::with_capacity(tags.len());
        for tag in tags {
            if !unique.contains(tag) {
                unique.push(tag.clone());
            }
        }
        for tag in &unique {
            state.by_tag.entry(tag.clone()).or_default().insert(key.clone());
        }
        state.by_key.insert(
            key.clone(),
            Tagged {
                tags: unique,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Current tags of `key`; empty when untagged or expired
    pub fn tags_of(&self, key: &CacheKey) -> Vec<String> {
        let now = Instant::now();
        let state = self.state.lock();
        match state.by_key.get(key) {
            Some(tagged) if tagged.expires_at > now => tagged.tags.clone(),
            _ => Vec::new(),
        }
    }

    /// Drop `key` from every tag
    pub fn forget(&self, key: &CacheKey) -> bool {
        self.state.lock().unlink(key)
    }

    /// Drop every key matching `pred`, returning how many were indexed
    pub fn forget_where(&self, pred: impl Fn(&CacheKey) -> bool) -> usize {
        let mut state = self.state.lock();
        let doomed: Vec<CacheKey> = state.by_key.keys().filter(|k| pred(k)).cloned().collect();
        for key in &doomed {
            state.unlink(key);
        }
        doomed.len()
    }

    /// Remove a tag and every key under it from the index, returning the keys
    pub fn take(&self, tag: &str) -> Vec<CacheKey> {
        let mut state = self.state.lock();
        let Some(keys) = state.by_tag.remove(tag) else {
            return Vec::new();
        };
        let keys: Vec<CacheKey> = keys.into_iter().collect();
        for key in &keys {
            state.unlink(key);
        }
        keys
    }

    /// Drop keys whose last write has expired
    pub fn prune_expired(&self) -> usize {
        let now = Instant::now();
        let mut state = self.state.lock();
        let doomed: Vec<CacheKey> = state
            .by_key
            .iter()
            .filter(|(_, tagged)| tagged.expires_at <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            state.unlink(key);
        }
        doomed.len()
    }

    /// Number of distinct tags
    pub fn tag_count(&self) -> usize {
        self.state.lock().by_tag.len()
    }

    /// Number of tagged keys
    pub fn key_count(&self) -> usize {
        self.state.lock().by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().by_key.is_empty()
    }
}

impl std::fmt::Debug for TagIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("TagIndex")
            .field("tags", &state.by_tag.len())
            .field("keys", &state.by_key.len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: Duration = Duration::from_secs(3600);

    fn tags(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_assign_and_take() {
        let index = TagIndex::new();
        let a = CacheKey::new("ns", "a");
        let b = CacheKey::new("ns", "b");
        index.assign(&a, &tags(&["red", "big"]), HOUR);
        index.assign(&b, &tags(&["red"]), HOUR);

        let mut red = index.take("red");
        red.sort();
        assert_eq!(red, vec![a.clone(), b.clone()]);
        // Taken keys leave every tag they were under
        assert!(index.take("big").is_empty());
        assert!(index.is_empty());
    }

    #[tokio::test]
    async fn test_rewrite_replaces_tags() {
        let index = TagIndex::new();
        let key = CacheKey::new("ns", "k");
        index.assign(&key, &tags(&["old"]), HOUR);
        index.assign(&key, &tags(&["new"]), HOUR);

        assert!(index.take("old").is_empty());
        assert_eq!(index.take("new"), vec![key]);
    }

    #[tokio::test]
    async fn test_untagged_rewrite_clears_membership() {
        let index = TagIndex::new();
        let key = CacheKey::new("ns", "k");
        index.assign(&key, &tags(&["t"]), HOUR);
        index.assign(&key, &[], HOUR);

        assert!(index.take("t").is_empty());
        assert_eq!(index.tag_count(), 0);
        assert!(index.tags_of(&key).is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_tags_collapse() {
        let index = TagIndex::new();
        let key = CacheKey::new("ns", "k");
        index.assign(&key, &tags(&["t", "t"]), HOUR);
        assert_eq!(index.tags_of(&key), tags(&["t"]));
    }

    #[tokio::test]
    async fn test_forget_where_scopes_by_predicate() {
        let index = TagIndex::new();
        index.assign(&CacheKey::new("a", "user-1"), &tags(&["t"]), HOUR);
        index.assign(&CacheKey::new("a", "order-1"), &tags(&["t"]), HOUR);
        index.assign(&CacheKey::new("b", "user-1"), &tags(&["t"]), HOUR);

        let removed = index.forget_where(|k| k.namespace() == "a" && k.key().starts_with("user-"));
        assert_eq!(removed, 1);
        assert_eq!(index.key_count(), 2);
        assert!(index.forget(&CacheKey::new("b", "user-1")));
        assert!(!index.forget(&CacheKey::new("b", "user-1")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_keys_are_pruned() {
        let index = TagIndex::new();
        for i in 0..1000 {
            index.assign(&CacheKey::new("ns", format!("k{}", i)), &tags(&["bulk"]), Duration::from_secs(1));
        }
        let survivor = CacheKey::new("ns", "long");
        index.assign(&survivor, &tags(&["bulk", "keep"]), HOUR);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(index.tags_of(&CacheKey::new("ns", "k0")).is_empty());
        assert_eq!(index.prune_expired(), 1000);
        assert_eq!(index.key_count(), 1);
        assert_eq!(index.tag_count(), 2);
        assert_eq!(index.tags_of(&survivor), tags(&["bulk", "keep"]));
    }
}

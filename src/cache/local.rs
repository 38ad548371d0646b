//! Local Tier - in-process bounded store
//!
//! Holds already-deserialized values keyed by [`CacheKey`], bounded by an
//! estimated byte budget and an entry count.
//!
//! # Design
//!
//! - [`ShardedMap`] with [`SHARD_COUNT`] shards; every mutation of a key
//!   happens under that key's shard lock
//! - Lazy expiry on `get`, plus `sweep_expired` for entries never re-read
//! - LRU eviction driven by a store-wide access clock, down to a low watermark
//! - Eviction and sweeps visit one shard at a time (snapshot, then remove)

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use super::entry::{CacheEntry, CacheKey, LocalValue};
use super::shard::ShardedMap;
use super::{DEFAULT_LOCAL_MAX_BYTES, DEFAULT_LOCAL_MAX_ENTRIES, DEFAULT_MAX_ITEM_BYTES, SHARD_COUNT};

/// Local tier configuration
#[derive(Debug, Clone)]
pub struct LocalConfig {
    /// Ceiling for the summed size estimates
    pub max_bytes: u64,
    /// Ceiling for the number of resident entries
    pub max_entries: usize,
    /// Larger entries are never admitted
    pub max_item_bytes: u64,
    /// Eviction stops once usage falls to this fraction of both ceilings
    pub low_watermark: f64,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_LOCAL_MAX_BYTES,
            max_entries: DEFAULT_LOCAL_MAX_ENTRIES,
            max_item_bytes: DEFAULT_MAX_ITEM_BYTES,
            low_watermark: 0.9,
        }
    }
}

/// Outcome of a local write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Entry is resident; `evicted` lists keys removed to make room
    Stored { evicted: Vec<CacheKey> },
    /// Entry exceeded the per-item ceiling and was not stored
    Rejected,
}

impl Admission {
    pub fn is_stored(&self) -> bool {
        matches!(self, Admission::Stored { .. })
    }
}

/// In-process cache tier
pub struct LocalStore {
    storage: ShardedMap<CacheKey, Arc<CacheEntry>, SHARD_COUNT>,
    config: LocalConfig,
    /// Sum of resident entry sizes
    current_size: AtomicU64,
    /// Access clock for LRU ordering
    clock: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl Default for LocalStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalStore {
    /// Create a local store with default configuration
    pub fn new() -> Self {
        Self::with_config(LocalConfig::default())
    }

    /// Create a local store with custom configuration
    pub fn with_config(config: LocalConfig) -> Self {
        Self {
            storage: ShardedMap::new(),
            config,
            current_size: AtomicU64::new(0),
            clock: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    #[inline]
    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Look up a live entry. An expired entry is removed and reported absent.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<CacheEntry>> {
        let entry = self.storage.get(key)?;

        if entry.is_expired() {
            // Only remove the entry we looked at; a concurrent set may have replaced it.
            if let Some(removed) = self
                .storage
                .remove_if(key, |current| Arc::ptr_eq(current, &entry))
            {
                self.release(&removed);
                self.expirations.fetch_add(1, Ordering::Relaxed);
            }
            return None;
        }

        entry.touch(self.tick());
        Some(entry)
    }

    /// True if a live entry exists. Does not update recency.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.storage
            .get(key)
            .map(|e| !e.is_expired())
            .unwrap_or(false)
    }

    /// Store a value. Entries above the per-item ceiling are rejected; the
    /// new entry itself is never chosen as an eviction victim.
    pub fn set(
        &self,
        key: CacheKey,
        value: LocalValue,
        ttl: Duration,
        tags: &[String],
        approx_size: u64,
    ) -> Admission {
        if approx_size > self.config.max_item_bytes.min(self.config.max_bytes) {
            // Drop any stale copy so readers do not see an older value.
            self.delete(&key);
            tracing::debug!(
                "Local tier rejected {} ({} bytes > {} byte item ceiling)",
                key,
                approx_size,
                self.config.max_item_bytes
            );
            return Admission::Rejected;
        }

        let entry = Arc::new(CacheEntry::new(value, ttl, tags, approx_size));
        entry.touch(self.tick());

        match self.storage.insert(key.clone(), entry) {
            Some(old) => {
                self.current_size.fetch_add(approx_size, Ordering::Relaxed);
                self.release(&old);
            }
            None => {
                self.current_size.fetch_add(approx_size, Ordering::Relaxed);
            }
        }

        let evicted = if self.over_ceiling() {
            self.evict(&key)
        } else {
            Vec::new()
        };

        Admission::Stored { evicted }
    }

    /// Remove a key. Returns true if an entry was present.
    pub fn delete(&self, key: &CacheKey) -> bool {
        match self.storage.remove(key) {
            Some(removed) => {
                self.release(&removed);
                true
            }
            None => false,
        }
    }

    /// Remove every entry matching `pred`, returning the removed keys
    pub fn delete_where<F>(&self, mut pred: F) -> Vec<CacheKey>
    where
        F: FnMut(&CacheKey, &CacheEntry) -> bool,
    {
        let mut removed = Vec::new();
        for shard in self.storage.shards() {
            for (key, entry) in shard.drain_where(|k, e| pred(k, e)) {
                self.release(&entry);
                removed.push(key);
            }
        }
        removed
    }

    /// Remove all expired entries, one shard at a time
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let swept = self.delete_where(|_, e| e.is_expired_at(now)).len();
        if swept > 0 {
            self.expirations.fetch_add(swept as u64, Ordering::Relaxed);
        }
        swept
    }

    /// Drop everything
    pub fn clear(&self) {
        for shard in self.storage.shards() {
            for (_, entry) in shard.drain_where(|_, _| true) {
                self.release(&entry);
            }
        }
    }

    /// Number of resident entries (including not-yet-swept expired ones)
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// Summed size estimate of resident entries
    pub fn size_bytes(&self) -> u64 {
        self.current_size.load(Ordering::Relaxed)
    }

    /// Fraction of the tighter of the two ceilings currently used
    pub fn utilization(&self) -> f64 {
        let by_bytes = if self.config.max_bytes == 0 {
            1.0
        } else {
            self.size_bytes() as f64 / self.config.max_bytes as f64
        };
        let by_entries = if self.config.max_entries == 0 {
            1.0
        } else {
            self.len() as f64 / self.config.max_entries as f64
        };
        by_bytes.max(by_entries)
    }

    /// Total entries evicted for capacity
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Total entries dropped because they expired
    pub fn expirations(&self) -> u64 {
        self.expirations.load(Ordering::Relaxed)
    }

    pub fn config(&self) -> &LocalConfig {
        &self.config
    }

    #[inline]
    fn release(&self, entry: &CacheEntry) {
        let size = entry.size();
        let _ = self
            .current_size
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |cur| {
                Some(cur.saturating_sub(size))
            });
    }

    fn over_ceiling(&self) -> bool {
        self.size_bytes() > self.config.max_bytes || self.len() > self.config.max_entries
    }

    fn above_low_watermark(&self) -> bool {
        let bytes_target = (self.config.max_bytes as f64 * self.config.low_watermark) as u64;
        let entries_target = (self.config.max_entries as f64 * self.config.low_watermark) as usize;
        self.size_bytes() > bytes_target || self.len() > entries_target
    }

    /// Evict least recently used entries until under the low watermark.
    /// Expired entries go first. `protect` is never evicted.
    fn evict(&self, protect: &CacheKey) -> Vec<CacheKey> {
        let now = Instant::now();
        let mut candidates: Vec<(CacheKey, Arc<CacheEntry>)> = Vec::new();
        for shard in self.storage.shards() {
            candidates.extend(
                shard
                    .entries()
                    .into_iter()
                    .filter(|(k, _)| k != protect),
            );
        }

        candidates.sort_by_key(|(_, e)| (!e.is_expired_at(now), e.last_touch()));

        let mut evicted = Vec::new();
        for (key, entry) in candidates {
            if !self.above_low_watermark() {
                break;
            }
            if let Some(removed) = self
                .storage
                .remove_if(&key, |current| Arc::ptr_eq(current, &entry))
            {
                self.release(&removed);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                evicted.push(key);
            }
        }

        if !evicted.is_empty() {
            tracing::debug!(
                "Local tier evicted {} entries ({} bytes resident)",
                evicted.len(),
                self.size_bytes()
            );
        }
        evicted
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn key(k: &str) -> CacheKey {
        CacheKey::new("ns", k)
    }

    fn small_store(max_bytes: u64, max_entries: usize) -> LocalStore {
        LocalStore::with_config(LocalConfig {
            max_bytes,
            max_entries,
            max_item_bytes: max_bytes,
            low_watermark: 0.9,
        })
    }

    fn put(store: &LocalStore, k: &str, size: u64) -> Admission {
        store.set(key(k), Arc::new(k.to_string()), Duration::from_secs(60), &[], size)
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let store = LocalStore::new();
        put(&store, "a", 10);

        let entry = store.get(&key("a")).unwrap();
        assert_eq!(entry.downcast::<String>(), Some("a".to_string()));
        assert_eq!(store.size_bytes(), 10);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_overwrite_adjusts_size() {
        let store = LocalStore::new();
        put(&store, "a", 10);
        put(&store, "a", 25);
        assert_eq!(store.size_bytes(), 25);
        assert!(store.delete(&key("a")));
        assert_eq!(store.size_bytes(), 0);
        assert!(!store.delete(&key("a")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lazy_expiry_removes_entry() {
        let store = LocalStore::new();
        store.set(key("a"), Arc::new(1u8), Duration::from_secs(5), &[], 8);

        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(store.get(&key("a")).is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(store.get(&key("a")).is_none());
        assert_eq!(store.len(), 0);
        assert_eq!(store.size_bytes(), 0);
        assert_eq!(store.expirations(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_expired() {
        let store = LocalStore::new();
        store.set(key("short"), Arc::new(1u8), Duration::from_secs(1), &[], 8);
        store.set(key("long"), Arc::new(1u8), Duration::from_secs(100), &[], 8);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.sweep_expired(), 1);
        assert_eq!(store.len(), 1);
        assert!(store.contains(&key("long")));
    }

    #[tokio::test]
    async fn test_oversized_item_rejected() {
        let store = LocalStore::with_config(LocalConfig {
            max_item_bytes: 100,
            ..Default::default()
        });
        assert_eq!(put(&store, "big", 101), Admission::Rejected);
        assert!(store.get(&key("big")).is_none());
        assert!(put(&store, "ok", 100).is_stored());
    }

    #[tokio::test]
    async fn test_evicts_least_recently_used() {
        let store = small_store(100, 1000);
        for k in ["a", "b", "c", "d"] {
            put(&store, k, 25);
        }
        // Touch "a" so "b" becomes the oldest
        assert!(store.get(&key("a")).is_some());

        let admission = put(&store, "e", 25);
        assert_eq!(
            admission,
            Admission::Stored {
                evicted: vec![key("b"), key("c")]
            }
        );
        assert!(store.size_bytes() <= 90);
        assert!(store.contains(&key("a")));
        assert!(store.contains(&key("e")));
        assert_eq!(store.evictions(), 2);
    }

    #[tokio::test]
    async fn test_new_entry_never_evicted() {
        let store = small_store(100, 1000);
        put(&store, "a", 10);
        put(&store, "huge", 100);
        assert!(store.contains(&key("huge")));
        assert!(!store.contains(&key("a")));
    }

    #[tokio::test]
    async fn test_entry_count_ceiling() {
        let store = small_store(u64::MAX / 2, 10);
        for i in 0..50 {
            put(&store, &format!("k{i}"), 1);
        }
        assert!(store.len() <= 10);
        assert!(store.contains(&key("k49")));
    }

    #[tokio::test]
    async fn test_delete_where_and_clear() {
        let store = LocalStore::new();
        let tags = vec!["sale".to_string()];
        store.set(key("a"), Arc::new(1u8), Duration::from_secs(60), &tags, 4);
        store.set(key("b"), Arc::new(1u8), Duration::from_secs(60), &[], 4);

        let removed = store.delete_where(|_, e| e.has_tag("sale"));
        assert_eq!(removed, vec![key("a")]);
        assert_eq!(store.size_bytes(), 4);

        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.size_bytes(), 0);
    }

    #[tokio::test]
    async fn test_utilization() {
        let store = small_store(1000, 4);
        put(&store, "a", 100);
        put(&store, "b", 100);
        assert!((store.utilization() - 0.5).abs() < f64::EPSILON);
    }
}

//! Cache Entry Types
//!
//! Namespaced keys and the resident record kept by the local tier.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

/// Type-erased, already-deserialized value held by the local tier
pub type LocalValue = Arc<dyn Any + Send + Sync>;

/// Cache key - composite of namespace and caller key
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    namespace: String,
    key: String,
}

impl CacheKey {
    /// Create a new cache key
    pub fn new(namespace: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            key: key.into(),
        }
    }

    /// Get namespace
    #[inline]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Get caller key
    #[inline]
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.key)
    }
}

/// Local-tier entry: value, absolute expiry, tags and size estimate.
///
/// `last_touch` holds a value of the store-wide access clock; the smallest
/// value is the least recently used entry.
pub struct CacheEntry {
    value: LocalValue,
    expires_at: Instant,
    tags: Arc<[String]>,
    approx_size: u64,
    last_touch: AtomicU64,
}

impl CacheEntry {
    /// Create an entry that expires `ttl` from now
    pub fn new(value: LocalValue, ttl: Duration, tags: &[String], approx_size: u64) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
            tags: tags.into(),
            approx_size,
            last_touch: AtomicU64::new(0),
        }
    }

    /// Shared handle to the stored value
    #[inline]
    pub fn value(&self) -> LocalValue {
        Arc::clone(&self.value)
    }

    /// Downcast the stored value to `T`
    pub fn downcast<T: Clone + 'static>(&self) -> Option<T> {
        self.value.downcast_ref::<T>().cloned()
    }

    /// Absolute expiry
    #[inline]
    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    /// Expired once now >= expires_at
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    #[inline]
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    /// Time left before expiry (zero when expired)
    pub fn remaining_ttl(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }

    /// Tags attached at write time
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Byte estimate used for memory accounting
    #[inline]
    pub fn size(&self) -> u64 {
        self.approx_size
    }

    /// Record an access at the given clock value
    #[inline]
    pub fn touch(&self, tick: u64) {
        self.last_touch.store(tick, Ordering::Relaxed);
    }

    #[inline]
    pub fn last_touch(&self) -> u64 {
        self.last_touch.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("size", &self.approx_size)
            .field("tags", &self.tags)
            .field("last_touch", &self.last_touch())
            .field("is_expired", &self.is_expired())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

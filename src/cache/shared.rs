//! Shared Tier - remote key-value store
//!
//! [`SharedBackend`] is the raw store seen through string keys.
//! [`SharedTier`] wraps a backend with the `{prefix}:{namespace}:{key}`
//! naming scheme, a per-operation timeout and the failure policy: backend
//! errors become absent reads and `false` writes, and are counted.
//!
//! # Design
//!
//! - Pluggable backend (in-memory for tests and single-node use, Redis)
//! - Multi-key operations preserve input order
//! - Pattern deletion is glob-based on the physical key

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use globset::GlobBuilder;
use tokio::time::Instant;

use crate::error::{Error, Result};

/// Bytes read from the shared tier together with their remaining lifetime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedValue {
    pub bytes: Bytes,
    /// `None` when the backend cannot report a TTL
    pub ttl_remaining: Option<Duration>,
}

/// One element of a multi-set
#[derive(Debug, Clone)]
pub struct SharedItem {
    pub key: String,
    pub bytes: Bytes,
    pub ttl: Duration,
}

/// Shared storage backend trait
#[async_trait]
pub trait SharedBackend: Send + Sync {
    /// Short backend name for logs and metrics
    fn name(&self) -> &'static str;

    /// Get a value and its remaining TTL
    async fn get(&self, key: &str) -> Result<Option<SharedValue>>;

    /// Store a value with a TTL
    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()>;

    /// Delete a key, returning whether it existed
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Check if a key exists
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Get many keys with their remaining TTLs; the result has one slot per
    /// input key, in order
    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<SharedValue>>>;

    /// Store many keys
    async fn mset(&self, items: &[SharedItem]) -> Result<()>;

    /// Delete every key matching a glob pattern, returning the count
    async fn scan_delete(&self, pattern: &str) -> Result<u64>;

    /// Connectivity check
    async fn ping(&self) -> Result<()>;
}

// =============================================================================
// In-memory backend
// =============================================================================

struct StoredValue {
    bytes: Bytes,
    expires_at: Instant,
}

impl StoredValue {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }

    fn read(&self, now: Instant) -> SharedValue {
        SharedValue {
            bytes: self.bytes.clone(),
            ttl_remaining: Some(self.expires_at.saturating_duration_since(now)),
        }
    }
}

/// In-memory shared backend
///
/// Lazily expires keys on access. Can be switched unavailable to simulate an
/// outage.
pub struct InMemorySharedBackend {
    storage: DashMap<String, StoredValue>,
    available: AtomicBool,
}

impl Default for InMemorySharedBackend {
    fn default() -> Self {
        Self {
            storage: DashMap::new(),
            available: AtomicBool::new(true),
        }
    }
}

impl InMemorySharedBackend {
    /// Create a new in-memory backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle availability; while unavailable every call fails
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of stored keys (expired ones included until touched)
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    fn check(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::Backend("in-memory backend unavailable".into()))
        }
    }

    /// Live value for `key`, dropping it if it has expired
    fn live(&self, key: &str, now: Instant) -> Option<SharedValue> {
        let found = self
            .storage
            .get(key)
            .map(|v| v.is_live(now).then(|| v.read(now)));
        match found {
            Some(Some(value)) => Some(value),
            Some(None) => {
                self.storage.remove_if(key, |_, v| !v.is_live(now));
                None
            }
            None => None,
        }
    }

    fn put(&self, key: &str, bytes: Bytes, ttl: Duration) {
        self.storage.insert(
            key.to_string(),
            StoredValue {
                bytes,
                expires_at: Instant::now() + ttl,
            },
        );
    }
}

#[async_trait]
impl SharedBackend for InMemorySharedBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<SharedValue>> {
        self.check()?;
        Ok(self.live(key, Instant::now()))
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()> {
        self.check()?;
        self.put(key, value, ttl);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.check()?;
        let now = Instant::now();
        Ok(self
            .storage
            .remove(key)
            .map(|(_, v)| v.is_live(now))
            .unwrap_or(false))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.check()?;
        Ok(self.live(key, Instant::now()).is_some())
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<SharedValue>>> {
        self.check()?;
        let now = Instant::now();
        Ok(keys.iter().map(|k| self.live(k, now)).collect())
    }

    async fn mset(&self, items: &[SharedItem]) -> Result<()> {
        self.check()?;
        for item in items {
            self.put(&item.key, item.bytes.clone(), item.ttl);
        }
        Ok(())
    }

    async fn scan_delete(&self, pattern: &str) -> Result<u64> {
        self.check()?;
        let matcher = GlobBuilder::new(pattern)
            .literal_separator(false)
            .build()?
            .compile_matcher();

        let doomed: Vec<String> = self
            .storage
            .iter()
            .filter(|e| matcher.is_match(e.key()))
            .map(|e| e.key().clone())
            .collect();

        let removed = doomed
            .iter()
            .filter(|key| self.storage.remove(*key).is_some())
            .count();
        Ok(removed as u64)
    }

    async fn ping(&self) -> Result<()> {
        self.check()
    }
}

// =============================================================================
// Shared tier client
// =============================================================================

/// Shared tier configuration
#[derive(Debug, Clone)]
pub struct SharedConfig {
    /// Upper bound for any single backend call
    pub op_timeout: Duration,
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self {
            op_timeout: Duration::from_secs(2),
        }
    }
}

/// Namespaced, failure-isolating client over a [`SharedBackend`]
pub struct SharedTier {
    backend: Arc<dyn SharedBackend>,
    prefix: String,
    config: SharedConfig,
    operations: AtomicU64,
    errors: AtomicU64,
}

impl SharedTier {
    pub fn new(backend: Arc<dyn SharedBackend>, prefix: impl Into<String>, config: SharedConfig) -> Self {
        Self {
            backend,
            prefix: prefix.into(),
            config,
            operations: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    /// Physical key: `{prefix}:{namespace}:{key}`
    pub fn physical_key(&self, namespace: &str, key: &str) -> String {
        format!("{}:{}:{}", self.prefix, namespace, key)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Backend calls issued
    pub fn operation_count(&self) -> u64 {
        self.operations.load(Ordering::Relaxed)
    }

    /// Backend calls that failed or timed out
    pub fn error_count(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn reset_counters(&self) {
        self.operations.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
    }

    /// Run a backend call under the timeout; failures are logged, counted and
    /// turned into `None`.
    async fn guarded<T, F>(&self, op: &'static str, target: &str, fut: F) -> Option<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.operations.fetch_add(1, Ordering::Relaxed);
        let outcome = match tokio::time::timeout(self.config.op_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::Backend(format!(
                "{} timed out after {:?}",
                op, self.config.op_timeout
            ))),
        };
        match outcome {
            Ok(value) => Some(value),
            Err(e) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    backend = self.backend.name(),
                    "Shared tier {} failed for {}: {}",
                    op,
                    target,
                    e
                );
                None
            }
        }
    }

    /// Read a key; absent on miss or backend failure
    pub async fn get(&self, namespace: &str, key: &str) -> Option<SharedValue> {
        let pkey = self.physical_key(namespace, key);
        self.guarded("get", &pkey, self.backend.get(&pkey))
            .await
            .flatten()
    }

    /// Write a key; `false` on backend failure
    pub async fn set(&self, namespace: &str, key: &str, bytes: Bytes, ttl: Duration) -> bool {
        let pkey = self.physical_key(namespace, key);
        self.guarded("set", &pkey, self.backend.set(&pkey, bytes, ttl))
            .await
            .is_some()
    }

    /// Delete a key; `false` when absent or on backend failure
    pub async fn del(&self, namespace: &str, key: &str) -> bool {
        let pkey = self.physical_key(namespace, key);
        self.guarded("del", &pkey, self.backend.delete(&pkey))
            .await
            .unwrap_or(false)
    }

    pub async fn exists(&self, namespace: &str, key: &str) -> bool {
        let pkey = self.physical_key(namespace, key);
        self.guarded("exists", &pkey, self.backend.exists(&pkey))
            .await
            .unwrap_or(false)
    }

    /// Multi-get preserving input order; all slots absent on failure
    pub async fn mget(&self, namespace: &str, keys: &[String]) -> Vec<Option<SharedValue>> {
        if keys.is_empty() {
            return Vec::new();
        }
        let pkeys: Vec<String> = keys.iter().map(|k| self.physical_key(namespace, k)).collect();
        let target = format!("{} keys in {}", keys.len(), namespace);
        match self.guarded("mget", &target, self.backend.mget(&pkeys)).await {
            Some(values) if values.len() == keys.len() => values,
            Some(values) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    "Shared tier mget returned {} values for {} keys",
                    values.len(),
                    keys.len()
                );
                vec![None; keys.len()]
            }
            None => vec![None; keys.len()],
        }
    }

    /// Multi-set; `false` on backend failure
    pub async fn mset(&self, namespace: &str, items: Vec<SharedItem>) -> bool {
        if items.is_empty() {
            return true;
        }
        let target = format!("{} keys in {}", items.len(), namespace);
        let items: Vec<SharedItem> = items
            .into_iter()
            .map(|item| SharedItem {
                key: self.physical_key(namespace, &item.key),
                ..item
            })
            .collect();
        self.guarded("mset", &target, self.backend.mset(&items))
            .await
            .is_some()
    }

    /// Delete every key in `namespace` matching the glob; 0 on failure
    pub async fn scan_delete(&self, namespace: &str, pattern: &str) -> u64 {
        let full = self.physical_key(namespace, pattern);
        self.guarded("scan_delete", &full, self.backend.scan_delete(&full))
            .await
            .unwrap_or(0)
    }

    pub async fn ping(&self) -> bool {
        self.guarded("ping", self.backend.name(), self.backend.ping())
            .await
            .is_some()
    }
}

impl std::fmt::Debug for SharedTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedTier")
            .field("backend", &self.backend.name())
            .field("prefix", &self.prefix)
            .field("errors", &self.error_count())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn tier() -> (Arc<InMemorySharedBackend>, SharedTier) {
        let backend = Arc::new(InMemorySharedBackend::new());
        let tier = SharedTier::new(backend.clone(), "app", SharedConfig::default());
        (backend, tier)
    }

    #[tokio::test]
    async fn test_namespaced_keys() {
        let (backend, tier) = tier();
        assert!(tier.set("catalog", "item-1", Bytes::from_static(b"x"), Duration::from_secs(60)).await);

        assert!(backend.exists("app:catalog:item-1").await.unwrap());
        assert!(tier.get("catalog", "item-1").await.is_some());
        assert!(tier.get("other", "item-1").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_reported_and_enforced() {
        let (_, tier) = tier();
        tier.set("ns", "k", Bytes::from_static(b"v"), Duration::from_secs(10)).await;

        tokio::time::advance(Duration::from_secs(4)).await;
        let hit = tier.get("ns", "k").await.unwrap();
        assert_eq!(hit.ttl_remaining, Some(Duration::from_secs(6)));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(tier.get("ns", "k").await.is_none());
        assert!(!tier.exists("ns", "k").await);
    }

    #[tokio::test]
    async fn test_mget_preserves_order() {
        let (_, tier) = tier();
        tier.set("ns", "k2", Bytes::from_static(b"two"), Duration::from_secs(60)).await;

        let keys = vec!["k1".to_string(), "k2".to_string(), "k3".to_string()];
        let values: Vec<Option<Bytes>> = tier
            .mget("ns", &keys)
            .await
            .into_iter()
            .map(|v| v.map(|v| v.bytes))
            .collect();
        assert_eq!(values, vec![None, Some(Bytes::from_static(b"two")), None]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mget_reports_remaining_ttl() {
        let (_, tier) = tier();
        tier.set("ns", "k", Bytes::from_static(b"v"), Duration::from_secs(300)).await;
        tokio::time::advance(Duration::from_secs(245)).await;

        let values = tier.mget("ns", &["k".to_string(), "missing".to_string()]).await;
        assert_eq!(values[0].as_ref().and_then(|v| v.ttl_remaining), Some(Duration::from_secs(55)));
        assert!(values[1].is_none());
    }

    #[tokio::test]
    async fn test_mset_then_mget() {
        let (_, tier) = tier();
        let items = (0..3)
            .map(|i| SharedItem {
                key: format!("k{i}"),
                bytes: Bytes::from(format!("v{i}")),
                ttl: Duration::from_secs(60),
            })
            .collect();
        assert!(tier.mset("ns", items).await);

        let keys: Vec<String> = (0..3).rev().map(|i| format!("k{i}")).collect();
        let values = tier.mget("ns", &keys).await;
        assert_eq!(values[0].as_ref().map(|v| v.bytes.clone()), Some(Bytes::from_static(b"v2")));
        assert_eq!(values[2].as_ref().map(|v| v.bytes.clone()), Some(Bytes::from_static(b"v0")));
    }

    #[tokio::test]
    async fn test_scan_delete_stays_in_namespace() {
        let (backend, tier) = tier();
        for key in ["item-1", "item-2", "user-1"] {
            tier.set("catalog", key, Bytes::from_static(b"x"), Duration::from_secs(60)).await;
        }
        tier.set("other", "item-1", Bytes::from_static(b"x"), Duration::from_secs(60)).await;

        assert_eq!(tier.scan_delete("catalog", "item-*").await, 2);
        assert!(tier.exists("catalog", "user-1").await);
        assert!(tier.exists("other", "item-1").await);
        assert_eq!(backend.len(), 2);
    }

    #[tokio::test]
    async fn test_outage_is_swallowed() {
        let (backend, tier) = tier();
        tier.set("ns", "k", Bytes::from_static(b"v"), Duration::from_secs(60)).await;
        backend.set_available(false);

        assert!(tier.get("ns", "k").await.is_none());
        assert!(!tier.set("ns", "k", Bytes::from_static(b"v"), Duration::from_secs(60)).await);
        assert!(!tier.del("ns", "k").await);
        assert_eq!(tier.mget("ns", &["k".to_string()]).await, vec![None]);
        assert_eq!(tier.scan_delete("ns", "*").await, 0);
        assert!(!tier.ping().await);
        assert_eq!(tier.error_count(), 6);

        backend.set_available(true);
        assert!(tier.get("ns", "k").await.is_some());
        assert!(tier.ping().await);
    }

    struct StalledBackend;

    #[async_trait]
    impl SharedBackend for StalledBackend {
        fn name(&self) -> &'static str {
            "stalled"
        }
        async fn get(&self, _key: &str) -> Result<Option<SharedValue>> {
            futures::future::pending().await
        }
        async fn set(&self, _key: &str, _value: Bytes, _ttl: Duration) -> Result<()> {
            futures::future::pending().await
        }
        async fn delete(&self, _key: &str) -> Result<bool> {
            futures::future::pending().await
        }
        async fn exists(&self, _key: &str) -> Result<bool> {
            futures::future::pending().await
        }
        async fn mget(&self, _keys: &[String]) -> Result<Vec<Option<SharedValue>>> {
            futures::future::pending().await
        }
        async fn mset(&self, _items: &[SharedItem]) -> Result<()> {
            futures::future::pending().await
        }
        async fn scan_delete(&self, _pattern: &str) -> Result<u64> {
            futures::future::pending().await
        }
        async fn ping(&self) -> Result<()> {
            futures::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_operation_timeout() {
        let tier = SharedTier::new(
            Arc::new(StalledBackend),
            "app",
            SharedConfig {
                op_timeout: Duration::from_millis(50),
            },
        );
        assert!(tier.get("ns", "k").await.is_none());
        assert!(!tier.set("ns", "k", Bytes::new(), Duration::from_secs(1)).await);
        assert_eq!(tier.error_count(), 2);
        assert_eq!(tier.operation_count(), 2);
    }
}

//! Tiered Cache Manager
//!
//! Read-through over the local tier, then the shared tier, then a caller
//! fetch; write-through to both tiers. Owns the local store, the strategy
//! registry, the tag index and the refresh-ahead machinery.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use globset::{GlobBuilder, GlobMatcher};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::codec::{CompressionConfig, EntryCodec};
use super::entry::{CacheKey, LocalValue};
use super::flight::{Join, SingleFlight};
use super::local::{Admission, LocalConfig, LocalStore};
use super::shared::{InMemorySharedBackend, SharedBackend, SharedConfig, SharedItem, SharedTier};
use super::stats::{CacheStats, LocalTierStats, SharedTierStats, StatsSnapshot, Tier};
use super::strategy::{NamespaceStrategy, StrategyRegistry};
use super::tags::TagIndex;
use super::{DEFAULT_FETCH_TIMEOUT, DEFAULT_TTL};
use crate::error::{Error, Result};
use crate::monitoring::health::{HealthReport, HealthThresholds};

/// Bound for values the cache can hold
pub trait CacheValue: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> CacheValue for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// First segment of every shared-tier key
    pub key_prefix: String,
    /// TTL for namespaces without a registered strategy
    pub default_ttl: Duration,
    /// Upper bound on a single fetch; `None` waits forever
    pub fetch_timeout: Option<Duration>,
    /// Period of the expired-entry sweep
    pub maintenance_interval: Duration,
    /// Period of the stats log line
    pub stats_interval: Duration,
    pub local: LocalConfig,
    pub shared: SharedConfig,
    pub compression: CompressionConfig,
    pub health: HealthThresholds,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            key_prefix: "cache".to_string(),
            default_ttl: DEFAULT_TTL,
            fetch_timeout: Some(DEFAULT_FETCH_TIMEOUT),
            maintenance_interval: Duration::from_secs(60),
            stats_interval: Duration::from_secs(300),
            local: LocalConfig::default(),
            shared: SharedConfig::default(),
            compression: CompressionConfig::default(),
            health: HealthThresholds::default(),
        }
    }
}

impl CacheConfig {
    /// Reject configurations the cache cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.key_prefix.is_empty() {
            return Err(Error::Config("key_prefix must not be empty".into()));
        }
        if self.default_ttl.is_zero() {
            return Err(Error::Config("default_ttl must be positive".into()));
        }
        if self.fetch_timeout.is_some_and(|t| t.is_zero()) {
            return Err(Error::Config("fetch_timeout must be positive".into()));
        }
        if self.maintenance_interval.is_zero() || self.stats_interval.is_zero() {
            return Err(Error::Config("maintenance intervals must be positive".into()));
        }
        if self.local.max_bytes == 0 || self.local.max_entries == 0 {
            return Err(Error::Config("local tier ceilings must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.local.low_watermark) {
            return Err(Error::Config(format!(
                "low_watermark {} outside 0.0..=1.0",
                self.local.low_watermark
            )));
        }
        if self.shared.op_timeout.is_zero() {
            return Err(Error::Config("shared op_timeout must be positive".into()));
        }
        self.health.validate()
    }
}

/// Which tiers accepted a write
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOutcome {
    pub local: bool,
    pub shared: bool,
}

/// Entries removed by an invalidation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Invalidation {
    pub local: usize,
    pub shared: u64,
}

type RefreshFn = Arc<dyn Fn(TieredCache, String) -> BoxFuture<'static, Result<()>> + Send + Sync>;

struct Refresher {
    namespace: String,
    matcher: GlobMatcher,
    refresh: RefreshFn,
}

/// One unit of [`TieredCache::warm_up`]
pub struct WarmUpJob {
    key: CacheKey,
    run: Box<dyn FnOnce(TieredCache, CacheKey) -> BoxFuture<'static, Result<()>> + Send>,
}

impl WarmUpJob {
    pub fn new<T, Fut, E>(namespace: impl Into<String>, key: impl Into<String>, fetch: Fut) -> Self
    where
        T: CacheValue,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        E: Into<anyhow::Error>,
    {
        Self {
            key: CacheKey::new(namespace, key),
            run: Box::new(move |cache: TieredCache, key: CacheKey| {
                async move { cache.fetch_and_store(&key, fetch, Vec::new()).await.map(|_| ()) }.boxed()
            }),
        }
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }
}

/// Outcome of a warm-up pass
#[derive(Debug, Default)]
pub struct WarmUpReport {
    pub succeeded: usize,
    pub failed: Vec<(CacheKey, Error)>,
}

impl WarmUpReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

struct Inner {
    config: CacheConfig,
    local: LocalStore,
    shared: SharedTier,
    codec: EntryCodec,
    strategies: StrategyRegistry,
    stats: CacheStats,
    tags: TagIndex,
    flights: SingleFlight<CacheKey, Result<LocalValue>>,
    refreshers: RwLock<Vec<Refresher>>,
    /// Keys with a refresh-ahead task running
    refreshing: DashMap<CacheKey, ()>,
    started: Instant,
}

/// Two-tier read-through cache. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct TieredCache {
    inner: Arc<Inner>,
}

impl TieredCache {
    /// Create with default configuration over `backend`
    pub fn new(backend: Arc<dyn SharedBackend>) -> Self {
        Self::build(CacheConfig::default(), backend)
    }

    /// Create with custom configuration over `backend`
    pub fn with_config(config: CacheConfig, backend: Arc<dyn SharedBackend>) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config, backend))
    }

    /// Create with an in-memory shared tier (single node, tests)
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemorySharedBackend::new()))
    }

    fn build(config: CacheConfig, backend: Arc<dyn SharedBackend>) -> Self {
        info!(
            backend = backend.name(),
            prefix = %config.key_prefix,
            "Creating tiered cache (local ceiling {} bytes / {} entries)",
            config.local.max_bytes,
            config.local.max_entries
        );
        let default_strategy = NamespaceStrategy::new(config.default_ttl);
        Self {
            inner: Arc::new(Inner {
                local: LocalStore::with_config(config.local.clone()),
                shared: SharedTier::new(backend, config.key_prefix.clone(), config.shared.clone()),
                codec: EntryCodec::with_config(config.compression.clone()),
                strategies: StrategyRegistry::new(default_strategy),
                stats: CacheStats::new(),
                tags: TagIndex::new(),
                flights: SingleFlight::new(),
                refreshers: RwLock::new(Vec::new()),
                refreshing: DashMap::new(),
                started: Instant::now(),
                config,
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Register the policy for a namespace
    pub fn register_strategy(&self, namespace: impl Into<String>, strategy: NamespaceStrategy) {
        self.inner.strategies.register(namespace, strategy);
    }

    pub fn strategy(&self, namespace: &str) -> NamespaceStrategy {
        self.inner.strategies.resolve(namespace)
    }


    /// Register the fetch function used to refresh keys of `namespace`
    /// matching the glob `pattern` ahead of expiry. The first matching
    /// registration wins.
    pub fn register_refresher<T, F, Fut, E>(&self, namespace: &str, pattern: &str, fetch: F) -> Result<()>
    where
        T: CacheValue,
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        E: Into<anyhow::Error>,
    {
        let matcher = compile_glob(pattern)?;
        let ns = namespace.to_string();
        let refresh: RefreshFn = Arc::new(move |cache: TieredCache, key: String| {
            let cache_key = CacheKey::new(ns.clone(), key.clone());
            let fut = fetch(key);
            async move {
                // A refresh keeps whatever tags the key was written with
                let tags = cache.inner.tags.tags_of(&cache_key);
                cache.fetch_and_store(&cache_key, fut, tags).await.map(|_| ())
            }
            .boxed()
        });

        self.inner.refreshers.write().push(Refresher {
            namespace: namespace.to_string(),
            matcher,
            refresh,
        });
        debug!("Registered refresher for {}:{}", namespace, pattern);
        Ok(())
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Look a key up in the local tier, then the shared tier. Never fetches.
    pub async fn get<T: CacheValue>(&self, namespace: &str, key: &str) -> Option<T> {
        let key = CacheKey::new(namespace, key);
        let strategy = self.inner.strategies.resolve(namespace);
        self.lookup(&key, &strategy).await
    }

    /// Return the cached value or compute it with `fetch`, storing the result
    /// in both tiers. Concurrent misses for the same key share one fetch.
    /// Fetch errors are returned and never cached.
    pub async fn get_or_set<T, F, Fut, E>(&self, namespace: &str, key: &str, fetch: F) -> Result<T>
    where
        T: CacheValue,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<anyhow::Error>,
    {
        let cache_key = CacheKey::new(namespace, key);
        let strategy = self.inner.strategies.resolve(namespace);
        if let Some(value) = self.lookup(&cache_key, &strategy).await {
            return Ok(value);
        }

        let mut fetch = Some(fetch);
        loop {
            match self.inner.flights.join(&cache_key) {
                Join::Leader(guard) => {
                    // A previous leader may have stored the value after our lookup.
                    if let Some(value) = self.peek_local::<T>(&cache_key) {
                        guard.complete(Ok(Arc::new(value.clone()) as LocalValue));
                        return Ok(value);
                    }
                    let Some(fetch) = fetch.take() else {
                        return Err(Error::Internal(format!("fetch for {} already consumed", cache_key)));
                    };
                    let outcome = self.fetch_and_store(&cache_key, fetch(), Vec::new()).await;
                    guard.complete(
                        outcome
                            .as_ref()
                            .map(|value| Arc::new(value.clone()) as LocalValue)
                            .map_err(Clone::clone),
                    );
                    return outcome;
                }
                Join::Follower(waiter) => match waiter.wait().await {
                    Some(Ok(shared)) => {
                        if let Some(value) = shared.downcast_ref::<T>() {
                            return Ok(value.clone());
                        }
                        // Leader cached a different type under this key
                        let Some(fetch) = fetch.take() else {
                            return Err(Error::Internal(format!("fetch for {} already consumed", cache_key)));
                        };
                        return self.fetch_and_store(&cache_key, fetch(), Vec::new()).await;
                    }
                    Some(Err(e)) => return Err(e),
                    // Leader was cancelled; contend again
                    None => continue,
                },
            }
        }
    }

    /// Order-preserving multi-get through both tiers
    pub async fn mget<T: CacheValue, K: AsRef<str>>(&self, namespace: &str, keys: &[K]) -> Vec<Option<T>> {
        let strategy = self.inner.strategies.resolve(namespace);
        let mut results: Vec<Option<T>> = Vec::with_capacity(keys.len());
        let mut missing: Vec<(usize, CacheKey)> = Vec::new();

        for (idx, key) in keys.iter().enumerate() {
            let cache_key = CacheKey::new(namespace, key.as_ref());
            match self.local_hit::<T>(&cache_key, &strategy) {
                Some(value) => results.push(Some(value)),
                None => {
                    results.push(None);
                    missing.push((idx, cache_key));
                }
            }
        }

        if missing.is_empty() {
            return results;
        }

        let shared_keys: Vec<String> = missing.iter().map(|(_, k)| k.key().to_string()).collect();
        let values = self.inner.shared.mget(namespace, &shared_keys).await;
        for ((idx, cache_key), hit) in missing.into_iter().zip(values) {
            let Some(hit) = hit else {
                self.inner.stats.record_miss(namespace, Tier::Shared);
                continue;
            };
            results[idx] = self.decode_and_promote(&cache_key, &strategy, &hit.bytes);
            match (&results[idx], hit.ttl_remaining) {
                (Some(_), Some(remaining)) => self.maybe_refresh(&cache_key, &strategy, remaining),
                (Some(_), None) => {}
                (None, _) => self.inner.stats.record_miss(namespace, Tier::Shared),
            }
        }
        results
    }

    /// True if either tier holds the key
    pub async fn exists(&self, namespace: &str, key: &str) -> bool {
        self.inner.local.contains(&CacheKey::new(namespace, key))
            || self.inner.shared.exists(namespace, key).await
    }

    async fn lookup<T: CacheValue>(&self, key: &CacheKey, strategy: &NamespaceStrategy) -> Option<T> {
        if let Some(value) = self.local_hit(key, strategy) {
            return Some(value);
        }

        let namespace = key.namespace();
        let Some(hit) = self.inner.shared.get(namespace, key.key()).await else {
            self.inner.stats.record_miss(namespace, Tier::Shared);
            debug!("Cache miss for {}", key);
            return None;
        };

        let value = self.decode_and_promote::<T>(key, strategy, &hit.bytes);
        match &value {
            Some(_) => {
                if let Some(remaining) = hit.ttl_remaining {
                    self.maybe_refresh(key, strategy, remaining);
                }
            }
            None => self.inner.stats.record_miss(namespace, Tier::Shared),
        }
        value
    }

    /// Local lookup with stats and refresh-ahead
    fn local_hit<T: CacheValue>(&self, key: &CacheKey, strategy: &NamespaceStrategy) -> Option<T> {
        let found = self
            .inner
            .local
            .get(key)
            .and_then(|entry| entry.downcast::<T>().map(|v| (v, entry.remaining_ttl())));

        match found {
            Some((value, remaining)) => {
                self.inner.stats.record_hit(key.namespace(), Tier::Local);
                self.maybe_refresh(key, strategy, remaining);
                Some(value)
            }
            None => {
                self.inner.stats.record_miss(key.namespace(), Tier::Local);
                None
            }
        }
    }

    fn peek_local<T: CacheValue>(&self, key: &CacheKey) -> Option<T> {
        self.inner.local.get(key).and_then(|entry| entry.downcast::<T>())
    }

    /// Decode shared-tier bytes and copy the value into the local tier.
    /// Undecodable bytes count as a miss.
    fn decode_and_promote<T: CacheValue>(&self, key: &CacheKey, strategy: &NamespaceStrategy, bytes: &[u8]) -> Option<T> {
        let (value, json_len) = match self.inner.codec.decode_sized::<T>(bytes) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!("Discarding undecodable shared entry {}: {}", key, e);
                return None;
            }
        };

        self.inner.stats.record_hit(key.namespace(), Tier::Shared);
        let size = EntryCodec::estimate_size(key.key(), json_len);
        let tags = self.inner.tags.tags_of(key);
        self.store_local(key, Arc::new(value.clone()), strategy.base_ttl, &tags, size);
        debug!("Promoted {} to local tier", key);
        Some(value)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Write a value to both tiers with the namespace TTL
    pub async fn set<T: CacheValue>(&self, namespace: &str, key: &str, value: T) -> WriteOutcome {
        self.set_with_tags(namespace, key, value, &[]).await
    }

    /// Write a value to both tiers and attach tags for group invalidation.
    ///
    /// A value that cannot be serialized is not cached at all. A shared-tier
    /// failure does not undo the local write.
    pub async fn set_with_tags<T: CacheValue>(
        &self,
        namespace: &str,
        key: &str,
        value: T,
        tags: &[&str],
    ) -> WriteOutcome {
        let tags = tags.iter().map(|t| t.to_string()).collect();
        self.write(&CacheKey::new(namespace, key), value, tags).await
    }

    /// Write to both tiers at once. `tags` replace whatever tags the key
    /// had, so an untagged write drops the key from every tag.
    async fn write<T: CacheValue>(&self, key: &CacheKey, value: T, tags: Vec<String>) -> WriteOutcome {
        let namespace = key.namespace();
        let strategy = self.inner.strategies.resolve(namespace);

        let encoded = match self.inner.codec.encode(key.key(), &value, strategy.compress) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!("Not caching {}: {}", key, e);
                return WriteOutcome::default();
            }
        };

        self.inner.tags.assign(key, &tags, strategy.base_ttl);
        let size = encoded.approx_size;
        let (local, shared) = futures::join!(
            async { self.store_local(key, Arc::new(value), strategy.base_ttl, &tags, size) },
            self.inner.shared.set(namespace, key.key(), encoded.bytes, strategy.base_ttl),
        );
        if shared {
            self.inner.stats.record_set(namespace, Tier::Shared);
        }

        WriteOutcome { local, shared }
    }

    /// Write many values of one namespace, using a single shared-tier
    /// multi-set. Returns how many values reached the shared tier.
    pub async fn set_many<T: CacheValue>(&self, namespace: &str, entries: Vec<(String, T)>) -> usize {
        let strategy = self.inner.strategies.resolve(namespace);
        let mut items = Vec::with_capacity(entries.len());

        for (key, value) in entries {
            let encoded = match self.inner.codec.encode(&key, &value, strategy.compress) {
                Ok(encoded) => encoded,
                Err(e) => {
                    warn!("Not caching {}:{}: {}", namespace, key, e);
                    continue;
                }
            };
            let cache_key = CacheKey::new(namespace, key.as_str());
            self.inner.tags.forget(&cache_key);
            self.store_local(&cache_key, Arc::new(value), strategy.base_ttl, &[], encoded.approx_size);
            items.push(SharedItem {
                key,
                bytes: encoded.bytes,
                ttl: strategy.base_ttl,
            });
        }

        let count = items.len();
        if count == 0 || !self.inner.shared.mset(namespace, items).await {
            return 0;
        }
        for _ in 0..count {
            self.inner.stats.record_set(namespace, Tier::Shared);
        }
        count
    }

    fn store_local(&self, key: &CacheKey, value: LocalValue, ttl: Duration, tags: &[String], size: u64) -> bool {
        match self.inner.local.set(key.clone(), value, ttl, tags, size) {
            Admission::Stored { evicted } => {
                self.inner.stats.record_set(key.namespace(), Tier::Local);
                for victim in &evicted {
                    self.inner.stats.record_eviction(victim.namespace());
                }
                true
            }
            Admission::Rejected => false,
        }
    }

    /// Run a fetch under the configured timeout and store its result
    async fn fetch_and_store<T, Fut, E>(&self, key: &CacheKey, fut: Fut, tags: Vec<String>) -> Result<T>
    where
        T: CacheValue,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<anyhow::Error>,
    {
        let namespace = key.namespace();
        let fetched = match self.inner.config.fetch_timeout {
            Some(limit) => match tokio::time::timeout(limit, fut).await {
                Ok(result) => result.map_err(|e| Error::fetch(namespace, key.key(), e)),
                Err(_) => Err(Error::FetchTimeout {
                    namespace: namespace.to_string(),
                    key: key.key().to_string(),
                    timeout: limit,
                }),
            },
            None => fut.await.map_err(|e| Error::fetch(namespace, key.key(), e)),
        };

        match fetched {
            Ok(value) => {
                self.write(key, value.clone(), tags).await;
                Ok(value)
            }
            Err(e) => {
                self.inner.stats.record_fetch_error(namespace);
                warn!("{}", e);
                Err(e)
            }
        }
    }

    // =========================================================================
    // Invalidation
    // =========================================================================

    /// Remove a key from both tiers. Returns true if either tier held it.
    pub async fn delete(&self, namespace: &str, key: &str) -> bool {
        let cache_key = CacheKey::new(namespace, key);
        let local = self.inner.local.delete(&cache_key);
        if local {
            self.inner.stats.record_delete(namespace, Tier::Local);
        }
        let shared = self.inner.shared.del(namespace, key).await;
        if shared {
            self.inner.stats.record_delete(namespace, Tier::Shared);
        }
        self.inner.tags.forget(&cache_key);
        local || shared
    }

    /// Remove every entry written with `tag` from both tiers
    pub async fn invalidate_by_tag(&self, tag: &str) -> Invalidation {
        let indexed = self.inner.tags.take(tag);

        let mut removed: HashSet<CacheKey> = self
            .inner
            .local
            .delete_where(|_, entry| entry.has_tag(tag))
            .into_iter()
            .collect();
        for key in &indexed {
            if self.inner.local.delete(key) {
                removed.insert(key.clone());
            }
        }
        for key in &removed {
            self.inner.tags.forget(key);
            self.inner.stats.record_delete(key.namespace(), Tier::Local);
        }

        let shared_deletes = join_all(indexed.iter().map(|key| async move {
            let deleted = self.inner.shared.del(key.namespace(), key.key()).await;
            if deleted {
                self.inner.stats.record_delete(key.namespace(), Tier::Shared);
            }
            deleted
        }))
        .await;

        let outcome = Invalidation {
            local: removed.len(),
            shared: shared_deletes.into_iter().filter(|d| *d).count() as u64,
        };
        info!("Invalidated tag {}: {:?}", tag, outcome);
        outcome
    }

    /// Remove every key of `namespace` matching the glob from both tiers
    pub async fn invalidate_pattern(&self, namespace: &str, pattern: &str) -> Result<Invalidation> {
        let matcher = compile_glob(pattern)?;
        let local = self
            .inner
            .local
            .delete_where(|key, _| key.namespace() == namespace && matcher.is_match(key.key()));
        for _ in &local {
            self.inner.stats.record_delete(namespace, Tier::Local);
        }
        self.inner
            .tags
            .forget_where(|key| key.namespace() == namespace && matcher.is_match(key.key()));

        let shared = self.inner.shared.scan_delete(namespace, pattern).await;
        for _ in 0..shared {
            self.inner.stats.record_delete(namespace, Tier::Shared);
        }

        let outcome = Invalidation {
            local: local.len(),
            shared,
        };
        info!("Invalidated {}:{}: {:?}", namespace, pattern, outcome);
        Ok(outcome)
    }

    /// Drop the whole local tier. The shared tier is untouched.
    pub fn clear_local(&self) {
        self.inner.local.clear();
    }

    // =========================================================================
    // Warm-up and refresh-ahead
    // =========================================================================

    /// Run all warm-up fetches concurrently. A failing job is logged and
    /// reported; it never stops the others.
    pub async fn warm_up(&self, jobs: Vec<WarmUpJob>) -> WarmUpReport {
        let total = jobs.len();
        let outcomes = join_all(jobs.into_iter().map(|job| {
            let key = job.key.clone();
            let run = (job.run)(self.clone(), job.key);
            async move { (key, run.await) }
        }))
        .await;

        let mut report = WarmUpReport::default();
        for (key, outcome) in outcomes {
            match outcome {
                Ok(()) => report.succeeded += 1,
                Err(e) => {
                    warn!("Warm-up of {} failed: {}", key, e);
                    report.failed.push((key, e));
                }
            }
        }
        info!("Warm-up finished: {}/{} succeeded", report.succeeded, total);
        report
    }

    fn find_refresher(&self, key: &CacheKey) -> Option<RefreshFn> {
        self.inner
            .refreshers
            .read()
            .iter()
            .find(|r| r.namespace == key.namespace() && r.matcher.is_match(key.key()))
            .map(|r| Arc::clone(&r.refresh))
    }

    /// Spawn a background refresh if `remaining` is under the namespace
    /// threshold and a refresher covers the key. At most one refresh per key
    /// runs at a time.
    fn maybe_refresh(&self, key: &CacheKey, strategy: &NamespaceStrategy, remaining: Duration) {
        if !strategy.needs_refresh(remaining) {
            return;
        }
        let Some(refresh) = self.find_refresher(key) else {
            return;
        };
        if self.inner.refreshing.insert(key.clone(), ()).is_some() {
            return;
        }

        self.inner.stats.record_refresh(key.namespace());
        debug!("Refreshing {} ahead of expiry ({:?} left)", key, remaining);

        let cache = self.clone();
        let key = key.clone();
        tokio::spawn(async move {
            if let Err(e) = refresh(cache.clone(), key.key().to_string()).await {
                warn!("Refresh of {} failed, entry will expire normally: {}", key, e);
            }
            cache.inner.refreshing.remove(&key);
        });
    }

    // =========================================================================
    // Maintenance, stats, health
    // =========================================================================

    /// Remove expired local entries and drop expired keys from the tag
    /// index. Returns the number of local entries removed.
    pub fn sweep_expired(&self) -> usize {
        let swept = self.inner.local.sweep_expired();
        let untagged = self.inner.tags.prune_expired();
        if swept > 0 || untagged > 0 {
            debug!("Swept {} expired local entries, {} expired tagged keys", swept, untagged);
        }
        swept
    }

    /// Start the background sweep and periodic stats log. Stops when
    /// `shutdown` is cancelled.
    pub fn spawn_maintenance(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let cache = self.clone();
        let sweep_every = self.inner.config.maintenance_interval;
        let report_every = self.inner.config.stats_interval;

        tokio::spawn(async move {
            info!(
                "Starting cache maintenance (sweep every {:?}, stats every {:?})",
                sweep_every, report_every
            );
            let mut sweep = interval_at(Instant::now() + sweep_every, sweep_every);
            let mut report = interval_at(Instant::now() + report_every, report_every);
            sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);
            report.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("Cache maintenance shutting down");
                        break;
                    }
                    _ = sweep.tick() => {
                        cache.sweep_expired();
                    }
                    _ = report.tick() => {
                        cache.log_stats();
                    }
                }
            }
        })
    }

    pub fn log_stats(&self) {
        let snapshot = self.stats();
        info!(
            hit_rate = snapshot.totals.hit_rate,
            local_entries = snapshot.local.entries,
            local_bytes = snapshot.local.size_bytes,
            shared_errors = snapshot.shared.errors,
            "Cache stats: {} hits, {} misses, {} evictions",
            snapshot.totals.hits,
            snapshot.totals.misses,
            snapshot.local.evictions
        );
        for ns in &snapshot.namespaces {
            debug!(
                "Namespace {}: hit rate {:.3} ({} hits / {} misses), {} refreshes",
                ns.namespace, ns.hit_rate, ns.hits, ns.misses, ns.refreshes
            );
        }
    }

    /// Current statistics
    pub fn stats(&self) -> StatsSnapshot {
        let local = &self.inner.local;
        let shared = &self.inner.shared;
        StatsSnapshot {
            namespaces: self.inner.stats.snapshot(),
            totals: self.inner.stats.totals(),
            local: LocalTierStats {
                entries: local.len(),
                size_bytes: local.size_bytes(),
                max_bytes: local.config().max_bytes,
                max_entries: local.config().max_entries,
                utilization: local.utilization(),
                evictions: local.evictions(),
                expirations: local.expirations(),
            },
            shared: SharedTierStats {
                backend: shared.backend_name().to_string(),
                operations: shared.operation_count(),
                errors: shared.error_count(),
            },
            uptime_seconds: self.inner.started.elapsed().as_secs(),
        }
    }

    /// Zero all counters (cache contents are kept)
    pub fn reset_stats(&self) {
        self.inner.stats.reset();
        self.inner.shared.reset_counters();
        info!("Cache statistics reset");
    }

    /// Evaluate health against the configured thresholds
    pub fn health(&self) -> HealthReport {
        HealthReport::evaluate(&self.stats(), &self.inner.config.health)
    }

    /// Check shared backend connectivity
    pub async fn ping_shared(&self) -> bool {
        self.inner.shared.ping().await
    }
}

impl std::fmt::Debug for TieredCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredCache")
            .field("prefix", &self.inner.config.key_prefix)
            .field("shared", &self.inner.shared)
            .field("local_entries", &self.inner.local.len())
            .finish()
    }
}

fn compile_glob(pattern: &str) -> Result<GlobMatcher> {
    Ok(GlobBuilder::new(pattern)
        .literal_separator(false)
        .build()?
        .compile_matcher())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::SharedValue;
    use assert_matches::assert_matches;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Item {
        price: u32,
    }

    fn cache_with_backend() -> (TieredCache, Arc<InMemorySharedBackend>) {
        let backend = Arc::new(InMemorySharedBackend::new());
        (TieredCache::new(backend.clone()), backend)
    }

    #[tokio::test]
    async fn test_set_then_get_reads_local() {
        let (cache, _) = cache_with_backend();
        let outcome = cache.set("catalog", "item-1", Item { price: 10 }).await;
        assert_eq!(outcome, WriteOutcome { local: true, shared: true });

        assert_eq!(cache.get::<Item>("catalog", "item-1").await, Some(Item { price: 10 }));
        let stats = cache.stats().totals;
        assert_eq!(stats.local.hits, 1);
        assert_eq!(stats.shared.hits, 0);
    }

    #[tokio::test]
    async fn test_shared_hit_is_promoted() {
        let (cache, _) = cache_with_backend();
        cache.set("catalog", "item-1", Item { price: 10 }).await;
        cache.clear_local();

        assert_eq!(cache.get::<Item>("catalog", "item-1").await, Some(Item { price: 10 }));
        assert_eq!(cache.get::<Item>("catalog", "item-1").await, Some(Item { price: 10 }));

        let ns = cache.stats().namespaces.remove(0);
        assert_eq!(ns.shared.hits, 1);
        assert_eq!(ns.local.hits, 1);
        assert_eq!(ns.misses, 0);
    }

    #[tokio::test]
    async fn test_pure_miss_returns_none() {
        let cache = TieredCache::in_memory();
        assert_eq!(cache.get::<Item>("catalog", "nope").await, None);
        assert_eq!(cache.stats().totals.misses, 1);
    }

    #[tokio::test]
    async fn test_get_or_set_fetches_once() {
        let cache = TieredCache::in_memory();
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let value = cache
                .get_or_set("catalog", "item-1", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, anyhow::Error>(Item { price: 10 })
                })
                .await
                .unwrap();
            assert_eq!(value.price, 10);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fetch_error_propagates_and_is_not_cached() {
        let cache = TieredCache::in_memory();
        let err = cache
            .get_or_set::<Item, _, _, _>("catalog", "item-1", || async { Err(anyhow::anyhow!("db down")) })
            .await
            .unwrap_err();
        assert_matches!(err, Error::Fetch { ref key, .. } if key == "item-1");
        assert!(!cache.exists("catalog", "item-1").await);
        assert_eq!(cache.stats().totals.fetch_errors, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_timeout() {
        let (backend, config) = (
            Arc::new(InMemorySharedBackend::new()),
            CacheConfig {
                fetch_timeout: Some(Duration::from_millis(100)),
                ..Default::default()
            },
        );
        let cache = TieredCache::with_config(config, backend).unwrap();
        let err = cache
            .get_or_set("catalog", "slow", || async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok::<_, anyhow::Error>(Item { price: 1 })
            })
            .await
            .unwrap_err();
        assert_matches!(err, Error::FetchTimeout { .. });
    }

    #[tokio::test]
    async fn test_concurrent_get_or_set_single_flight() {
        let cache = TieredCache::in_memory();
        let calls = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..20)
            .map(|_| {
                let cache = cache.clone();
                let calls = calls.clone();
                tokio::spawn(async move {
                    cache
                        .get_or_set("catalog", "hot", || async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            Ok::<_, anyhow::Error>(Item { price: 7 })
                        })
                        .await
                })
            })
            .collect();

        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), Item { price: 7 });
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry() {
        let cache = TieredCache::in_memory();
        cache.register_strategy("short", NamespaceStrategy::new(Duration::from_secs(10)));
        cache.set("short", "k", 1u32).await;

        tokio::time::advance(Duration::from_millis(9_999)).await;
        assert_eq!(cache.get::<u32>("short", "k").await, Some(1));

        tokio::time::advance(Duration::from_millis(2)).await;
        assert_eq!(cache.get::<u32>("short", "k").await, None);
    }

    /// In-memory backend whose writes take `delay`
    struct SlowWrites {
        inner: InMemorySharedBackend,
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl SharedBackend for SlowWrites {
        fn name(&self) -> &'static str {
            "slow"
        }
        async fn get(&self, key: &str) -> Result<Option<SharedValue>> {
            self.inner.get(key).await
        }
        async fn set(&self, key: &str, value: bytes::Bytes, ttl: Duration) -> Result<()> {
            tokio::time::sleep(self.delay).await;
            self.inner.set(key, value, ttl).await
        }
        async fn delete(&self, key: &str) -> Result<bool> {
            self.inner.delete(key).await
        }
        async fn exists(&self, key: &str) -> Result<bool> {
            self.inner.exists(key).await
        }
        async fn mget(&self, keys: &[String]) -> Result<Vec<Option<SharedValue>>> {
            self.inner.mget(keys).await
        }
        async fn mset(&self, items: &[SharedItem]) -> Result<()> {
            self.inner.mset(items).await
        }
        async fn scan_delete(&self, pattern: &str) -> Result<u64> {
            self.inner.scan_delete(pattern).await
        }
        async fn ping(&self) -> Result<()> {
            self.inner.ping().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_write_visible_while_shared_write_pending() {
        let backend = Arc::new(SlowWrites {
            inner: InMemorySharedBackend::new(),
            delay: Duration::from_millis(500),
        });
        let cache = TieredCache::new(backend.clone());
        let key = CacheKey::new("catalog", "item-1");

        let mut write = tokio_test::task::spawn(cache.set("catalog", "item-1", Item { price: 5 }));
        tokio_test::assert_pending!(write.poll());
        assert_eq!(cache.peek_local::<Item>(&key), Some(Item { price: 5 }));
        assert_eq!(backend.inner.len(), 0);

        tokio::time::advance(Duration::from_millis(500)).await;
        let outcome = tokio_test::assert_ready!(write.poll());
        assert_eq!(outcome, WriteOutcome { local: true, shared: true });
        assert_eq!(backend.inner.len(), 1);
    }

    #[tokio::test]
    async fn test_shared_outage_is_not_fatal() {
        let (cache, backend) = cache_with_backend();
        backend.set_available(false);

        let outcome = cache.set("catalog", "item-1", Item { price: 3 }).await;
        assert_eq!(outcome, WriteOutcome { local: true, shared: false });
        assert_eq!(cache.get::<Item>("catalog", "item-1").await, Some(Item { price: 3 }));

        let value = cache
            .get_or_set("catalog", "item-2", || async { Ok::<_, anyhow::Error>(Item { price: 4 }) })
            .await
            .unwrap();
        assert_eq!(value.price, 4);
        assert!(cache.stats().shared.errors >= 2);
    }

    #[tokio::test]
    async fn test_undecodable_shared_value_is_a_miss() {
        let (cache, backend) = cache_with_backend();
        backend
            .set("cache:catalog:bad", bytes::Bytes::from_static(b"\x00not json"), Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(cache.get::<Item>("catalog", "bad").await, None);
        let value = cache
            .get_or_set("catalog", "bad", || async { Ok::<_, anyhow::Error>(Item { price: 9 }) })
            .await
            .unwrap();
        assert_eq!(value.price, 9);
    }

    #[tokio::test]
    async fn test_delete_removes_both_tiers() {
        let (cache, backend) = cache_with_backend();
        cache.set("catalog", "item-1", Item { price: 1 }).await;
        assert!(cache.delete("catalog", "item-1").await);
        assert!(!cache.exists("catalog", "item-1").await);
        assert!(backend.is_empty());
        assert!(!cache.delete("catalog", "item-1").await);
    }

    #[tokio::test]
    async fn test_invalidate_by_tag() {
        let (cache, _) = cache_with_backend();
        cache.set_with_tags("catalog", "a", Item { price: 1 }, &["sale"]).await;
        cache.set_with_tags("catalog", "b", Item { price: 2 }, &["sale", "new"]).await;
        cache.set_with_tags("catalog", "c", Item { price: 3 }, &["new"]).await;

        let outcome = cache.invalidate_by_tag("sale").await;
        assert_eq!(outcome, Invalidation { local: 2, shared: 2 });

        assert_eq!(cache.get::<Item>("catalog", "a").await, None);
        assert_eq!(cache.get::<Item>("catalog", "b").await, None);
        assert_eq!(cache.get::<Item>("catalog", "c").await, Some(Item { price: 3 }));
    }

    #[tokio::test]
    async fn test_invalidate_pattern() {
        let (cache, _) = cache_with_backend();
        for key in ["item-1", "item-2", "user-1"] {
            cache.set("catalog", key, 1u32).await;
        }
        cache.set("other", "item-1", 1u32).await;

        let outcome = cache.invalidate_pattern("catalog", "item-*").await.unwrap();
        assert_eq!(outcome, Invalidation { local: 2, shared: 2 });
        assert!(cache.exists("catalog", "user-1").await);
        assert!(cache.exists("other", "item-1").await);

        assert_matches!(
            cache.invalidate_pattern("catalog", "item-[").await,
            Err(Error::InvalidPattern { .. })
        );
    }

    #[tokio::test]
    async fn test_mget_preserves_positions() {
        let (cache, _) = cache_with_backend();
        cache.set("ns", "k2", "two".to_string()).await;
        cache.set("ns", "k3", "three".to_string()).await;
        cache.clear_local();
        cache.get::<String>("ns", "k3").await;

        let values = cache.mget::<String, _>("ns", &["k1", "k2", "k3", "k4"]).await;
        assert_eq!(
            values,
            vec![None, Some("two".to_string()), Some("three".to_string()), None]
        );
    }

    #[tokio::test]
    async fn test_set_many_writes_both_tiers() {
        let (cache, backend) = cache_with_backend();
        let written = cache
            .set_many("ns", vec![("a".to_string(), 1u32), ("b".to_string(), 2u32)])
            .await;
        assert_eq!(written, 2);
        assert_eq!(backend.len(), 2);
        assert_eq!(cache.get::<u32>("ns", "b").await, Some(2));
    }

    #[tokio::test]
    async fn test_warm_up_isolates_failures() {
        let cache = TieredCache::in_memory();
        let jobs = vec![
            WarmUpJob::new("catalog", "a", async { Ok::<_, anyhow::Error>(1u32) }),
            WarmUpJob::new("catalog", "b", async { Err::<u32, _>(anyhow::anyhow!("boom")) }),
            WarmUpJob::new("catalog", "c", async { Ok::<_, anyhow::Error>(3u32) }),
        ];

        let report = cache.warm_up(jobs).await;
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, CacheKey::new("catalog", "b"));
        assert_eq!(cache.get::<u32>("catalog", "c").await, Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_ahead_runs_once() {
        let cache = TieredCache::in_memory();
        cache.register_strategy(
            "catalog",
            NamespaceStrategy::new(Duration::from_secs(300)).with_refresh(Duration::from_secs(60)),
        );
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        cache
            .register_refresher("catalog", "item-*", move |_key| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, anyhow::Error>(Item { price: 11 })
                }
            })
            .unwrap();

        cache.set("catalog", "item-1", Item { price: 10 }).await;
        tokio::time::advance(Duration::from_secs(245)).await;

        assert_eq!(cache.get::<Item>("catalog", "item-1").await, Some(Item { price: 10 }));
        assert_eq!(cache.get::<Item>("catalog", "item-1").await, Some(Item { price: 10 }));
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.get::<Item>("catalog", "item-1").await, Some(Item { price: 11 }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().totals.refreshes, 1);
    }

    fn refreshing_reader(backend: Arc<InMemorySharedBackend>, calls: Arc<AtomicUsize>) -> TieredCache {
        let reader = TieredCache::new(backend);
        reader.register_strategy(
            "catalog",
            NamespaceStrategy::new(Duration::from_secs(300)).with_refresh(Duration::from_secs(60)),
        );
        reader
            .register_refresher("catalog", "item-*", move |_key| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, anyhow::Error>(Item { price: 11 })
                }
            })
            .unwrap();
        reader
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_ahead_on_shared_hit() {
        let (writer, backend) = cache_with_backend();
        writer.register_strategy("catalog", NamespaceStrategy::new(Duration::from_secs(300)));
        writer.set("catalog", "item-1", Item { price: 10 }).await;
        tokio::time::advance(Duration::from_secs(245)).await;

        let calls = Arc::new(AtomicUsize::new(0));
        let reader = refreshing_reader(backend, calls.clone());
        assert_eq!(reader.get::<Item>("catalog", "item-1").await, Some(Item { price: 10 }));
        assert_eq!(reader.stats().totals.shared.hits, 1);
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(reader.stats().totals.refreshes, 1);
        writer.clear_local();
        assert_eq!(writer.get::<Item>("catalog", "item-1").await, Some(Item { price: 11 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_mget_refreshes_ahead_on_shared_hit() {
        let (writer, backend) = cache_with_backend();
        writer.register_strategy("catalog", NamespaceStrategy::new(Duration::from_secs(300)));
        writer.set("catalog", "item-1", Item { price: 10 }).await;
        tokio::time::advance(Duration::from_secs(245)).await;

        let calls = Arc::new(AtomicUsize::new(0));
        let reader = refreshing_reader(backend, calls.clone());
        let values = reader.mget::<Item, _>("catalog", &["item-1", "item-2"]).await;
        assert_eq!(values, vec![Some(Item { price: 10 }), None]);
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(reader.stats().totals.refreshes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_keeps_tags() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = refreshing_reader(Arc::new(InMemorySharedBackend::new()), calls.clone());
        cache.set_with_tags("catalog", "item-1", Item { price: 10 }, &["sale"]).await;
        tokio::time::advance(Duration::from_secs(245)).await;

        cache.get::<Item>("catalog", "item-1").await;
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let outcome = cache.invalidate_by_tag("sale").await;
        assert_eq!(outcome, Invalidation { local: 1, shared: 1 });
        assert_eq!(cache.get::<Item>("catalog", "item-1").await, None);
    }

    #[tokio::test]
    async fn test_untagged_rewrite_leaves_tag() {
        let (cache, _) = cache_with_backend();
        cache.set_with_tags("catalog", "k", 1u32, &["t"]).await;
        cache.set("catalog", "k", 2u32).await;

        let outcome = cache.invalidate_by_tag("t").await;
        assert_eq!(outcome, Invalidation::default());
        assert_eq!(cache.get::<u32>("catalog", "k").await, Some(2));
    }

    #[tokio::test]
    async fn test_retag_moves_key_between_tags() {
        let (cache, _) = cache_with_backend();
        cache.set_with_tags("catalog", "k", 1u32, &["old"]).await;
        cache.set_with_tags("catalog", "k", 2u32, &["new"]).await;

        assert_eq!(cache.invalidate_by_tag("old").await, Invalidation::default());
        assert_eq!(cache.invalidate_by_tag("new").await, Invalidation { local: 1, shared: 1 });
    }

    #[tokio::test]
    async fn test_promotion_keeps_indexed_tags() {
        let (cache, _) = cache_with_backend();
        cache.set_with_tags("catalog", "k", 1u32, &["t"]).await;
        cache.clear_local();

        assert_eq!(cache.get::<u32>("catalog", "k").await, Some(1));
        let key = CacheKey::new("catalog", "k");
        let promoted = cache.inner.local.get(&key).map(|entry| entry.has_tag("t"));
        assert_eq!(promoted, Some(true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_prunes_tag_index() {
        let (cache, _) = cache_with_backend();
        cache.register_strategy("short", NamespaceStrategy::new(Duration::from_secs(1)));
        for i in 0..1000 {
            cache
                .set_with_tags("short", &format!("k{}", i), i as u32, &["bulk"])
                .await;
        }
        assert_eq!(cache.inner.tags.key_count(), 1000);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(cache.sweep_expired(), 1000);
        assert!(cache.inner.tags.is_empty());
        assert_eq!(cache.inner.tags.tag_count(), 0);
    }

    #[tokio::test]
    async fn test_delete_and_pattern_unindex_keys() {
        let (cache, _) = cache_with_backend();
        for key in ["item-1", "item-2", "user-1"] {
            cache.set_with_tags("catalog", key, 1u32, &["t"]).await;
        }

        cache.delete("catalog", "user-1").await;
        assert_eq!(cache.inner.tags.key_count(), 2);
        cache.invalidate_pattern("catalog", "item-*").await.unwrap();
        assert!(cache.inner.tags.is_empty());
    }

    #[tokio::test]
    async fn test_oversized_value_skips_local_tier() {
        let backend = Arc::new(InMemorySharedBackend::new());
        let config = CacheConfig {
            local: LocalConfig {
                max_item_bytes: 16,
                ..Default::default()
            },
            ..Default::default()
        };
        let cache = TieredCache::with_config(config, backend.clone()).unwrap();

        let outcome = cache.set("ns", "big", "x".repeat(100)).await;
        assert_eq!(outcome, WriteOutcome { local: false, shared: true });
        assert_eq!(cache.get::<String>("ns", "big").await.map(|s| s.len()), Some(100));
    }

    #[test]
    fn test_config_validation() {
        assert!(CacheConfig::default().validate().is_ok());
        let bad = CacheConfig {
            key_prefix: String::new(),
            ..Default::default()
        };
        assert_matches!(bad.validate(), Err(Error::Config(_)));
        let bad = CacheConfig {
            fetch_timeout: Some(Duration::ZERO),
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}

//! Batched Loader
//!
//! Coalesces single-key loads issued within one short window into a single
//! multi-key fetch.
//!
//! # Flow
//!
//! ```text
//! load(k) ─► memo? ─► cache? ─► in flight? ──yes──► wait on that flight
//!                                   │
//!                                   no
//!                                   ▼
//!                         queue ──tick / full──► dispatch(sorted keys)
//!                                                   │
//!                                 set_many ◄────────┤
//!                                 resolve waiters ◄─┘
//! ```
//!
//! - Keys already cached resolve immediately and never enter a batch
//! - A key queued or dispatched is never fetched twice concurrently
//! - Keys the fetch does not return resolve to `None`
//! - A failed batch fails every key in it with the same error

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use super::flight::{FlightGuard, Join, SingleFlight};
use super::manager::{CacheValue, TieredCache};
use super::DEFAULT_FETCH_TIMEOUT;
use crate::error::{Error, Result};

/// Multi-key fetch against the source of truth
#[async_trait]
pub trait BatchFetch<T>: Send + Sync {
    /// Fetch `keys` (sorted, unique). Missing keys are simply absent from
    /// the map.
    async fn fetch(&self, keys: &[String]) -> anyhow::Result<HashMap<String, T>>;
}

#[async_trait]
impl<T, F, Fut> BatchFetch<T> for F
where
    T: Send + 'static,
    F: Fn(Vec<String>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<HashMap<String, T>>> + Send,
{
    async fn fetch(&self, keys: &[String]) -> anyhow::Result<HashMap<String, T>> {
        (self)(keys.to_vec()).await
    }
}

/// Loader configuration
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Batching window, measured from the first queued key
    pub tick: Duration,
    /// A queue reaching this size dispatches without waiting for the tick
    pub max_batch_size: usize,
    /// Upper bound on one batch fetch
    pub fetch_timeout: Option<Duration>,
    /// How long this loader remembers results; `None` disables the memo
    pub result_ttl: Option<Duration>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(2),
            max_batch_size: 100,
            fetch_timeout: Some(DEFAULT_FETCH_TIMEOUT),
            result_ttl: None,
        }
    }
}

/// Loader counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoaderStats {
    pub batches: u64,
    pub keys_fetched: u64,
    pub cache_hits: u64,
    pub memo_hits: u64,
}

type Outcome<T> = Result<Option<T>>;

struct Queue<T> {
    pending: Vec<FlightGuard<String, Outcome<T>>>,
    /// Bumped every time the queue is drained
    window: u64,
}

struct LoaderInner<T> {
    namespace: String,
    cache: TieredCache,
    fetcher: Arc<dyn BatchFetch<T>>,
    config: LoaderConfig,
    flights: SingleFlight<String, Outcome<T>>,
    queue: Mutex<Queue<T>>,
    memo: Mutex<HashMap<String, (Option<T>, Instant)>>,
    batches: AtomicU64,
    keys_fetched: AtomicU64,
    cache_hits: AtomicU64,
    memo_hits: AtomicU64,
}

/// Batching, deduplicating loader for one namespace
pub struct BatchLoader<T> {
    inner: Arc<LoaderInner<T>>,
}

impl<T> Clone for BatchLoader<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: CacheValue> BatchLoader<T> {
    /// Create a loader with default configuration
    pub fn new(cache: TieredCache, namespace: impl Into<String>, fetcher: impl BatchFetch<T> + 'static) -> Self {
        Self::with_config(cache, namespace, fetcher, LoaderConfig::default())
    }

    pub fn with_config(
        cache: TieredCache,
        namespace: impl Into<String>,
        fetcher: impl BatchFetch<T> + 'static,
        config: LoaderConfig,
    ) -> Self {
        Self {
            inner: Arc::new(LoaderInner {
                namespace: namespace.into(),
                cache,
                fetcher: Arc::new(fetcher),
                config: LoaderConfig {
                    max_batch_size: config.max_batch_size.max(1),
                    ..config
                },
                flights: SingleFlight::new(),
                queue: Mutex::new(Queue {
                    pending: Vec::new(),
                    window: 0,
                }),
                memo: Mutex::new(HashMap::new()),
                batches: AtomicU64::new(0),
                keys_fetched: AtomicU64::new(0),
                cache_hits: AtomicU64::new(0),
                memo_hits: AtomicU64::new(0),
            }),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.inner.namespace
    }

    /// Load one key. Resolves to `None` if the source does not know the key.
    pub async fn load(&self, key: impl Into<String>) -> Result<Option<T>> {
        let key = key.into();
        let inner = &self.inner;

        if let Some(value) = self.memo_get(&key) {
            inner.memo_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(value);
        }

        if let Some(value) = inner.cache.get::<T>(&inner.namespace, &key).await {
            inner.cache_hits.fetch_add(1, Ordering::Relaxed);
            self.memo_put(&key, Some(value.clone()));
            return Ok(Some(value));
        }

        let waiter = match inner.flights.join(&key) {
            Join::Follower(waiter) => waiter,
            Join::Leader(guard) => {
                let waiter = guard
                    .waiter()
                    .ok_or_else(|| Error::Internal(format!("lost flight for {}", key)))?;
                self.enqueue(guard);
                waiter
            }
        };

        waiter
            .wait()
            .await
            .unwrap_or_else(|| Err(Error::Internal(format!("batch for {} was abandoned", key))))
    }

    /// Load many keys; results line up with `keys`
    pub async fn load_many<K: Into<String>>(&self, keys: impl IntoIterator<Item = K>) -> Vec<Result<Option<T>>> {
        join_all(keys.into_iter().map(|k| self.load(k))).await
    }

    /// Seed a value: written through the cache and remembered by this loader
    pub async fn prime(&self, key: impl Into<String>, value: T) {
        let key = key.into();
        self.inner.cache.set(&self.inner.namespace, &key, value.clone()).await;
        self.memo_put(&key, Some(value));
    }

    /// Forget this loader's memo for one key. The cache is untouched.
    pub fn clear(&self, key: &str) {
        self.inner.memo.lock().remove(key);
    }

    /// Forget this loader's whole memo
    pub fn clear_all(&self) {
        self.inner.memo.lock().clear();
    }

    pub fn stats(&self) -> LoaderStats {
        let inner = &self.inner;
        LoaderStats {
            batches: inner.batches.load(Ordering::Relaxed),
            keys_fetched: inner.keys_fetched.load(Ordering::Relaxed),
            cache_hits: inner.cache_hits.load(Ordering::Relaxed),
            memo_hits: inner.memo_hits.load(Ordering::Relaxed),
        }
    }

    /// Keys queued or in a dispatched batch
    pub fn in_flight(&self) -> usize {
        self.inner.flights.len()
    }

    fn memo_get(&self, key: &str) -> Option<Option<T>> {
        self.inner.config.result_ttl?;
        let mut memo = self.inner.memo.lock();
        match memo.get(key) {
            Some((value, expires_at)) if Instant::now() < *expires_at => Some(value.clone()),
            Some(_) => {
                memo.remove(key);
                None
            }
            None => None,
        }
    }

    fn memo_put(&self, key: &str, value: Option<T>) {
        if let Some(ttl) = self.inner.config.result_ttl {
            self.inner
                .memo
                .lock()
                .insert(key.to_string(), (value, Instant::now() + ttl));
        }
    }

    /// Drop memo entries past their TTL
    fn prune_memo(&self) -> usize {
        if self.inner.config.result_ttl.is_none() {
            return 0;
        }
        let now = Instant::now();
        let mut memo = self.inner.memo.lock();
        let before = memo.len();
        memo.retain(|_, (_, expires_at)| *expires_at > now);
        before - memo.len()
    }

    /// Queue a key for the current window, starting the window timer for the
    /// first key and dispatching right away when the queue is full.
    fn enqueue(&self, guard: FlightGuard<String, Outcome<T>>) {
        let (full, timer_window) = {
            let mut queue = self.inner.queue.lock();
            queue.pending.push(guard);
            if queue.pending.len() >= self.inner.config.max_batch_size {
                queue.window += 1;
                (Some(std::mem::take(&mut queue.pending)), None)
            } else if queue.pending.len() == 1 {
                (None, Some(queue.window))
            } else {
                (None, None)
            }
        };

        if let Some(batch) = full {
            let loader = self.clone();
            tokio::spawn(async move { loader.dispatch(batch).await });
        }

        if let Some(window) = timer_window {
            let loader = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(loader.inner.config.tick).await;
                let batch = {
                    let mut queue = loader.inner.queue.lock();
                    if queue.window != window || queue.pending.is_empty() {
                        return;
                    }
                    queue.window += 1;
                    std::mem::take(&mut queue.pending)
                };
                loader.dispatch(batch).await;
            });
        }
    }

    #[instrument(skip(self, batch), fields(namespace = %self.inner.namespace, keys = batch.len()))]
    async fn dispatch(&self, batch: Vec<FlightGuard<String, Outcome<T>>>) {
        let inner = &self.inner;
        let mut keys: Vec<String> = batch.iter().filter_map(|g| g.key().cloned()).collect();
        keys.sort();
        keys.dedup();

        inner.batches.fetch_add(1, Ordering::Relaxed);
        inner.keys_fetched.fetch_add(keys.len() as u64, Ordering::Relaxed);
        debug!("Dispatching batch of {} keys", keys.len());
        let pruned = self.prune_memo();
        if pruned > 0 {
            debug!("Dropped {} expired memo entries", pruned);
        }

        let fetched = match inner.config.fetch_timeout {
            Some(limit) => match tokio::time::timeout(limit, inner.fetcher.fetch(&keys)).await {
                Ok(result) => result.map_err(|e| format!("{:#}", e)),
                Err(_) => Err(format!("timed out after {:?}", limit)),
            },
            None => inner.fetcher.fetch(&keys).await.map_err(|e| format!("{:#}", e)),
        };

        match fetched {
            Ok(found) => {
                let to_store: Vec<(String, T)> = keys
                    .iter()
                    .filter_map(|k| found.get(k).map(|v| (k.clone(), v.clone())))
                    .collect();
                if !to_store.is_empty() {
                    inner.cache.set_many(&inner.namespace, to_store).await;
                }

                for guard in batch {
                    let value = guard.key().and_then(|k| found.get(k).cloned());
                    if let Some(key) = guard.key() {
                        self.memo_put(key, value.clone());
                    }
                    guard.complete(Ok(value));
                }
            }
            Err(reason) => {
                let err = Error::BatchFailed {
                    namespace: inner.namespace.clone(),
                    keys: keys.len(),
                    reason,
                };
                warn!("{}", err);
                for guard in batch {
                    guard.complete(Err(err.clone()));
                }
            }
        }
    }
}

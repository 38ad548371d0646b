//! Cached function wrapper
//!
//! Wraps an async fetch function so every call goes through
//! [`TieredCache::get_or_set`], with the cache key derived by an explicit
//! function of the argument.

use std::future::Future;

use super::manager::{CacheValue, TieredCache};
use crate::error::Result;

/// A fetch function fronted by the cache
///
/// ```ignore
/// let product = Cached::new(cache, "products", |id: &u64| id.to_string(), |id: u64| db.product(id));
/// let p = product.call(42).await?;
/// ```
pub struct Cached<KF, F> {
    cache: TieredCache,
    namespace: String,
    key_fn: KF,
    fetch: F,
}

impl<KF, F> Cached<KF, F> {
    pub fn new(cache: TieredCache, namespace: impl Into<String>, key_fn: KF, fetch: F) -> Self {
        Self {
            cache,
            namespace: namespace.into(),
            key_fn,
            fetch,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Cache key for `arg`
    pub fn key_for<A>(&self, arg: &A) -> String
    where
        KF: Fn(&A) -> String,
    {
        (self.key_fn)(arg)
    }

    /// Cached call: returns the cached value for `arg`'s key, or runs the
    /// wrapped fetch and caches its result
    pub async fn call<A, T, Fut, E>(&self, arg: A) -> Result<T>
    where
        KF: Fn(&A) -> String,
        F: Fn(A) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<anyhow::Error>,
        T: CacheValue,
    {
        let key = self.key_for(&arg);
        self.cache
            .get_or_set(&self.namespace, &key, || (self.fetch)(arg))
            .await
    }

    /// Drop the cached result for `arg` from both tiers
    pub async fn invalidate<A>(&self, arg: &A) -> bool
    where
        KF: Fn(&A) -> String,
    {
        let key = self.key_for(arg);
        self.cache.delete(&self.namespace, &key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_wrapped_fetch_is_cached_per_key() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let square = Cached::new(
            TieredCache::in_memory(),
            "squares",
            |n: &u64| format!("sq-{}", n),
            move |n: u64| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, anyhow::Error>(n * n)
                }
            },
        );

        assert_eq!(square.call(3).await.unwrap(), 9);
        assert_eq!(square.call(3).await.unwrap(), 9);
        assert_eq!(square.call(4).await.unwrap(), 16);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(square.key_for(&3u64), "sq-3");

        assert!(square.invalidate(&3u64).await);
        assert_eq!(square.call(3).await.unwrap(), 9);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}

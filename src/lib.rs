//! Tiered read-through cache
//!
//! An in-process local tier in front of a shared key-value tier, with
//! per-namespace TTL strategies, refresh-ahead, tag and pattern
//! invalidation, single-flight fetches and a batching loader.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use tiercache::{NamespaceStrategy, TieredCache};
//!
//! # async fn run() -> tiercache::Result<()> {
//! let cache = TieredCache::in_memory();
//! cache.register_strategy(
//!     "catalog",
//!     NamespaceStrategy::new(Duration::from_secs(300)).with_refresh(Duration::from_secs(60)),
//! );
//!
//! let price: u32 = cache
//!     .get_or_set("catalog", "item-1", || async { Ok::<_, anyhow::Error>(10) })
//!     .await?;
//! assert_eq!(price, 10);
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`cache`] - Local and shared tiers, the manager, and the batch loader
//! - [`error`] - Error types
//! - [`monitoring`] - Health report and Prometheus exporter

pub mod cache;
pub mod error;
pub mod monitoring;

// Re-export commonly used types
pub use cache::{
    BatchFetch, BatchLoader, CacheConfig, Cached, InMemorySharedBackend, LoaderConfig,
    NamespaceStrategy, SharedBackend, StatsSnapshot, TieredCache, WarmUpJob,
};
pub use error::{Error, Result};
pub use monitoring::{HealthReport, HealthStatus, HealthThresholds, MetricsExporter};

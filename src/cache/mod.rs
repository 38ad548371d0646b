//! Two-Tier Cache
//!
//! Read-through caching with an in-process local tier in front of a shared
//! key-value tier, plus a batching loader for fan-out reads.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                 BatchLoader (per namespace)                      │
//! │        memo → cache → single-flight → tick batch → fetch         │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                        TieredCache                               │
//! │   strategies │ tag index │ single-flight │ refresh-ahead │ stats │
//! ├──────────────────────────────┬───────────────────────────────────┤
//! │ LocalStore                   │ SharedTier                        │
//! │ ┌──────────────────────────┐ │ ┌───────────────────────────────┐ │
//! │ │ ShardedMap (64-way)      │ │ │ {prefix}:{ns}:{key}           │ │
//! │ │ typed values, LRU, TTL   │ │ │ EntryCodec (JSON / LZ4)       │ │
//! │ └──────────────────────────┘ │ │ SharedBackend: memory, redis  │ │
//! │                              │ └───────────────────────────────┘ │
//! └──────────────────────────────┴───────────────────────────────────┘
//! ```
//!
//! # Design Principles
//!
//! - The shared tier is an accelerator: its failures never fail a read
//! - Fetch failures always reach the caller and are never cached
//! - One fetch per key per process at a time (single-flight)

use std::time::Duration;

mod codec;
mod entry;
mod flight;
mod loader;
mod local;
mod manager;
mod proptest;
#[cfg(feature = "redis")]
mod redis_backend;
mod shard;
mod shared;
mod stats;
mod strategy;
mod tags;
mod wrap;

pub use codec::{CompressionAlgorithm, CompressionConfig, Encoded, EntryCodec};
pub use entry::{CacheEntry, CacheKey, LocalValue};
pub use flight::{FlightGuard, FlightWaiter, Join, SingleFlight};
pub use loader::{BatchFetch, BatchLoader, LoaderConfig, LoaderStats};
pub use local::{Admission, LocalConfig, LocalStore};
pub use manager::{CacheConfig, CacheValue, Invalidation, TieredCache, WarmUpJob, WarmUpReport, WriteOutcome};
#[cfg(feature = "redis")]
pub use redis_backend::RedisBackend;
pub use shard::{Shard, ShardedMap};
pub use shared::{InMemorySharedBackend, SharedBackend, SharedConfig, SharedItem, SharedTier, SharedValue};
pub use stats::{CacheStats, LocalTierStats, NamespaceStats, SharedTierStats, StatsSnapshot, Tier, TierCounts};
pub use strategy::{NamespaceStrategy, StrategyRegistry};
pub use tags::TagIndex;
pub use wrap::Cached;

/// Number of local-tier shards
pub const SHARD_COUNT: usize = 64;

/// TTL for namespaces without a strategy (30 minutes)
pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);

/// Default bound on a single fetch
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Default local-tier byte ceiling (256MB)
pub const DEFAULT_LOCAL_MAX_BYTES: u64 = 256 * 1024 * 1024;

/// Default local-tier entry ceiling
pub const DEFAULT_LOCAL_MAX_ENTRIES: usize = 100_000;

/// Default per-item ceiling for the local tier (1MB)
pub const DEFAULT_MAX_ITEM_BYTES: u64 = 1024 * 1024;

// =============================================================================
// Tests
// =============================================================================

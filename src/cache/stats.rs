//! Cache Statistics
//!
//! Per-namespace, per-tier operation counters. Purely observational; nothing
//! here influences cache behavior.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;

/// Cache tier identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// In-process tier
    Local,
    /// Remote key-value tier
    Shared,
}

impl Tier {
    pub fn name(&self) -> &'static str {
        match self {
            Tier::Local => "local",
            Tier::Shared => "shared",
        }
    }
}

#[derive(Debug, Default)]
struct TierCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
}

impl TierCounters {
    fn snapshot(&self) -> TierCounts {
        TierCounts {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Default)]
struct NamespaceCounters {
    local: TierCounters,
    shared: TierCounters,
    evictions: AtomicU64,
    refreshes: AtomicU64,
    fetch_errors: AtomicU64,
}

impl NamespaceCounters {
    fn tier(&self, tier: Tier) -> &TierCounters {
        match tier {
            Tier::Local => &self.local,
            Tier::Shared => &self.shared,
        }
    }
}

/// Counter values for one tier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TierCounts {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
}

impl TierCounts {
    pub fn hit_rate(&self) -> f64 {
        ratio(self.hits, self.hits + self.misses)
    }
}

/// Point-in-time view of one namespace
///
/// `hits` counts lookups answered by either tier and `misses` counts lookups
/// neither tier could answer, so `hits + misses` is the number of lookups.
/// `sets` and `deletes` sum the tier-level writes.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NamespaceStats {
    pub namespace: String,
    pub local: TierCounts,
    pub shared: TierCounts,
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub hit_rate: f64,
    pub evictions: u64,
    pub refreshes: u64,
    pub fetch_errors: u64,
}

impl NamespaceStats {
    fn from_tiers(namespace: String, local: TierCounts, shared: TierCounts) -> Self {
        let hits = local.hits + shared.hits;
        let misses = shared.misses;
        Self {
            namespace,
            local,
            shared,
            hits,
            misses,
            sets: local.sets + shared.sets,
            deletes: local.deletes + shared.deletes,
            hit_rate: ratio(hits, hits + misses),
            ..Default::default()
        }
    }

    /// Total lookups (hits + misses)
    pub fn lookups(&self) -> u64 {
        self.hits + self.misses
    }
}

#[inline]
fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// Statistics collector
#[derive(Debug, Default)]
pub struct CacheStats {
    namespaces: DashMap<String, Arc<NamespaceCounters>>,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn counters(&self, namespace: &str) -> Arc<NamespaceCounters> {
        if let Some(c) = self.namespaces.get(namespace) {
            return Arc::clone(&c);
        }
        Arc::clone(
            &self
                .namespaces
                .entry(namespace.to_string())
                .or_default(),
        )
    }

    pub fn record_hit(&self, namespace: &str, tier: Tier) {
        self.counters(namespace).tier(tier).hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self, namespace: &str, tier: Tier) {
        self.counters(namespace).tier(tier).misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_set(&self, namespace: &str, tier: Tier) {
        self.counters(namespace).tier(tier).sets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delete(&self, namespace: &str, tier: Tier) {
        self.counters(namespace).tier(tier).deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_eviction(&self, namespace: &str) {
        self.counters(namespace).evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_refresh(&self, namespace: &str) {
        self.counters(namespace).refreshes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fetch_error(&self, namespace: &str) {
        self.counters(namespace).fetch_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Per-namespace stats, sorted by namespace
    pub fn snapshot(&self) -> Vec<NamespaceStats> {
        let mut out: Vec<NamespaceStats> = self
            .namespaces
            .iter()
            .map(|e| {
                let c = e.value();
                NamespaceStats {
                    evictions: c.evictions.load(Ordering::Relaxed),
                    refreshes: c.refreshes.load(Ordering::Relaxed),
                    fetch_errors: c.fetch_errors.load(Ordering::Relaxed),
                    ..NamespaceStats::from_tiers(e.key().clone(), c.local.snapshot(), c.shared.snapshot())
                }
            })
            .collect();
        out.sort_by(|a, b| a.namespace.cmp(&b.namespace));
        out
    }

    /// Stats for a single namespace (zeroed if never seen)
    pub fn namespace(&self, namespace: &str) -> NamespaceStats {
        self.snapshot()
            .into_iter()
            .find(|s| s.namespace == namespace)
            .unwrap_or_else(|| NamespaceStats {
                namespace: namespace.to_string(),
                ..Default::default()
            })
    }

    /// Sum over all namespaces; `namespace` is `"*"`
    pub fn totals(&self) -> NamespaceStats {
        let all = self.snapshot();
        let sum = |f: fn(&NamespaceStats) -> TierCounts| {
            all.iter().map(f).fold(TierCounts::default(), |acc, t| TierCounts {
                hits: acc.hits + t.hits,
                misses: acc.misses + t.misses,
                sets: acc.sets + t.sets,
                deletes: acc.deletes + t.deletes,
            })
        };
        NamespaceStats {
            evictions: all.iter().map(|s| s.evictions).sum(),
            refreshes: all.iter().map(|s| s.refreshes).sum(),
            fetch_errors: all.iter().map(|s| s.fetch_errors).sum(),
            ..NamespaceStats::from_tiers("*".to_string(), sum(|s| s.local), sum(|s| s.shared))
        }
    }

    /// Forget all counters
    pub fn reset(&self) {
        self.namespaces.clear();
    }
}

/// Local tier occupancy
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LocalTierStats {
    pub entries: usize,
    pub size_bytes: u64,
    pub max_bytes: u64,
    pub max_entries: usize,
    pub utilization: f64,
    pub evictions: u64,
    pub expirations: u64,
}

/// Shared tier client counters
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SharedTierStats {
    pub backend: String,
    pub operations: u64,
    pub errors: u64,
}

impl SharedTierStats {
    pub fn error_rate(&self) -> f64 {
        ratio(self.errors, self.operations)
    }
}

/// Everything the cache knows about itself at one instant
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub namespaces: Vec<NamespaceStats>,
    pub totals: NamespaceStats,
    pub local: LocalTierStats,
    pub shared: SharedTierStats,
    pub uptime_seconds: u64,
}

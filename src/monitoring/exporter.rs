//! Prometheus Exporter
//!
//! Renders a [`StatsSnapshot`] in the Prometheus text exposition format.
//! The exporter owns a private registry so several caches can be exported
//! side by side without colliding in the global default registry.

use parking_lot::Mutex;
use prometheus::{Encoder, Gauge, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};

use crate::cache::{StatsSnapshot, Tier, TierCounts};
use crate::error::{Error, Result};

/// Prometheus view of the cache stats
pub struct MetricsExporter {
    registry: Registry,
    /// Serializes update + gather so a scrape never sees half-reset counters
    render_lock: Mutex<()>,
    hits: IntCounterVec,
    misses: IntCounterVec,
    sets: IntCounterVec,
    deletes: IntCounterVec,
    evictions: IntCounterVec,
    refreshes: IntCounterVec,
    fetch_errors: IntCounterVec,
    local_entries: IntGauge,
    local_bytes: IntGauge,
    local_max_bytes: IntGauge,
    local_utilization: Gauge,
    shared_operations: IntGaugeVec,
    shared_errors: IntGaugeVec,
    uptime: IntGauge,
}

impl MetricsExporter {
    /// Create an exporter whose metric names start with `prefix`
    pub fn new(prefix: &str) -> Result<Self> {
        let registry = Registry::new();
        let name = |suffix: &str| format!("{}_{}", prefix, suffix);

        let tiered = |suffix: &str, help: &str| -> Result<IntCounterVec> {
            let vec = IntCounterVec::new(Opts::new(name(suffix), help), &["namespace", "tier"])?;
            registry.register(Box::new(vec.clone()))?;
            Ok(vec)
        };
        let per_ns = |suffix: &str, help: &str| -> Result<IntCounterVec> {
            let vec = IntCounterVec::new(Opts::new(name(suffix), help), &["namespace"])?;
            registry.register(Box::new(vec.clone()))?;
            Ok(vec)
        };
        let backend = |suffix: &str, help: &str| -> Result<IntGaugeVec> {
            let vec = IntGaugeVec::new(Opts::new(name(suffix), help), &["backend"])?;
            registry.register(Box::new(vec.clone()))?;
            Ok(vec)
        };
        let gauge = |suffix: &str, help: &str| -> Result<IntGauge> {
            let g = IntGauge::new(name(suffix), help)?;
            registry.register(Box::new(g.clone()))?;
            Ok(g)
        };

        let hits = tiered("hits_total", "Lookups answered by a tier")?;
        let misses = tiered("misses_total", "Lookups a tier could not answer")?;
        let sets = tiered("sets_total", "Writes into a tier")?;
        let deletes = tiered("deletes_total", "Deletes from a tier")?;
        let evictions = per_ns("evictions_total", "Local entries evicted by capacity")?;
        let refreshes = per_ns("refreshes_total", "Refresh-ahead fetches started")?;
        let fetch_errors = per_ns("fetch_errors_total", "Failed or timed out fetches")?;
        let local_entries = gauge("local_entries", "Entries resident in the local tier")?;
        let local_bytes = gauge("local_size_bytes", "Approximate bytes in the local tier")?;
        let local_max_bytes = gauge("local_max_bytes", "Local tier byte ceiling")?;
        let local_utilization = Gauge::new(
            name("local_utilization_ratio"),
            "Local tier fill ratio (bytes or entries, whichever is higher)",
        )?;
        registry.register(Box::new(local_utilization.clone()))?;
        let shared_operations = backend("shared_operations", "Shared tier operations attempted")?;
        let shared_errors = backend("shared_errors", "Shared tier operations that failed")?;
        let uptime = gauge("uptime_seconds", "Seconds since the cache was created")?;

        Ok(Self {
            registry,
            render_lock: Mutex::new(()),
            hits,
            misses,
            sets,
            deletes,
            evictions,
            refreshes,
            fetch_errors,
            local_entries,
            local_bytes,
            local_max_bytes,
            local_utilization,
            shared_operations,
            shared_errors,
            uptime,
        })
    }

    /// Load a snapshot into the registry and encode it
    pub fn render(&self, stats: &StatsSnapshot) -> Result<String> {
        let _guard = self.render_lock.lock();
        self.update(stats);

        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| Error::Internal(format!("metrics: {}", e)))
    }

    /// Content type for the rendered body
    pub fn content_type(&self) -> String {
        TextEncoder::new().format_type().to_string()
    }

    fn update(&self, stats: &StatsSnapshot) {
        for vec in [
            &self.hits,
            &self.misses,
            &self.sets,
            &self.deletes,
            &self.evictions,
            &self.refreshes,
            &self.fetch_errors,
        ] {
            vec.reset();
        }
        self.shared_operations.reset();
        self.shared_errors.reset();

        for ns in &stats.namespaces {
            let namespace = ns.namespace.as_str();
            self.tier(namespace, Tier::Local, &ns.local);
            self.tier(namespace, Tier::Shared, &ns.shared);
            self.evictions.with_label_values(&[namespace]).inc_by(ns.evictions);
            self.refreshes.with_label_values(&[namespace]).inc_by(ns.refreshes);
            self.fetch_errors.with_label_values(&[namespace]).inc_by(ns.fetch_errors);
        }

        self.local_entries.set(stats.local.entries as i64);
        self.local_bytes.set(stats.local.size_bytes as i64);
        self.local_max_bytes.set(stats.local.max_bytes as i64);
        self.local_utilization.set(stats.local.utilization);
        self.shared_operations
            .with_label_values(&[stats.shared.backend.as_str()])
            .set(stats.shared.operations as i64);
        self.shared_errors
            .with_label_values(&[stats.shared.backend.as_str()])
            .set(stats.shared.errors as i64);
        self.uptime.set(stats.uptime_seconds as i64);
    }

    fn tier(&self, namespace: &str, tier: Tier, counts: &TierCounts) {
        let labels = [namespace, tier.name()];
        self.hits.with_label_values(&labels).inc_by(counts.hits);
        self.misses.with_label_values(&labels).inc_by(counts.misses);
        self.sets.with_label_values(&labels).inc_by(counts.sets);
        self.deletes.with_label_values(&labels).inc_by(counts.deletes);
    }
}

impl std::fmt::Debug for MetricsExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsExporter").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheStats, LocalTierStats, SharedTierStats};

    fn snapshot() -> StatsSnapshot {
        let stats = CacheStats::new();
        stats.record_hit("catalog", Tier::Local);
        stats.record_hit("catalog", Tier::Local);
        stats.record_miss("catalog", Tier::Local);
        stats.record_miss("catalog", Tier::Shared);
        stats.record_set("catalog", Tier::Shared);
        stats.record_eviction("catalog");
        StatsSnapshot {
            namespaces: stats.snapshot(),
            totals: stats.totals(),
            local: LocalTierStats {
                entries: 3,
                size_bytes: 300,
                max_bytes: 1000,
                max_entries: 10,
                utilization: 0.3,
                ..Default::default()
            },
            shared: SharedTierStats {
                backend: "memory".into(),
                operations: 7,
                errors: 1,
            },
            uptime_seconds: 12,
        }
    }

    #[test]
    fn test_render_text_format() {
        let exporter = MetricsExporter::new("tiercache").unwrap();
        let body = exporter.render(&snapshot()).unwrap();

        assert!(body.contains("# TYPE tiercache_hits_total counter"));
        assert!(body.contains("tiercache_hits_total{namespace=\"catalog\",tier=\"local\"} 2"));
        assert!(body.contains("tiercache_misses_total{namespace=\"catalog\",tier=\"shared\"} 1"));
        assert!(body.contains("tiercache_evictions_total{namespace=\"catalog\"} 1"));
        assert!(body.contains("tiercache_local_entries 3"));
        assert!(body.contains("tiercache_shared_errors{backend=\"memory\"} 1"));
        assert!(body.contains("tiercache_uptime_seconds 12"));
    }

    #[test]
    fn test_render_replaces_previous_values() {
        let exporter = MetricsExporter::new("tiercache").unwrap();
        exporter.render(&snapshot()).unwrap();
        let body = exporter.render(&snapshot()).unwrap();
        // Counters are reloaded from the snapshot, not accumulated
        assert!(body.contains("tiercache_hits_total{namespace=\"catalog\",tier=\"local\"} 2"));
    }

    #[test]
    fn test_exporters_do_not_collide() {
        assert!(MetricsExporter::new("a").is_ok());
        assert!(MetricsExporter::new("a").is_ok());
        assert!(exporter_content_type().starts_with("text/plain"));
    }

    fn exporter_content_type() -> String {
        MetricsExporter::new("ct").unwrap().content_type()
    }
}

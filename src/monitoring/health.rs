//! Health Reporting
//!
//! Derives an overall cache status and operator recommendations from a
//! [`StatsSnapshot`]. Purely observational: nothing here touches cache state.

use serde::{Deserialize, Serialize};

use crate::cache::StatsSnapshot;
use crate::error::{Error, Result};

/// Health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Cache is doing its job
    Healthy,
    /// Cache works but is underperforming
    Warning,
    /// Cache is not providing meaningful benefit
    Critical,
}

impl HealthStatus {
    /// Check if status is healthy or warning (still serving)
    pub fn is_operational(&self) -> bool {
        matches!(self, HealthStatus::Healthy | HealthStatus::Warning)
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Warning => write!(f, "warning"),
            HealthStatus::Critical => write!(f, "critical"),
        }
    }
}

/// Health check result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckResult {
    /// Check name
    pub name: String,
    /// Status
    pub status: HealthStatus,
    /// Message
    pub message: Option<String>,
}

impl HealthCheckResult {
    /// Create a healthy result
    pub fn healthy(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Healthy,
            message: None,
        }
    }

    /// Create a warning result
    pub fn warning(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Warning,
            message: Some(message.into()),
        }
    }

    /// Create a critical result
    pub fn critical(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Critical,
            message: Some(message.into()),
        }
    }

    /// Attach a message to a healthy result
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Thresholds the health report is judged against
#[derive(Debug, Clone, PartialEq)]
pub struct HealthThresholds {
    /// Hit rate below this is a warning
    pub warning_hit_rate: f64,
    /// Hit rate below this is critical
    pub critical_hit_rate: f64,
    /// Local utilization at or above this recommends a larger ceiling
    pub local_utilization_warning: f64,
    /// Shared-tier error rate above this is a warning
    pub backend_error_rate_warning: f64,
    /// Shared-tier error rate above this is critical
    pub backend_error_rate_critical: f64,
    /// Evictions per local write above this is a warning
    pub eviction_ratio_warning: f64,
    /// Lookups required before the hit rate is judged
    pub min_lookups: u64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            warning_hit_rate: 0.60,
            critical_hit_rate: 0.30,
            local_utilization_warning: 0.90,
            backend_error_rate_warning: 0.05,
            backend_error_rate_critical: 0.50,
            eviction_ratio_warning: 0.25,
            min_lookups: 10,
        }
    }
}

impl HealthThresholds {
    pub fn validate(&self) -> Result<()> {
        let fractions = [
            ("warning_hit_rate", self.warning_hit_rate),
            ("critical_hit_rate", self.critical_hit_rate),
            ("local_utilization_warning", self.local_utilization_warning),
            ("backend_error_rate_warning", self.backend_error_rate_warning),
            ("backend_error_rate_critical", self.backend_error_rate_critical),
            ("eviction_ratio_warning", self.eviction_ratio_warning),
        ];
        for (name, value) in fractions {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::Config(format!(
                    "{} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }
        if self.critical_hit_rate > self.warning_hit_rate {
            return Err(Error::Config(
                "critical_hit_rate must not exceed warning_hit_rate".into(),
            ));
        }
        if self.backend_error_rate_warning > self.backend_error_rate_critical {
            return Err(Error::Config(
                "backend_error_rate_warning must not exceed backend_error_rate_critical".into(),
            ));
        }
        Ok(())
    }
}

/// Overall health report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    /// Worst status across all checks
    pub status: HealthStatus,
    /// Hit rate across every namespace
    pub hit_rate: f64,
    /// Local tier fill ratio (bytes or entries, whichever is higher)
    pub local_utilization: f64,
    /// Individual check results
    pub checks: Vec<HealthCheckResult>,
    /// Operator-facing suggestions
    pub recommendations: Vec<String>,
    /// Version
    pub version: String,
    /// Uptime in seconds
    pub uptime_seconds: u64,
}

impl HealthReport {
    /// Judge a stats snapshot
    pub fn evaluate(stats: &StatsSnapshot, thresholds: &HealthThresholds) -> Self {
        let mut recommendations = Vec::new();
        let checks = vec![
            check_hit_rate(stats, thresholds, &mut recommendations),
            check_local_utilization(stats, thresholds, &mut recommendations),
            check_shared_errors(stats, thresholds, &mut recommendations),
            check_evictions(stats, thresholds, &mut recommendations),
        ];

        let status = checks
            .iter()
            .map(|c| c.status)
            .max()
            .unwrap_or(HealthStatus::Healthy);

        Self {
            status,
            hit_rate: stats.totals.hit_rate,
            local_utilization: stats.local.utilization,
            checks,
            recommendations,
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: stats.uptime_seconds,
        }
    }

    /// Look up a check by name
    pub fn check(&self, name: &str) -> Option<&HealthCheckResult> {
        self.checks.iter().find(|c| c.name == name)
    }
}

fn check_hit_rate(
    stats: &StatsSnapshot,
    thresholds: &HealthThresholds,
    recommendations: &mut Vec<String>,
) -> HealthCheckResult {
    let totals = &stats.totals;
    if totals.lookups() < thresholds.min_lookups {
        return HealthCheckResult::healthy("hit_rate").with_message(format!(
            "{} lookups, not enough traffic to judge",
            totals.lookups()
        ));
    }

    let rate = totals.hit_rate;
    let message = format!("hit rate {:.1}% over {} lookups", rate * 100.0, totals.lookups());
    if rate >= thresholds.warning_hit_rate {
        return HealthCheckResult::healthy("hit_rate").with_message(message);
    }

    // Name the namespaces dragging the rate down
    let mut weak: Vec<_> = stats
        .namespaces
        .iter()
        .filter(|ns| ns.lookups() >= thresholds.min_lookups && ns.hit_rate < thresholds.warning_hit_rate)
        .map(|ns| ns.namespace.as_str())
        .collect();
    weak.sort_unstable();
    if weak.is_empty() {
        recommendations.push("Review TTLs: most lookups miss both tiers".to_string());
    } else {
        recommendations.push(format!(
            "Review TTLs or warm up namespaces with low hit rates: {}",
            weak.join(", ")
        ));
    }

    if rate < thresholds.critical_hit_rate {
        HealthCheckResult::critical("hit_rate", message)
    } else {
        HealthCheckResult::warning("hit_rate", message)
    }
}

fn check_local_utilization(
    stats: &StatsSnapshot,
    thresholds: &HealthThresholds,
    recommendations: &mut Vec<String>,
) -> HealthCheckResult {
    let local = &stats.local;
    let message = format!(
        "{} entries, {} of {} bytes ({:.1}%)",
        local.entries,
        local.size_bytes,
        local.max_bytes,
        local.utilization * 100.0
    );
    if local.utilization >= thresholds.local_utilization_warning {
        recommendations.push(format!(
            "Raise the local tier ceiling (currently {} bytes / {} entries)",
            local.max_bytes, local.max_entries
        ));
        HealthCheckResult::warning("local_utilization", message)
    } else {
        HealthCheckResult::healthy("local_utilization").with_message(message)
    }
}

fn check_shared_errors(
    stats: &StatsSnapshot,
    thresholds: &HealthThresholds,
    recommendations: &mut Vec<String>,
) -> HealthCheckResult {
    let shared = &stats.shared;
    if shared.operations == 0 {
        return HealthCheckResult::healthy("shared_backend");
    }

    let rate = shared.error_rate();
    let message = format!(
        "{}: {} errors in {} operations",
        shared.backend, shared.errors, shared.operations
    );
    if rate > thresholds.backend_error_rate_critical {
        recommendations.push(format!(
            "Shared tier ({}) is failing most operations; reads fall back to the source",
            shared.backend
        ));
        HealthCheckResult::critical("shared_backend", message)
    } else if rate > thresholds.backend_error_rate_warning {
        recommendations.push(format!(
            "Check connectivity and latency of the shared tier ({})",
            shared.backend
        ));
        HealthCheckResult::warning("shared_backend", message)
    } else {
        HealthCheckResult::healthy("shared_backend").with_message(message)
    }
}

fn check_evictions(
    stats: &StatsSnapshot,
    thresholds: &HealthThresholds,
    recommendations: &mut Vec<String>,
) -> HealthCheckResult {
    let writes = stats.totals.local.sets;
    let evictions = stats.local.evictions;
    if writes < thresholds.min_lookups || evictions == 0 {
        return HealthCheckResult::healthy("evictions");
    }

    let ratio = evictions as f64 / writes as f64;
    let message = format!("{} evictions for {} local writes", evictions, writes);
    if ratio > thresholds.eviction_ratio_warning {
        recommendations.push(
            "Local tier is churning: raise its ceiling or shorten TTLs of large namespaces"
                .to_string(),
        );
        HealthCheckResult::warning("evictions", message)
    } else {
        HealthCheckResult::healthy("evictions").with_message(message)
    }
}

// =============================================================================
// Tests
// =============================================================================

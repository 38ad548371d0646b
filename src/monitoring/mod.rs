//! Cache Observability
//!
//! Health judgement and Prometheus exposition, both derived from a
//! [`StatsSnapshot`](crate::cache::StatsSnapshot).
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                     TieredCache::stats()                    │
//! │                        StatsSnapshot                        │
//! ├─────────────────────────────┬──────────────────────────────┤
//! │ HealthReport::evaluate      │ MetricsExporter::render      │
//! │ (status, recommendations)   │ (Prometheus text format)     │
//! └─────────────────────────────┴──────────────────────────────┘
//! ```

pub mod exporter;
pub mod health;

pub use exporter::MetricsExporter;
pub use health::{HealthCheckResult, HealthReport, HealthStatus, HealthThresholds};

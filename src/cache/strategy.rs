//! Namespace Strategies
//!
//! Per-namespace TTL, refresh-ahead and compression policy.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use parking_lot::RwLock;

use super::DEFAULT_TTL;
use crate::error::Error;

/// Policy for one namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamespaceStrategy {
    /// TTL applied to both tiers on write and on promotion
    pub base_ttl: Duration,
    /// A hit with less than this much lifetime left triggers a background refresh
    pub refresh_threshold: Option<Duration>,
    /// LZ4-compress shared-tier payloads
    pub compress: bool,
}

impl Default for NamespaceStrategy {
    /// 30 minutes, no refresh-ahead, no compression
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl NamespaceStrategy {
    pub fn new(base_ttl: Duration) -> Self {
        Self {
            base_ttl,
            refresh_threshold: None,
            compress: false,
        }
    }

    /// Refresh when remaining lifetime drops below `threshold`
    pub fn with_refresh(mut self, threshold: Duration) -> Self {
        self.refresh_threshold = Some(threshold);
        self
    }

    pub fn compressed(mut self) -> Self {
        self.compress = true;
        self
    }

    /// True if an entry with `remaining` lifetime left should be refreshed
    pub fn needs_refresh(&self, remaining: Duration) -> bool {
        matches!(self.refresh_threshold, Some(threshold) if remaining < threshold)
    }
}

/// Parses `ttl[:refresh[:lz4]]`, durations in seconds, e.g. `300:60:lz4`
impl FromStr for NamespaceStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(':');
        let secs = |part: &str| {
            part.trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|e| Error::Config(format!("invalid strategy '{}': {}", s, e)))
        };

        let base_ttl = secs(parts.next().unwrap_or_default())?;
        if base_ttl.is_zero() {
            return Err(Error::Config(format!("invalid strategy '{}': ttl must be positive", s)));
        }
        let mut strategy = NamespaceStrategy::new(base_ttl);

        if let Some(refresh) = parts.next().filter(|p| !p.trim().is_empty()) {
            let threshold = secs(refresh)?;
            if threshold >= base_ttl {
                return Err(Error::Config(format!(
                    "invalid strategy '{}': refresh threshold must be below ttl",
                    s
                )));
            }
            if !threshold.is_zero() {
                strategy = strategy.with_refresh(threshold);
            }
        }

        match parts.next().map(str::trim) {
            None => {}
            Some("lz4") => strategy = strategy.compressed(),
            Some(other) => {
                return Err(Error::Config(format!(
                    "invalid strategy '{}': unknown flag '{}'",
                    s, other
                )))
            }
        }

        if parts.next().is_some() {
            return Err(Error::Config(format!("invalid strategy '{}': too many fields", s)));
        }
        Ok(strategy)
    }
}

/// Namespace → strategy map with a global fallback
#[derive(Debug)]
pub struct StrategyRegistry {
    strategies: RwLock<HashMap<String, NamespaceStrategy>>,
    default: NamespaceStrategy,
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::new(NamespaceStrategy::default())
    }
}

impl StrategyRegistry {
    pub fn new(default: NamespaceStrategy) -> Self {
        Self {
            strategies: RwLock::new(HashMap::new()),
            default,
        }
    }

    /// Register (or replace) a namespace strategy
    pub fn register(&self, namespace: impl Into<String>, strategy: NamespaceStrategy) {
        let namespace = namespace.into();
        tracing::debug!("Registered strategy for {}: {:?}", namespace, strategy);
        self.strategies.write().insert(namespace, strategy);
    }

    /// Strategy for `namespace`, or the default when unregistered
    pub fn resolve(&self, namespace: &str) -> NamespaceStrategy {
        self.strategies
            .read()
            .get(namespace)
            .copied()
            .unwrap_or(self.default)
    }

    pub fn default_strategy(&self) -> NamespaceStrategy {
        self.default
    }
}

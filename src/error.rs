//! Error types for the tiered cache

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the tiered cache.
///
/// Only fetch, batch and pattern errors are ever returned to callers of the
/// read path. Shared-tier and codec failures are logged and counted instead.
/// The enum is `Clone` so a single outcome can be handed to every waiter of
/// a collapsed fetch.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Caller-supplied fetch function failed
    #[error("Fetch failed for {namespace}:{key}: {reason}")]
    Fetch {
        namespace: String,
        key: String,
        reason: Arc<anyhow::Error>,
    },

    /// Fetch function did not complete in time
    #[error("Fetch for {namespace}:{key} timed out after {timeout:?}")]
    FetchTimeout {
        namespace: String,
        key: String,
        timeout: Duration,
    },

    /// Batched fetch failed; every key of the batch receives this error
    #[error("Batch fetch failed for namespace {namespace} ({keys} keys): {reason}")]
    BatchFailed {
        namespace: String,
        keys: usize,
        reason: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),

    // =========================================================================
    // Codec Errors
    // =========================================================================
    /// Value could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Compression failed
    #[error("Compression with {algorithm} failed: {reason}")]
    CompressionFailed { algorithm: String, reason: String },

    /// Decompression failed
    #[error("Decompression with {algorithm} failed: {reason}")]
    DecompressionFailed { algorithm: String, reason: String },

    // =========================================================================
    // Shared Tier Errors
    // =========================================================================
    /// Shared backend error (unreachable, timeout, protocol)
    #[error("Shared backend error: {0}")]
    Backend(String),

    /// Glob pattern could not be compiled
    #[error("Invalid key pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Wrap a caller fetch error
    pub fn fetch(namespace: &str, key: &str, reason: impl Into<anyhow::Error>) -> Self {
        Error::Fetch {
            namespace: namespace.to_string(),
            key: key.to_string(),
            reason: Arc::new(reason.into()),
        }
    }

    /// True for errors produced by a caller fetch (single or batched)
    pub fn is_fetch_failure(&self) -> bool {
        matches!(
            self,
            Error::Fetch { .. } | Error::FetchTimeout { .. } | Error::BatchFailed { .. }
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(Arc::new(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<globset::Error> for Error {
    fn from(err: globset::Error) -> Self {
        Error::InvalidPattern {
            pattern: err.glob().unwrap_or_default().to_string(),
            reason: err.kind().to_string(),
        }
    }
}

impl From<prometheus::Error> for Error {
    fn from(err: prometheus::Error) -> Self {
        Error::Internal(format!("metrics: {}", err))
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for Error {
    fn from(err: redis::RedisError) -> Self {
        Error::Backend(err.to_string())
    }
}

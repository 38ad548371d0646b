//! Tiered Cache Node
//!
//! Runs one [`TieredCache`] per process and exposes its health and
//! statistics over HTTP.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        tiercache node                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │ Health Server│◀───│ TieredCache  │───▶│Metrics Server│       │
//! │  │ /healthz     │    │ local+shared │    │ /metrics     │       │
//! │  │ /readyz      │    │ maintenance  │    │              │       │
//! │  └──────────────┘    └──────────────┘    └──────────────┘       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tiercache::cache::{CompressionConfig, LocalConfig, SharedBackend, SharedConfig};
use tiercache::{
    CacheConfig, Error, HealthThresholds, InMemorySharedBackend, MetricsExporter,
    NamespaceStrategy, Result, TieredCache,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Tiered cache node - local tier in front of a shared key-value tier
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Redis URL for the shared tier (in-memory shared tier when unset)
    #[cfg(feature = "redis")]
    #[arg(long, env = "TIERCACHE_REDIS_URL")]
    redis_url: Option<String>,

    /// First segment of every shared-tier key
    #[arg(long, env = "TIERCACHE_KEY_PREFIX", default_value = "cache")]
    key_prefix: String,

    /// TTL in seconds for namespaces without a strategy
    #[arg(long, env = "TIERCACHE_DEFAULT_TTL_SECONDS", default_value = "1800")]
    default_ttl_seconds: u64,

    /// Fetch timeout in seconds (0 disables)
    #[arg(long, env = "TIERCACHE_FETCH_TIMEOUT_SECONDS", default_value = "30")]
    fetch_timeout_seconds: u64,

    /// Expired-entry sweep interval in seconds
    #[arg(long, env = "TIERCACHE_MAINTENANCE_INTERVAL_SECONDS", default_value = "60")]
    maintenance_interval_seconds: u64,

    /// Stats log interval in seconds
    #[arg(long, env = "TIERCACHE_STATS_INTERVAL_SECONDS", default_value = "300")]
    stats_interval_seconds: u64,

    /// Local tier byte ceiling
    #[arg(long, env = "TIERCACHE_LOCAL_MAX_BYTES", default_value = "268435456")]
    local_max_bytes: u64,

    /// Local tier entry ceiling
    #[arg(long, env = "TIERCACHE_LOCAL_MAX_ENTRIES", default_value = "100000")]
    local_max_entries: usize,

    /// Largest single value the local tier admits, in bytes
    #[arg(long, env = "TIERCACHE_LOCAL_MAX_ITEM_BYTES", default_value = "1048576")]
    local_max_item_bytes: u64,

    /// Fraction of the ceilings eviction frees down to
    #[arg(long, env = "TIERCACHE_LOCAL_LOW_WATERMARK", default_value = "0.9")]
    local_low_watermark: f64,

    /// Per-operation shared tier timeout in milliseconds
    #[arg(long, env = "TIERCACHE_SHARED_OP_TIMEOUT_MS", default_value = "2000")]
    shared_op_timeout_ms: u64,

    /// Smallest payload that is LZ4-compressed, in bytes
    #[arg(long, env = "TIERCACHE_COMPRESSION_MIN_BYTES", default_value = "1024")]
    compression_min_bytes: usize,

    /// LZ4 compression level
    #[arg(long, env = "TIERCACHE_COMPRESSION_LEVEL", default_value = "4")]
    compression_level: i32,

    /// Hit rate below which health is a warning
    #[arg(long, env = "TIERCACHE_WARNING_HIT_RATE", default_value = "0.60")]
    warning_hit_rate: f64,

    /// Hit rate below which health is critical
    #[arg(long, env = "TIERCACHE_CRITICAL_HIT_RATE", default_value = "0.30")]
    critical_hit_rate: f64,

    /// Local utilization at which raising the ceiling is recommended
    #[arg(long, env = "TIERCACHE_LOCAL_UTILIZATION_WARNING", default_value = "0.90")]
    local_utilization_warning: f64,

    /// Shared tier error rate above which health is a warning
    #[arg(long, env = "TIERCACHE_BACKEND_ERROR_RATE_WARNING", default_value = "0.05")]
    backend_error_rate_warning: f64,

    /// Shared tier error rate above which health is critical
    #[arg(long, env = "TIERCACHE_BACKEND_ERROR_RATE_CRITICAL", default_value = "0.50")]
    backend_error_rate_critical: f64,

    /// Lookups required before the hit rate is judged
    #[arg(long, env = "TIERCACHE_MIN_LOOKUPS", default_value = "10")]
    min_lookups: u64,

    /// Namespace strategy `ns=ttl[:refresh[:lz4]]` (seconds), repeatable
    #[arg(long = "strategy", env = "TIERCACHE_STRATEGIES", value_delimiter = ',')]
    strategies: Vec<String>,

    /// Metrics server bind address
    #[arg(long, env = "TIERCACHE_METRICS_ADDR", default_value = "0.0.0.0:9090")]
    metrics_addr: String,

    /// Health server bind address
    #[arg(long, env = "TIERCACHE_HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            key_prefix: self.key_prefix.clone(),
            default_ttl: Duration::from_secs(self.default_ttl_seconds),
            fetch_timeout: (self.fetch_timeout_seconds > 0)
                .then(|| Duration::from_secs(self.fetch_timeout_seconds)),
            maintenance_interval: Duration::from_secs(self.maintenance_interval_seconds),
            stats_interval: Duration::from_secs(self.stats_interval_seconds),
            local: LocalConfig {
                max_bytes: self.local_max_bytes,
                max_entries: self.local_max_entries,
                max_item_bytes: self.local_max_item_bytes,
                low_watermark: self.local_low_watermark,
            },
            shared: SharedConfig {
                op_timeout: Duration::from_millis(self.shared_op_timeout_ms),
            },
            compression: CompressionConfig {
                min_size_bytes: self.compression_min_bytes,
                level: self.compression_level,
            },
            health: HealthThresholds {
                warning_hit_rate: self.warning_hit_rate,
                critical_hit_rate: self.critical_hit_rate,
                local_utilization_warning: self.local_utilization_warning,
                backend_error_rate_warning: self.backend_error_rate_warning,
                backend_error_rate_critical: self.backend_error_rate_critical,
                min_lookups: self.min_lookups,
                ..Default::default()
            },
        }
    }

    fn namespace_strategies(&self) -> Result<Vec<(String, NamespaceStrategy)>> {
        self.strategies
            .iter()
            .map(|raw| {
                let (namespace, policy) = raw.split_once('=').ok_or_else(|| {
                    Error::Config(format!("strategy '{}' is not of the form ns=ttl", raw))
                })?;
                let namespace = namespace.trim();
                if namespace.is_empty() {
                    return Err(Error::Config(format!("strategy '{}' has no namespace", raw)));
                }
                Ok((namespace.to_string(), policy.parse()?))
            })
            .collect()
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    info!("Starting tiercache node");
    info!("  Key prefix: {}", args.key_prefix);
    info!("  Default TTL: {}s", args.default_ttl_seconds);
    info!(
        "  Local ceiling: {} bytes / {} entries",
        args.local_max_bytes, args.local_max_entries
    );

    let backend = shared_backend(&args).await?;
    let cache = TieredCache::with_config(args.cache_config(), backend)?;

    for (namespace, strategy) in args.namespace_strategies()? {
        info!(
            "  Strategy {}: ttl {:?}, refresh {:?}, compress {}",
            namespace, strategy.base_ttl, strategy.refresh_threshold, strategy.compress
        );
        cache.register_strategy(namespace, strategy);
    }

    if cache.ping_shared().await {
        info!("Shared tier reachable");
    } else {
        warn!("Shared tier ping failed - serving from the local tier and the source");
    }

    let shutdown = CancellationToken::new();
    let maintenance = cache.spawn_maintenance(shutdown.clone());

    // Start health server
    let health_addr = args.health_addr.clone();
    let health_cache = cache.clone();
    let health = tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr, health_cache).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let metrics_addr = args.metrics_addr.clone();
    let exporter = Arc::new(MetricsExporter::new("tiercache")?);
    let metrics_cache = cache.clone();
    let metrics = tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr, metrics_cache, exporter).await {
            error!("Metrics server error: {}", e);
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    shutdown.cancel();
    health.abort();
    metrics.abort();
    if let Err(e) = maintenance.await {
        warn!("Maintenance task ended abnormally: {}", e);
    }

    cache.log_stats();
    info!("tiercache node shutdown complete");
    Ok(())
}

#[cfg(feature = "redis")]
async fn shared_backend(args: &Args) -> Result<Arc<dyn SharedBackend>> {
    match &args.redis_url {
        Some(url) => {
            let backend = tiercache::cache::RedisBackend::connect(url).await?;
            info!("Connected to Redis shared tier");
            Ok(Arc::new(backend))
        }
        None => {
            info!("No Redis URL configured, using in-memory shared tier");
            Ok(Arc::new(InMemorySharedBackend::new()))
        }
    }
}

#[cfg(not(feature = "redis"))]
async fn shared_backend(_args: &Args) -> Result<Arc<dyn SharedBackend>> {
    info!("Using in-memory shared tier");
    Ok(Arc::new(InMemorySharedBackend::new()))
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "redis=warn"] {
        if let Ok(d) = directive.parse() {
            filter = filter.add_directive(d);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// HTTP Servers
// =============================================================================

mod http {
    use http_body_util::Full;
    use hyper::body::Bytes;
    use hyper::header::{HeaderValue, CONTENT_TYPE};
    use hyper::{Response, StatusCode};

    pub type Body = Full<Bytes>;

    pub fn respond(status: StatusCode, content_type: &str, body: impl Into<Bytes>) -> Response<Body> {
        let mut response = Response::new(Full::new(body.into()));
        *response.status_mut() = status;
        if let Ok(value) = HeaderValue::from_str(content_type) {
            response.headers_mut().insert(CONTENT_TYPE, value);
        }
        response
    }

    pub fn not_found() -> Response<Body> {
        respond(StatusCode::NOT_FOUND, "text/plain", "not found")
    }
}

async fn bind(addr: &str, name: &str) -> Result<TcpListener> {
    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Config(format!("Invalid {} server address: {}", name, e)))?;
    let listener = TcpListener::bind(addr).await?;
    info!("{} server listening on {}", name, addr);
    Ok(listener)
}

async fn run_health_server(addr: &str, cache: TieredCache) -> Result<()> {
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, StatusCode};
    use hyper_util::rt::TokioIo;

    async fn health_handler(
        req: Request<hyper::body::Incoming>,
        cache: TieredCache,
    ) -> std::result::Result<hyper::Response<http::Body>, std::convert::Infallible> {
        let response = match req.uri().path() {
            "/healthz" | "/livez" => http::respond(StatusCode::OK, "text/plain", "ok"),
            "/readyz" => {
                let report = cache.health();
                let status = if report.status.is_operational() {
                    StatusCode::OK
                } else {
                    StatusCode::SERVICE_UNAVAILABLE
                };
                match serde_json::to_vec(&report) {
                    Ok(body) => http::respond(status, "application/json", body),
                    Err(e) => http::respond(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "text/plain",
                        e.to_string(),
                    ),
                }
            }
            _ => http::not_found(),
        };
        Ok(response)
    }

    let listener = bind(addr, "Health").await?;

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let cache = cache.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req| health_handler(req, cache.clone()));
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!("Health server connection error: {}", e);
            }
        });
    }
}

async fn run_metrics_server(addr: &str, cache: TieredCache, exporter: Arc<MetricsExporter>) -> Result<()> {
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, StatusCode};
    use hyper_util::rt::TokioIo;

    async fn metrics_handler(
        req: Request<hyper::body::Incoming>,
        cache: TieredCache,
        exporter: Arc<MetricsExporter>,
    ) -> std::result::Result<hyper::Response<http::Body>, std::convert::Infallible> {
        let response = match req.uri().path() {
            "/metrics" => match exporter.render(&cache.stats()) {
                Ok(body) => http::respond(StatusCode::OK, &exporter.content_type(), body),
                Err(e) => {
                    error!("Failed to render metrics: {}", e);
                    http::respond(StatusCode::INTERNAL_SERVER_ERROR, "text/plain", e.to_string())
                }
            },
            "/stats" => match serde_json::to_vec(&cache.stats()) {
                Ok(body) => http::respond(StatusCode::OK, "application/json", body),
                Err(e) => http::respond(StatusCode::INTERNAL_SERVER_ERROR, "text/plain", e.to_string()),
            },
            _ => http::not_found(),
        };
        Ok(response)
    }

    let listener = bind(addr, "Metrics").await?;

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let cache = cache.clone();
        let exporter = exporter.clone();

        tokio::spawn(async move {
            let service =
                service_fn(move |req| metrics_handler(req, cache.clone(), exporter.clone()));
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!("Metrics server connection error: {}", e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["tiercache"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn test_default_args_produce_valid_config() {
        let config = args(&[]).cache_config();
        assert!(config.validate().is_ok());
        assert_eq!(config.key_prefix, "cache");
        assert_eq!(config.fetch_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.local.max_bytes, 256 * 1024 * 1024);
    }

    #[test]
    fn test_zero_fetch_timeout_disables_it() {
        let config = args(&["--fetch-timeout-seconds", "0"]).cache_config();
        assert_eq!(config.fetch_timeout, None);
    }

    #[test]
    fn test_strategy_flags() {
        let parsed = args(&["--strategy", "catalog=300:60", "--strategy", "blobs=3600:0:lz4"])
            .namespace_strategies()
            .unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].0, "catalog");
        assert_eq!(parsed[0].1.refresh_threshold, Some(Duration::from_secs(60)));
        assert!(parsed[1].1.compress);

        assert!(args(&["--strategy", "catalog"]).namespace_strategies().is_err());
        assert!(args(&["--strategy", "=300"]).namespace_strategies().is_err());
    }
}

//! Observability features: structured logging and Prometheus metrics

use metrics::{counter, histogram, Label};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::OnceCell;
use std::net::SocketAddr;
use tokio::time::{Duration, Instant};
use tracing::{info, Level};
use tracing_subscriber::{
    fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

use crate::config::{LoggingConfig, MetricsConfig, ObservabilityConfig};

/// Global observability system
static OBSERVABILITY: OnceCell<ObservabilitySystem> = OnceCell::new();

/// Observability system for centralized logging and metrics
pub struct ObservabilitySystem {
    metrics_enabled: bool,
}

impl ObservabilitySystem {
    /// Initialize the observability system. Must be called from within a
    /// Tokio runtime when metrics are enabled.
    pub fn init(config: &ObservabilityConfig) -> anyhow::Result<()> {
        let system = Self {
            metrics_enabled: config.metrics.enabled,
        };

        Self::init_logging(&config.logging)?;

        if config.metrics.enabled {
            Self::init_metrics(&config.metrics)?;
        }

        OBSERVABILITY
            .set(system)
            .map_err(|_| anyhow::anyhow!("Observability system already initialized"))?;

        info!("Observability system initialized");
        Ok(())
    }

    /// Initialize structured logging
    fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
        let env_filter = EnvFilter::builder()
            .with_default_directive(parse_level(&config.level).into())
            .from_env_lossy();

        let registry = tracing_subscriber::registry().with(env_filter);

        match config.format.to_lowercase().as_str() {
            "json" => {
                let json_layer = tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_span_events(FmtSpan::CLOSE);
                registry.with(json_layer).try_init()?;
            }
            _ => {
                let pretty_layer = tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_writer(std::io::stderr)
                    .with_span_events(FmtSpan::CLOSE);
                registry.with(pretty_layer).try_init()?;
            }
        }

        Ok(())
    }

    /// Install the Prometheus recorder and its scrape endpoint
    fn init_metrics(config: &MetricsConfig) -> anyhow::Result<()> {
        let bind_addr: SocketAddr = config.bind_address.parse()?;

        PrometheusBuilder::new()
            .with_http_listener(bind_addr)
            .install()?;

        info!("Prometheus metrics initialized on {}", bind_addr);
        Ok(())
    }

    /// Get the global observability system
    pub fn get() -> Option<&'static ObservabilitySystem> {
        OBSERVABILITY.get()
    }

    pub fn metrics_enabled(&self) -> bool {
        self.metrics_enabled
    }
}

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// List query metrics
pub struct QueryMetrics;

impl QueryMetrics {
    /// Record a finished list query
    pub fn query_completed(list: &str, duration: Duration, success: bool) {
        let status = if success { "success" } else { "error" };
        counter!("quarry_queries_total",
                "list" => list.to_string(),
                "status" => status)
            .increment(1);
        histogram!("quarry_query_duration_seconds", "list" => list.to_string())
            .record(duration.as_secs_f64());
    }

    /// Record request filters that were dropped instead of applied
    pub fn filters_ignored(list: &str, count: usize) {
        if count == 0 {
            return;
        }
        counter!("quarry_filters_ignored_total", "list" => list.to_string())
            .increment(count as u64);
    }

    /// Record the number of root entities a query matched
    pub fn rows_matched(list: &str, total: u64) {
        histogram!("quarry_rows_matched", "list" => list.to_string()).record(total as f64);
    }
}

/// Performance timer helper; records into a histogram when finished or dropped
pub struct PerfTimer {
    start: Instant,
    metric_name: String,
    labels: Vec<(String, String)>,
    recorded: bool,
}

impl PerfTimer {
    pub fn new(metric_name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            metric_name: metric_name.into(),
            labels: Vec::new(),
            recorded: false,
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.push((key.into(), value.into()));
        self
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn finish(mut self) -> Duration {
        self.record()
    }

    fn record(&mut self) -> Duration {
        let duration = self.start.elapsed();
        if !self.recorded {
            self.recorded = true;
            let labels: Vec<Label> = self
                .labels
                .iter()
                .map(|(k, v)| Label::new(k.clone(), v.clone()))
                .collect();
            histogram!(self.metric_name.clone(), labels).record(duration.as_secs_f64());
        }
        duration
    }
}

impl Drop for PerfTimer {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            self.record();
        }
    }
}

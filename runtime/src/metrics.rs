//! Prometheus metrics.
//!
//! Metric names are collected here so the ingestion worker, the read service,
//! and dashboards agree on them. [`MetricsServer`] installs the global
//! recorder and serves `/metrics` over HTTP.
//!
//! ```rust,no_run
//! use orderflow_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! MetricsServer::new("0.0.0.0:9090".parse()?).start()?;
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use orderflow_core::CacheStats;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Cache lookups that found an entry.
pub const CACHE_HITS: &str = "orderflow_cache_hits_total";
/// Cache lookups that fell through to the store.
pub const CACHE_MISSES: &str = "orderflow_cache_misses_total";
/// Entries evicted by capacity pressure.
pub const CACHE_EVICTIONS: &str = "orderflow_cache_evictions_total";
/// Current number of cached orders.
pub const CACHE_ENTRIES: &str = "orderflow_cache_entries";
/// Orders loaded into the cache at startup.
pub const CACHE_WARMUP_LOADED: &str = "orderflow_cache_warmup_loaded";
/// Processed messages, labelled by `outcome`.
pub const MESSAGES_INGESTED: &str = "orderflow_messages_ingested_total";
/// Messages parked in the dead-letter sink, labelled by `reason`.
pub const MESSAGES_DEAD_LETTERED: &str = "orderflow_messages_dead_lettered_total";
/// Time from fetch to acknowledgement decision.
pub const INGEST_DURATION: &str = "orderflow_ingest_duration_seconds";

/// Errors from metrics setup.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// The exporter could not be configured.
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// The recorder or HTTP listener could not be installed.
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus scrape endpoint.
pub struct MetricsServer {
    addr: SocketAddr,
}

impl MetricsServer {
    /// Serve on `addr`, e.g. `0.0.0.0:9090`.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    /// Register descriptions, install the global recorder, and start the
    /// HTTP listener. Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError`] if the exporter cannot be built or a recorder
    /// is already installed.
    pub fn start(self) -> Result<(), MetricsError> {
        PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?
            .install()
            .map_err(|e| MetricsError::Install(e.to_string()))?;

        describe();
        tracing::info!(addr = %self.addr, "Metrics available at http://{}/metrics", self.addr);
        Ok(())
    }
}

fn describe() {
    describe_counter!(CACHE_HITS, "Order lookups served from the cache");
    describe_counter!(CACHE_MISSES, "Order lookups that read the store");
    describe_counter!(CACHE_EVICTIONS, "Cache entries evicted to stay within capacity");
    describe_gauge!(CACHE_ENTRIES, "Orders currently cached");
    describe_gauge!(CACHE_WARMUP_LOADED, "Orders loaded into the cache at startup");
    describe_counter!(MESSAGES_INGESTED, "Messages processed by the ingestion worker");
    describe_counter!(MESSAGES_DEAD_LETTERED, "Messages moved to the dead-letter sink");
    describe_histogram!(INGEST_DURATION, "Time spent processing one message");
}

/// Cache metrics.
pub mod cache {
    use super::{CACHE_ENTRIES, CACHE_EVICTIONS, CACHE_HITS, CACHE_MISSES, CacheStats};

    /// Record a hit.
    pub fn record_hit() {
        metrics::counter!(CACHE_HITS).increment(1);
    }

    /// Record a miss.
    pub fn record_miss() {
        metrics::counter!(CACHE_MISSES).increment(1);
    }

    /// Publish size and eviction totals from a stats snapshot.
    #[allow(clippy::cast_precision_loss)] // Entry counts are far below 2^52
    pub fn observe(stats: &CacheStats) {
        metrics::gauge!(CACHE_ENTRIES).set(stats.len as f64);
        metrics::counter!(CACHE_EVICTIONS).absolute(stats.evictions);
    }
}

/// Ingestion metrics.
pub mod ingest {
    use super::{Duration, INGEST_DURATION, MESSAGES_DEAD_LETTERED, MESSAGES_INGESTED};

    /// Record one processed message.
    pub fn record_outcome(outcome: &'static str, elapsed: Duration) {
        metrics::counter!(MESSAGES_INGESTED, "outcome" => outcome).increment(1);
        metrics::histogram!(INGEST_DURATION).record(elapsed.as_secs_f64());
    }

    /// Record a dead-lettered message.
    pub fn record_dead_letter(reason: &'static str) {
        metrics::counter!(MESSAGES_DEAD_LETTERED, "reason" => reason).increment(1);
    }
}

/// Warm-up metrics.
pub mod warmup {
    use super::CACHE_WARMUP_LOADED;

    /// Record how many orders warm-up loaded.
    #[allow(clippy::cast_precision_loss)]
    pub fn record_loaded(loaded: usize) {
        metrics::gauge!(CACHE_WARMUP_LOADED).set(loaded as f64);
    }
}

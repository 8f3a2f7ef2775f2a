//! Prometheus metrics for the bloom store.
//!
//! Metrics are registered on a caller supplied registry so several stores
//! (or tests) can coexist in one process.

use bloomstore_core::{BloomResult, ConfigError};
use prometheus::{
    register_histogram_vec_with_registry, register_histogram_with_registry,
    register_int_counter_vec_with_registry, register_int_gauge_with_registry, Histogram,
    HistogramVec, IntCounterVec, IntGauge, Registry,
};

/// Object store and local disk latency buckets (seconds)
const FETCH_LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0, 30.0,
];

pub const SOURCE_CACHE: &str = "cache";
pub const SOURCE_STORAGE: &str = "storage";

fn registration_error(name: &str, e: prometheus::Error) -> ConfigError {
    ConfigError::MetricsRegistration {
        name: name.to_string(),
        reason: e.to_string(),
    }
}

/// Container for all store metrics.
#[derive(Clone)]
pub struct StoreMetrics {
    /// Metas returned by fetch - labels: source (cache/storage)
    pub metas_fetched_total: IntCounterVec,

    /// Blocks returned by fetch - labels: source (cache/storage)
    pub blocks_fetched_total: IntCounterVec,

    /// Block downloads waiting for a worker
    pub download_queue_length: IntGauge,

    /// Time to download and extract one block
    pub download_duration_seconds: Histogram,

    /// Meta resolution duration - labels: outcome (ok/error)
    pub resolve_duration_seconds: HistogramVec,
}

impl StoreMetrics {
    /// Create and register all metrics on `registry`.
    pub fn new(registry: &Registry) -> BloomResult<Self> {
        Ok(Self {
            metas_fetched_total: register_int_counter_vec_with_registry!(
                "bloomstore_metas_fetched_total",
                "Total number of metas returned by fetch",
                &["source"],
                registry
            )
            .map_err(|e| registration_error("bloomstore_metas_fetched_total", e))?,

            blocks_fetched_total: register_int_counter_vec_with_registry!(
                "bloomstore_blocks_fetched_total",
                "Total number of blocks returned by fetch",
                &["source"],
                registry
            )
            .map_err(|e| registration_error("bloomstore_blocks_fetched_total", e))?,

            download_queue_length: register_int_gauge_with_registry!(
                "bloomstore_download_queue_length",
                "Block downloads waiting for a worker",
                registry
            )
            .map_err(|e| registration_error("bloomstore_download_queue_length", e))?,

            download_duration_seconds: register_histogram_with_registry!(
                "bloomstore_block_download_duration_seconds",
                "Time to download and extract one block in seconds",
                FETCH_LATENCY_BUCKETS.to_vec(),
                registry
            )
            .map_err(|e| registration_error("bloomstore_block_download_duration_seconds", e))?,

            resolve_duration_seconds: register_histogram_vec_with_registry!(
                "bloomstore_resolve_metas_duration_seconds",
                "Meta resolution duration in seconds",
                &["outcome"],
                FETCH_LATENCY_BUCKETS.to_vec(),
                registry
            )
            .map_err(|e| registration_error("bloomstore_resolve_metas_duration_seconds", e))?,
        })
    }

    pub fn record_metas(&self, source: &str, count: usize) {
        self.metas_fetched_total
            .with_label_values(&[source])
            .inc_by(count as u64);
    }

    pub fn record_blocks(&self, source: &str, count: usize) {
        self.blocks_fetched_total
            .with_label_values(&[source])
            .inc_by(count as u64);
    }

    pub fn record_resolve(&self, ok: bool, duration_secs: f64) {
        let outcome = if ok { "ok" } else { "error" };
        self.resolve_duration_seconds
            .with_label_values(&[outcome])
            .observe(duration_secs);
    }
}

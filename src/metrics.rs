//! Auth counters
//!
//! Providers report two events: a successful code exchange and a fully
//! successful validation. Where the counts end up is up to the embedder.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

/// Counter name for successful validations.
pub const AUTH_VALID_TOTAL: &str = "idp_gate_auth_valid_total";
/// Counter name for successful code exchanges.
pub const AUTH_EXCHANGE_TOTAL: &str = "idp_gate_auth_exchange_total";

/// Metrics sink consumed by providers. Increments must be safe to call
/// concurrently.
pub trait AuthMetrics: Send + Sync {
    /// A token passed every validation step
    fn increment_valid(&self, provider: &str);
    /// An authorization code was exchanged for a token
    fn increment_exchange(&self, provider: &str);
}

/// Forwards to the global `metrics` recorder, labelled by provider.
#[derive(Debug, Default, Clone, Copy)]
pub struct RecorderMetrics;

impl AuthMetrics for RecorderMetrics {
    fn increment_valid(&self, provider: &str) {
        telemetry_metrics::counter!(AUTH_VALID_TOTAL, "provider" => provider.to_owned()).increment(1);
    }

    fn increment_exchange(&self, provider: &str) {
        telemetry_metrics::counter!(AUTH_EXCHANGE_TOTAL, "provider" => provider.to_owned())
            .increment(1);
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl AuthMetrics for NoopMetrics {
    fn increment_valid(&self, _provider: &str) {}
    fn increment_exchange(&self, _provider: &str) {}
}

/// In-process counters keyed by provider name.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    valid: DashMap<String, AtomicU64>,
    exchange: DashMap<String, AtomicU64>,
}

impl InMemoryMetrics {
    /// Create empty counters
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Successful validations recorded for `provider`
    pub fn valid_count(&self, provider: &str) -> u64 {
        read(&self.valid, provider)
    }

    /// Successful exchanges recorded for `provider`
    pub fn exchange_count(&self, provider: &str) -> u64 {
        read(&self.exchange, provider)
    }
}

impl AuthMetrics for InMemoryMetrics {
    fn increment_valid(&self, provider: &str) {
        bump(&self.valid, provider);
    }

    fn increment_exchange(&self, provider: &str) {
        bump(&self.exchange, provider);
    }
}

fn bump(map: &DashMap<String, AtomicU64>, provider: &str) {
    if let Some(counter) = map.get(provider) {
        counter.fetch_add(1, Ordering::Relaxed);
        return;
    }
    map.entry(provider.to_string())
        .or_insert_with(|| AtomicU64::new(0))
        .fetch_add(1, Ordering::Relaxed);
}

fn read(map: &DashMap<String, AtomicU64>, provider: &str) -> u64 {
    map.get(provider)
        .map_or(0, |entry| entry.load(Ordering::Relaxed))
}

/// Install a Prometheus recorder as the global `metrics` recorder.
///
/// Pair with [`RecorderMetrics`]; render the handle from whatever endpoint
/// the embedding server exposes.
#[cfg(feature = "metrics")]
pub fn install_prometheus_recorder()
-> crate::Result<metrics_exporter_prometheus::PrometheusHandle> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| crate::Error::Internal(format!("Failed to install Prometheus recorder: {e}")))
}

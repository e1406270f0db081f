//! Prometheus metrics.
//!
//! - `circuitbreaker_storage_check_duration_seconds{storage}` (histogram)
//! - `circuitbreaker_storage_check_total{storage,result}` (counter)
//! - `circuitbreaker_circuit_open_total{storage}` (counter)

use crate::config::MetricsSettings;
use crate::models::CheckResult;
use crate::{Error, Result};
use metrics::{Unit, describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::thread;
use std::time::Duration;

/// Histogram of storage check durations.
pub const CHECK_DURATION_METRIC: &str = "circuitbreaker_storage_check_duration_seconds";

/// Counter of storage check outcomes.
pub const CHECK_RESULTS_METRIC: &str = "circuitbreaker_storage_check_total";

/// Counter of calls refused by an open circuit.
pub const CIRCUIT_OPEN_METRIC: &str = "circuitbreaker_circuit_open_total";

/// Bucket boundaries, in seconds, for [`CHECK_DURATION_METRIC`].
pub const CHECK_DURATION_BUCKETS: &[f64] =
    &[0.1, 0.15, 0.25, 0.33, 0.5, 1.0, 1.5, 2.5, 5.0, 10.0, 15.0];

/// Metrics configuration.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Whether the Prometheus exporter is installed.
    pub enabled: bool,
    /// Address for the exporter's HTTP listener.
    pub listen_addr: SocketAddr,
}

impl MetricsConfig {
    /// Builds metrics configuration from config settings with env overrides.
    #[must_use]
    pub fn from_settings(settings: Option<&MetricsSettings>) -> Self {
        let enabled = settings.and_then(|s| s.enabled).unwrap_or(false);
        let port = settings.and_then(|s| s.port).unwrap_or(9236);

        let mut config = Self {
            enabled,
            listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port),
        };

        if let Ok(value) = std::env::var("SHARDGUARD_METRICS_ENABLED") {
            config.enabled = crate::config::is_truthy(&value);
        }
        if let Some(port) = std::env::var("SHARDGUARD_METRICS_PORT")
            .ok()
            .and_then(|value| value.parse::<u16>().ok())
        {
            config.listen_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
        }

        config
    }
}

/// Storage check instrumentation handed to the checker.
///
/// Series are created on first use through the `metrics` registry, which
/// is safe under concurrent first use. Descriptions belong to the recorder
/// and are registered by [`install_prometheus`].
#[derive(Debug, Clone)]
pub struct CheckMetrics {
    _private: (),
}

impl Default for CheckMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl CheckMetrics {
    /// Creates the instrumentation.
    #[must_use]
    pub const fn new() -> Self {
        Self { _private: () }
    }

    /// Records how long a check of `storage` took.
    pub fn observe_duration(&self, storage: &str, elapsed: Duration) {
        metrics::histogram!(CHECK_DURATION_METRIC, "storage" => storage.to_string())
            .record(elapsed.as_secs_f64());
    }

    /// Counts a check outcome.
    pub fn record_result(&self, result: &CheckResult) {
        metrics::counter!(
            CHECK_RESULTS_METRIC,
            "storage" => result.storage.clone(),
            "result" => result.label()
        )
        .increment(1);
    }
}

/// Counts a call refused by an open circuit.
pub fn record_circuit_open(storage: &str) {
    metrics::counter!(CIRCUIT_OPEN_METRIC, "storage" => storage.to_string()).increment(1);
}

/// Registers metric descriptions with the current recorder.
///
/// Call after the recorder is installed; descriptions sent to the no-op
/// recorder are lost.
pub fn describe_metrics() {
    describe_histogram!(
        CHECK_DURATION_METRIC,
        Unit::Seconds,
        "Duration of isolated storage checks"
    );
    describe_counter!(CHECK_RESULTS_METRIC, "Storage checks by outcome");
    describe_counter!(
        CIRCUIT_OPEN_METRIC,
        "Storage calls refused by an open circuit"
    );
}

/// Returns a Prometheus builder with the check duration bucket layout.
pub fn prometheus_builder() -> Result<PrometheusBuilder> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(CHECK_DURATION_METRIC.to_string()),
            CHECK_DURATION_BUCKETS,
        )
        .map_err(|e| Error::OperationFailed {
            operation: "metrics_buckets".to_string(),
            cause: e.to_string(),
        })
}

/// Installs the Prometheus recorder and HTTP listener.
pub fn install_prometheus(config: &MetricsConfig) -> Result<Option<PrometheusHandle>> {
    if !config.enabled {
        return Ok(None);
    }

    let builder = prometheus_builder()?.with_http_listener(config.listen_addr);
    let handle = install_listener(builder)?;
    describe_metrics();
    Ok(Some(handle))
}

fn install_listener(builder: PrometheusBuilder) -> Result<PrometheusHandle> {
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        return install_with_runtime(builder, &handle);
    }
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| Error::OperationFailed {
            operation: "metrics_runtime_init".to_string(),
            cause: e.to_string(),
        })?;
    let handle = runtime.handle().clone();
    let prometheus = install_with_runtime(builder, &handle)?;
    thread::Builder::new()
        .name("metrics-exporter-prometheus-http".to_string())
        .spawn(move || runtime.block_on(std::future::pending::<()>()))
        .map_err(|e| Error::OperationFailed {
            operation: "metrics_runtime_thread".to_string(),
            cause: e.to_string(),
        })?;
    Ok(prometheus)
}

fn install_with_runtime(
    builder: PrometheusBuilder,
    runtime_handle: &tokio::runtime::Handle,
) -> Result<PrometheusHandle> {
    let (recorder, exporter) = {
        let _guard = runtime_handle.enter();
        builder.build().map_err(|e| Error::OperationFailed {
            operation: "metrics_exporter_build".to_string(),
            cause: e.to_string(),
        })?
    };
    let handle = recorder.handle();
    metrics::set_global_recorder(recorder).map_err(|e| Error::OperationFailed {
        operation: "metrics_recorder_install".to_string(),
        cause: e.to_string(),
    })?;
    runtime_handle.spawn(exporter);
    Ok(handle)
}

//! Observability: structured logging and Prometheus metrics.

mod logging;
pub mod metrics;

pub use logging::{LogFormat, LoggingConfig};
pub use metrics::{CheckMetrics, MetricsConfig};

use crate::config::ObservabilitySettings;
use crate::{Error, Result};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Full observability configuration.
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    /// Logging configuration.
    pub logging: LoggingConfig,
    /// Metrics configuration.
    pub metrics: MetricsConfig,
}

impl ObservabilityConfig {
    /// Builds the configuration from config file settings with env overrides.
    #[must_use]
    pub fn from_settings(settings: &ObservabilitySettings, verbose: bool) -> Self {
        Self {
            logging: LoggingConfig::from_settings(settings.logging.as_ref(), verbose),
            metrics: MetricsConfig::from_settings(settings.metrics.as_ref()),
        }
    }
}

/// Handle for observability runtime components.
#[derive(Debug)]
pub struct ObservabilityHandle {
    metrics_handle: Option<PrometheusHandle>,
}

impl ObservabilityHandle {
    /// Renders the current metrics in Prometheus text format, if installed.
    #[must_use]
    pub fn render_metrics(&self) -> Option<String> {
        self.metrics_handle.as_ref().map(PrometheusHandle::render)
    }
}

static OBSERVABILITY_INIT: OnceLock<()> = OnceLock::new();

/// Initializes logging and metrics for the process.
///
/// Logs go to stderr so command output on stdout stays machine readable.
///
/// # Errors
///
/// Returns an error if observability has already been initialized, the log
/// filter is invalid, or the metrics exporter fails to install.
pub fn init(config: ObservabilityConfig) -> Result<ObservabilityHandle> {
    if OBSERVABILITY_INIT.get().is_some() {
        return Err(Error::OperationFailed {
            operation: "observability_init".to_string(),
            cause: "observability already initialized".to_string(),
        });
    }

    let filter = EnvFilter::try_new(&config.logging.filter).map_err(|e| Error::InvalidInput(
        format!("invalid log filter '{}': {e}", config.logging.filter),
    ))?;

    let metrics_handle = metrics::install_prometheus(&config.metrics)?;

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stderr)
                        .with_current_span(true)
                        .with_target(true)
                        .with_thread_names(true),
                )
                .with(filter)
                .try_init()
                .map_err(init_error)?;
        },
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_target(true)
                        .with_thread_names(true),
                )
                .with(filter)
                .try_init()
                .map_err(init_error)?;
        },
    }

    OBSERVABILITY_INIT
        .set(())
        .map_err(|()| Error::OperationFailed {
            operation: "observability_init".to_string(),
            cause: "failed to mark observability initialized".to_string(),
        })?;

    Ok(ObservabilityHandle { metrics_handle })
}

fn init_error(err: impl std::fmt::Display) -> Error {
    Error::OperationFailed {
        operation: "observability_init".to_string(),
        cause: err.to_string(),
    }
}

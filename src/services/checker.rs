//! Leased storage health checks.
//!
//! Each check probes one storage path in an isolated child process and
//! records the outcome for this host. A lease keyed by (storage, host)
//! keeps two checkers from probing the same pair at once; the loser skips
//! the check and leaves the failure info untouched.

use crate::config::BreakerConfig;
use crate::models::{CheckResult, keys};
use crate::observability::CheckMetrics;
use crate::probe::IsolatedProbe;
use crate::storage::{FailureStore, LeaseGuard, LeaseProvider};
use crate::{Error, Result};
use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

/// Runs leased, process-isolated checks and records their outcomes.
pub struct StorageChecker {
    config: Arc<BreakerConfig>,
    store: Arc<dyn FailureStore>,
    lease: Arc<dyn LeaseProvider>,
    probe: IsolatedProbe,
    metrics: CheckMetrics,
}

impl StorageChecker {
    /// Creates a checker probing with the configured command.
    #[must_use]
    pub fn new(
        config: Arc<BreakerConfig>,
        store: Arc<dyn FailureStore>,
        lease: Arc<dyn LeaseProvider>,
    ) -> Self {
        let probe = IsolatedProbe::new(config.probe.clone());
        Self {
            config,
            store,
            lease,
            probe,
            metrics: CheckMetrics::new(),
        }
    }

    /// Replaces the prober.
    #[must_use]
    pub fn with_probe(mut self, probe: IsolatedProbe) -> Self {
        self.probe = probe;
        self
    }

    /// Replaces the metrics sink.
    #[must_use]
    pub fn with_metrics(mut self, metrics: CheckMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Checks one storage if no other checker holds its lease.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Misconfiguration`] if the storage is unknown or has no
    /// path, or an error from the lease or the store.
    pub fn check_with_lease(&self, storage: &str) -> Result<CheckResult> {
        let host = self.config.hostname.as_str();
        let path = self
            .config
            .storage(storage)
            .and_then(|entry| entry.path.as_deref())
            .ok_or_else(|| Error::Misconfiguration {
                storage: storage.to_string(),
                reason: "no path to check".to_string(),
            })?;
        let settings = self.config.settings_for(storage);
        let timeout = settings.storage_timeout();

        let lease_name = keys::lease_name(storage, host);
        let Some(guard) = LeaseGuard::obtain(self.lease.as_ref(), lease_name, timeout)? else {
            tracing::info!(
                storage,
                host,
                "Skipping storage check, another checker holds the lease"
            );
            let result = CheckResult::skipped(storage);
            self.metrics.record_result(&result);
            return Ok(result);
        };

        let started = Instant::now();
        let available = self.probe.available(path, timeout, settings.access_retries);
        let elapsed = started.elapsed();
        self.metrics.observe_duration(storage, elapsed);

        // The lease expires on its own, so a failed release only delays the next check.
        if let Err(e) = guard.release() {
            tracing::warn!(storage, host, error = %e, "Failed to release storage check lease");
        }

        let reset_time = settings.failure_reset_time();
        if available {
            self.store.record_success(storage, host, reset_time)?;
            tracing::debug!(
                storage,
                host,
                elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                "Storage is accessible"
            );
        } else {
            self.store.record_failure(storage, host, reset_time)?;
            tracing::warn!(
                storage,
                host,
                path = %path.display(),
                elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                "Storage is not accessible"
            );
        }

        let result = CheckResult::checked(storage, available);
        self.metrics.record_result(&result);
        Ok(result)
    }

    /// Checks every configured storage concurrently, one thread each.
    ///
    /// All checks finish before this returns. Results follow the configured
    /// storage order.
    ///
    /// # Errors
    ///
    /// Returns the first error of any storage's check.
    pub fn check_all(&self) -> Result<Vec<CheckResult>> {
        let names: Vec<&str> = self.config.storage_names().collect();

        let outcomes: Vec<Result<CheckResult>> = thread::scope(|scope| {
            let handles: Vec<_> = names
                .iter()
                .map(|&name| (name, scope.spawn(move || self.check_with_lease(name))))
                .collect();

            handles
                .into_iter()
                .map(|(name, handle)| {
                    handle.join().unwrap_or_else(|_| {
                        Err(Error::OperationFailed {
                            operation: "check_storage".to_string(),
                            cause: format!("check of storage '{name}' panicked"),
                        })
                    })
                })
                .collect()
        });

        outcomes.into_iter().collect()
    }
}

impl fmt::Debug for StorageChecker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageChecker")
            .field("hostname", &self.config.hostname)
            .field("store", &self.store.backend_name())
            .field("probe", &self.probe)
            .finish_non_exhaustive()
    }
}

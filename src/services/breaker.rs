//! Circuit breakers consulted before storage operations.
//!
//! A breaker is bound to one (storage, host) pair and reads that pair's
//! failure info at most once. Call sites obtain breakers through a
//! [`BreakerCache`] owned by the request or worker, so a request sees one
//! consistent view of each storage.
//!
//! ```text
//! perform(work)
//!   ├─ enforcement disabled ──────────────► work()
//!   ├─ failure_count > threshold ─────────► Err(CircuitOpen)
//!   └─ otherwise ─────────────────────────► work()
//! ```

use crate::config::{BreakerConfig, CircuitBreakerSettings, FeatureFlags};
use crate::models::FailureInfo;
use crate::observability::metrics::record_circuit_open;
use crate::storage::FailureStore;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// Breaker for a configured storage.
pub struct CircuitBreaker {
    storage: String,
    hostname: String,
    settings: CircuitBreakerSettings,
    features: FeatureFlags,
    store: Arc<dyn FailureStore>,
    info: OnceLock<FailureInfo>,
}

impl CircuitBreaker {
    /// Creates a breaker for `storage` as seen from `hostname`.
    #[must_use]
    pub fn new(
        storage: impl Into<String>,
        hostname: impl Into<String>,
        settings: CircuitBreakerSettings,
        features: FeatureFlags,
        store: Arc<dyn FailureStore>,
    ) -> Self {
        Self {
            storage: storage.into(),
            hostname: hostname.into(),
            settings,
            features,
            store,
            info: OnceLock::new(),
        }
    }

    /// Returns the storage name.
    #[must_use]
    pub fn storage(&self) -> &str {
        &self.storage
    }

    /// Returns the host name.
    #[must_use]
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Returns the failure info, loading it from the store on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn failure_info(&self) -> Result<FailureInfo> {
        if let Some(info) = self.info.get() {
            return Ok(*info);
        }
        let loaded = self.store.load(&self.storage, &self.hostname)?;
        Ok(*self.info.get_or_init(|| loaded))
    }

    /// Returns `true` if the failure count exceeds the threshold.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn circuit_broken(&self) -> Result<bool> {
        let info = self.failure_info()?;
        if info.no_failures() {
            return Ok(false);
        }
        Ok(info.failure_count > self.settings.failure_count_threshold)
    }

    /// Returns `true` if the host recently failed more than the backoff threshold.
    ///
    /// This is diagnostic only and never blocks [`Self::perform`].
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn backing_off(&self) -> Result<bool> {
        self.backing_off_at(Utc::now())
    }

    /// Same as [`Self::backing_off`], evaluated at `now`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn backing_off_at(&self, now: DateTime<Utc>) -> Result<bool> {
        let info = self.failure_info()?;
        if info.failure_count <= self.settings.backoff_threshold {
            return Ok(false);
        }
        let Some(last_failure) = info.last_failure else {
            return Ok(false);
        };
        // A last failure in the future (clock skew) counts as recent.
        let recent = match now.signed_duration_since(last_failure).to_std() {
            Ok(elapsed) => elapsed < self.settings.failure_wait_time(),
            Err(_) => true,
        };
        Ok(recent)
    }

    /// Returns the threshold above which the circuit opens.
    #[must_use]
    pub const fn failure_count_threshold(&self) -> u64 {
        self.settings.failure_count_threshold
    }

    /// Returns the delay suggested to callers refused by an open circuit.
    #[must_use]
    pub const fn retry_after(&self) -> Duration {
        self.settings.failure_reset_time()
    }

    /// Runs `work` unless the circuit is open.
    ///
    /// With enforcement disabled `work` always runs and the store is not
    /// read. The result of `work` is returned unmodified.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CircuitOpen`] without running `work` if the circuit
    /// is open, a store error if the failure info cannot be read, or the
    /// error of `work` itself.
    pub fn perform<T, E, F>(&self, work: F) -> std::result::Result<T, E>
    where
        F: FnOnce() -> std::result::Result<T, E>,
        E: From<Error>,
    {
        if !self.features.enforcement_enabled() {
            return work();
        }

        if self.circuit_broken()? {
            record_circuit_open(&self.storage);
            tracing::warn!(
                storage = %self.storage,
                host = %self.hostname,
                threshold = self.settings.failure_count_threshold,
                "Circuit open, refusing storage access"
            );
            return Err(Error::CircuitOpen {
                storage: self.storage.clone(),
                retry_after: self.retry_after(),
            }
            .into());
        }

        work()
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("storage", &self.storage)
            .field("hostname", &self.hostname)
            .field("store", &self.store.backend_name())
            .field("info", &self.info.get())
            .finish_non_exhaustive()
    }
}

/// Breaker for a storage that is unknown or has no path.
///
/// Every operation fails with the captured [`Error::Misconfiguration`].
#[derive(Debug, Clone)]
pub struct NullCircuitBreaker {
    storage: String,
    hostname: String,
    reason: String,
    settings: CircuitBreakerSettings,
}

impl NullCircuitBreaker {
    /// Creates a breaker that always reports `reason`.
    #[must_use]
    pub fn new(
        storage: impl Into<String>,
        hostname: impl Into<String>,
        reason: impl Into<String>,
        settings: CircuitBreakerSettings,
    ) -> Self {
        Self {
            storage: storage.into(),
            hostname: hostname.into(),
            reason: reason.into(),
            settings,
        }
    }

    /// Returns the storage name.
    #[must_use]
    pub fn storage(&self) -> &str {
        &self.storage
    }

    /// Returns the host name.
    #[must_use]
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Returns why the storage is unusable.
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Returns the configuration error raised by every operation.
    #[must_use]
    pub fn error(&self) -> Error {
        Error::Misconfiguration {
            storage: self.storage.clone(),
            reason: self.reason.clone(),
        }
    }

    /// Failure info that reads as broken: one failure past the threshold, now.
    #[must_use]
    pub fn failure_info(&self) -> FailureInfo {
        let now = Utc::now();
        FailureInfo {
            first_failure: Some(now),
            last_failure: Some(now),
            failure_count: self.settings.failure_count_threshold.saturating_add(1),
        }
    }

    /// Always `true`.
    #[must_use]
    pub const fn circuit_broken(&self) -> bool {
        true
    }

    /// Returns the threshold above which the circuit opens.
    #[must_use]
    pub const fn failure_count_threshold(&self) -> u64 {
        self.settings.failure_count_threshold
    }

    /// Returns the configured failure reset time.
    #[must_use]
    pub const fn retry_after(&self) -> Duration {
        self.settings.failure_reset_time()
    }

    /// Never runs `work`.
    ///
    /// # Errors
    ///
    /// Always returns [`Error::Misconfiguration`].
    pub fn perform<T, E, F>(&self, _work: F) -> std::result::Result<T, E>
    where
        F: FnOnce() -> std::result::Result<T, E>,
        E: From<Error>,
    {
        tracing::error!(
            storage = %self.storage,
            host = %self.hostname,
            reason = %self.reason,
            "Refusing access to misconfigured storage"
        );
        Err(self.error().into())
    }
}

/// A breaker resolved for a storage name.
#[derive(Debug)]
pub enum Breaker {
    /// The storage is configured.
    Real(CircuitBreaker),
    /// The storage is unknown or has no path.
    Null(NullCircuitBreaker),
}

impl Breaker {
    /// Builds the breaker for `storage` as seen from the configured host.
    #[must_use]
    pub fn build(config: &BreakerConfig, store: Arc<dyn FailureStore>, storage: &str) -> Self {
        Self::for_host(config, store, storage, &config.hostname)
    }

    /// Builds the breaker for `storage` as seen from `hostname`.
    #[must_use]
    pub fn for_host(
        config: &BreakerConfig,
        store: Arc<dyn FailureStore>,
        storage: &str,
        hostname: &str,
    ) -> Self {
        let settings = config.settings_for(storage);
        let reason = match config.storage(storage) {
            None => "storage is not configured",
            Some(entry) if entry.path.is_none() => "storage has no path configured",
            Some(_) => {
                return Self::Real(CircuitBreaker::new(
                    storage,
                    hostname,
                    settings,
                    config.features.clone(),
                    store,
                ));
            },
        };
        Self::Null(NullCircuitBreaker::new(storage, hostname, reason, settings))
    }

    /// Returns the storage name.
    #[must_use]
    pub fn storage(&self) -> &str {
        match self {
            Self::Real(breaker) => breaker.storage(),
            Self::Null(breaker) => breaker.storage(),
        }
    }

    /// Returns the host name.
    #[must_use]
    pub fn hostname(&self) -> &str {
        match self {
            Self::Real(breaker) => breaker.hostname(),
            Self::Null(breaker) => breaker.hostname(),
        }
    }

    /// Returns `true` for a misconfigured storage.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null(_))
    }

    /// Returns the failure info behind the breaker's decision.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn failure_info(&self) -> Result<FailureInfo> {
        match self {
            Self::Real(breaker) => breaker.failure_info(),
            Self::Null(breaker) => Ok(breaker.failure_info()),
        }
    }

    /// Returns `true` if the breaker refuses work.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn circuit_broken(&self) -> Result<bool> {
        match self {
            Self::Real(breaker) => breaker.circuit_broken(),
            Self::Null(breaker) => Ok(breaker.circuit_broken()),
        }
    }

    /// Returns `true` if the host is backing off from the storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn backing_off(&self) -> Result<bool> {
        match self {
            Self::Real(breaker) => breaker.backing_off(),
            Self::Null(_) => Ok(true),
        }
    }

    /// Returns the threshold above which the circuit opens.
    #[must_use]
    pub const fn failure_count_threshold(&self) -> u64 {
        match self {
            Self::Real(breaker) => breaker.failure_count_threshold(),
            Self::Null(breaker) => breaker.failure_count_threshold(),
        }
    }

    /// Returns the delay suggested to callers refused by an open circuit.
    #[must_use]
    pub const fn retry_after(&self) -> Duration {
        match self {
            Self::Real(breaker) => breaker.retry_after(),
            Self::Null(breaker) => breaker.retry_after(),
        }
    }

    /// Runs `work` if the breaker permits it.
    ///
    /// # Errors
    ///
    /// See [`CircuitBreaker::perform`] and [`NullCircuitBreaker::perform`].
    pub fn perform<T, E, F>(&self, work: F) -> std::result::Result<T, E>
    where
        F: FnOnce() -> std::result::Result<T, E>,
        E: From<Error>,
    {
        match self {
            Self::Real(breaker) => breaker.perform(work),
            Self::Null(breaker) => breaker.perform(work),
        }
    }
}

/// Request-scoped map from storage name to breaker.
///
/// Create one per request or job and drop it at the end, so failure info is
/// read at most once per storage per request.
pub struct BreakerCache {
    config: Arc<BreakerConfig>,
    store: Arc<dyn FailureStore>,
    breakers: HashMap<String, Arc<Breaker>>,
}

impl BreakerCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new(config: Arc<BreakerConfig>, store: Arc<dyn FailureStore>) -> Self {
        Self {
            config,
            store,
            breakers: HashMap::new(),
        }
    }

    /// Returns the breaker for `storage`, building it on first use.
    pub fn for_storage(&mut self, storage: &str) -> Arc<Breaker> {
        if let Some(breaker) = self.breakers.get(storage) {
            return Arc::clone(breaker);
        }
        let breaker = Arc::new(Breaker::build(
            &self.config,
            Arc::clone(&self.store),
            storage,
        ));
        self.breakers
            .insert(storage.to_string(), Arc::clone(&breaker));
        breaker
    }

    /// Wipes all failure info from the store and clears the cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be wiped. The cache is cleared
    /// either way.
    pub fn reset_all(&mut self) -> Result<()> {
        self.breakers.clear();
        self.store.reset_all()?;
        tracing::info!(backend = self.store.backend_name(), "Reset all failure info");
        Ok(())
    }

    /// Returns the number of cached breakers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    /// Returns `true` if no breaker has been built yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}

impl fmt::Debug for BreakerCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BreakerCache")
            .field("hostname", &self.config.hostname)
            .field("store", &self.store.backend_name())
            .field("breakers", &self.breakers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::storage::MemoryFailureStore;
    use chrono::TimeDelta;

    const HOST: &str = "web-01";

    fn settings() -> CircuitBreakerSettings {
        CircuitBreakerSettings::default()
            .with_failure_count_threshold(5)
            .with_backoff_threshold(2)
            .with_failure_wait_time_secs(30)
    }

    fn config(features: FeatureFlags) -> Arc<BreakerConfig> {
        Arc::new(
            BreakerConfig::new()
                .with_hostname(HOST)
                .with_storage("default", "/srv/git/default")
                .with_storage_config("pathless", StorageConfig::default())
                .with_settings(settings())
                .with_features(features),
        )
    }

    fn fail(store: &MemoryFailureStore, storage: &str, times: usize) {
        for _ in 0..times {
            store
                .record_failure(storage, HOST, Duration::from_secs(1800))
                .unwrap();
        }
    }

    fn run(breaker: &Breaker) -> Result<&'static str> {
        breaker.perform(|| Ok("done"))
    }

    #[test]
    fn test_threshold_is_strict() {
        let store = Arc::new(MemoryFailureStore::new());
        let config = config(FeatureFlags::enforcing());

        fail(&store, "default", 5);
        let at_threshold = Breaker::build(&config, store.clone(), "default");
        assert!(!at_threshold.circuit_broken().unwrap());
        assert_eq!(run(&at_threshold).unwrap(), "done");

        fail(&store, "default", 1);
        let past_threshold = Breaker::build(&config, store, "default");
        assert!(past_threshold.circuit_broken().unwrap());
        let err = run(&past_threshold).unwrap_err();
        assert!(err.is_circuit_open());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(1800)));
    }

    #[test]
    fn test_open_circuit_does_not_run_work() {
        let store = Arc::new(MemoryFailureStore::new());
        fail(&store, "default", 6);
        let breaker = Breaker::build(&config(FeatureFlags::enforcing()), store, "default");

        let mut ran = false;
        let result: Result<()> = breaker.perform(|| {
            ran = true;
            Ok(())
        });

        assert!(result.is_err());
        assert!(!ran);
    }

    #[test]
    fn test_work_error_is_returned_unmodified() {
        let store = Arc::new(MemoryFailureStore::new());
        let breaker = Breaker::build(&config(FeatureFlags::enforcing()), store, "default");

        let result: Result<()> = breaker.perform(|| Err(Error::InvalidInput("bad ref".into())));

        assert!(matches!(result, Err(Error::InvalidInput(msg)) if msg == "bad ref"));
    }

    #[test]
    fn test_disabled_breaker_passes_through() {
        let store = Arc::new(MemoryFailureStore::new());
        fail(&store, "default", 50);
        let breaker = Breaker::build(&config(FeatureFlags::none()), store, "default");

        assert!(breaker.circuit_broken().unwrap());
        assert_eq!(run(&breaker).unwrap(), "done");
    }

    #[test]
    fn test_host_override_enables_enforcement() {
        let store = Arc::new(MemoryFailureStore::new());
        fail(&store, "default", 6);
        let features = FeatureFlags {
            circuit_breaker: false,
            host_override: true,
        };
        let breaker = Breaker::build(&config(features), store, "default");

        assert!(run(&breaker).unwrap_err().is_circuit_open());
    }

    #[test]
    fn test_unknown_storage_gets_null_breaker() {
        let store = Arc::new(MemoryFailureStore::new());
        let breaker = Breaker::build(&config(FeatureFlags::none()), store, "missing");

        assert!(breaker.is_null());
        assert!(breaker.circuit_broken().unwrap());
        let err = run(&breaker).unwrap_err();
        assert!(
            matches!(err, Error::Misconfiguration { ref storage, .. } if storage == "missing")
        );
    }

    #[test]
    fn test_pathless_storage_gets_null_breaker() {
        let store = Arc::new(MemoryFailureStore::new());
        let breaker = Breaker::build(&config(FeatureFlags::enforcing()), store, "pathless");

        let Breaker::Null(null) = &breaker else {
            panic!("expected a null breaker");
        };
        assert_eq!(null.reason(), "storage has no path configured");

        let info = breaker.failure_info().unwrap();
        assert_eq!(info.failure_count, 6);
        assert!(info.last_failure.is_some());
        assert_eq!(breaker.failure_count_threshold(), 5);
    }

    #[test]
    fn test_failure_info_is_loaded_once() {
        let store = Arc::new(MemoryFailureStore::new());
        let breaker = Breaker::build(&config(FeatureFlags::enforcing()), store.clone(), "default");

        assert!(!breaker.circuit_broken().unwrap());
        fail(&store, "default", 10);
        assert!(!breaker.circuit_broken().unwrap());
        assert_eq!(breaker.failure_info().unwrap().failure_count, 0);
    }

    #[test]
    fn test_backing_off_window() {
        let store = Arc::new(MemoryFailureStore::new());
        fail(&store, "default", 3);
        let breaker = CircuitBreaker::new(
            "default",
            HOST,
            settings(),
            FeatureFlags::enforcing(),
            store,
        );
        let last = breaker.failure_info().unwrap().last_failure.unwrap();

        assert!(breaker.backing_off_at(last + TimeDelta::seconds(10)).unwrap());
        assert!(!breaker.backing_off_at(last + TimeDelta::seconds(31)).unwrap());
        assert!(!breaker.circuit_broken().unwrap());
    }

    #[test]
    fn test_backing_off_needs_enough_failures() {
        let store = Arc::new(MemoryFailureStore::new());
        fail(&store, "default", 2);
        let breaker = CircuitBreaker::new(
            "default",
            HOST,
            settings(),
            FeatureFlags::enforcing(),
            store,
        );
        assert!(!breaker.backing_off().unwrap());
    }

    #[test]
    fn test_cache_reuses_breakers() {
        let store = Arc::new(MemoryFailureStore::new());
        let mut cache = BreakerCache::new(config(FeatureFlags::enforcing()), store);

        let first = cache.for_storage("default");
        let second = cache.for_storage("default");
        assert!(Arc::ptr_eq(&first, &second));

        cache.for_storage("missing");
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_cache_reset_all_clears_store_and_breakers() {
        let store = Arc::new(MemoryFailureStore::new());
        fail(&store, "default", 6);
        let mut cache = BreakerCache::new(config(FeatureFlags::enforcing()), store.clone());

        let tripped = cache.for_storage("default");
        assert!(tripped.circuit_broken().unwrap());

        cache.reset_all().unwrap();

        assert!(cache.is_empty());
        assert!(store.is_empty());
        let fresh = cache.for_storage("default");
        assert!(!Arc::ptr_eq(&tripped, &fresh));
        assert!(!fresh.circuit_broken().unwrap());
    }
}

//! Fleet-wide health view over the failure info store.

use crate::config::BreakerConfig;
use crate::models::keys;
use crate::services::Breaker;
use crate::storage::FailureStore;
use crate::Result;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Failure count recorded under one key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostFailure {
    /// Failure info key, `storage_accessible:<storage>:<host>`.
    pub key: String,
    /// Consecutive failures seen by that host.
    pub failure_count: u64,
}

/// Health of one storage across all hosts that reported on it.
#[derive(Clone, Serialize)]
pub struct Health {
    /// Storage name.
    pub storage_name: String,
    /// One entry per live key of the storage.
    pub info: Vec<HostFailure>,
    #[serde(skip)]
    config: Arc<BreakerConfig>,
    #[serde(skip)]
    store: Arc<dyn FailureStore>,
}

impl Health {
    /// Returns `true` if any host has a failure recorded.
    #[must_use]
    pub fn failing(&self) -> bool {
        self.info.iter().any(|entry| entry.failure_count > 0)
    }

    /// Returns the entries with a failure recorded.
    pub fn failing_info(&self) -> impl Iterator<Item = &HostFailure> {
        self.info.iter().filter(|entry| entry.failure_count > 0)
    }

    /// Returns the hosts with a failure recorded.
    #[must_use]
    pub fn failing_on_hosts(&self) -> Vec<&str> {
        self.failing_info()
            .filter_map(|entry| keys::host_from_key(&self.storage_name, &entry.key))
            .collect()
    }

    /// Returns a breaker for each failing host, as that host would see it.
    #[must_use]
    pub fn failing_circuit_breakers(&self) -> Vec<Breaker> {
        self.failing_on_hosts()
            .into_iter()
            .map(|host| {
                Breaker::for_host(
                    &self.config,
                    Arc::clone(&self.store),
                    &self.storage_name,
                    host,
                )
            })
            .collect()
    }

    /// Returns the sum of failure counts over failing hosts.
    #[must_use]
    pub fn total_failures(&self) -> u64 {
        self.failing_info()
            .map(|entry| entry.failure_count)
            .fold(0, u64::saturating_add)
    }
}

impl fmt::Debug for Health {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Health")
            .field("storage_name", &self.storage_name)
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

/// Builds [`Health`] views for the configured storages.
pub struct HealthAggregator {
    config: Arc<BreakerConfig>,
    store: Arc<dyn FailureStore>,
}

impl HealthAggregator {
    /// Creates an aggregator over `store`.
    #[must_use]
    pub fn new(config: Arc<BreakerConfig>, store: Arc<dyn FailureStore>) -> Self {
        Self { config, store }
    }

    /// Returns the health of one storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn for_storage(&self, storage: &str) -> Result<Health> {
        let keys = self.store.enumerate_keys_with_prefix(storage)?;
        let counts = self.store.failure_counts(&keys)?;
        let info = keys
            .into_iter()
            .zip(counts)
            .map(|(key, failure_count)| HostFailure { key, failure_count })
            .collect();

        Ok(Health {
            storage_name: storage.to_string(),
            info,
            config: Arc::clone(&self.config),
            store: Arc::clone(&self.store),
        })
    }

    /// Returns the health of every configured storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn for_all_storages(&self) -> Result<Vec<Health>> {
        self.config
            .storage_names()
            .map(|storage| self.for_storage(storage))
            .collect()
    }

    /// Returns the health of storages with at least one failing host.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn for_failing_storages(&self) -> Result<Vec<Health>> {
        let mut all = self.for_all_storages()?;
        all.retain(Health::failing);
        Ok(all)
    }
}

impl fmt::Debug for HealthAggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HealthAggregator")
            .field("storages", &self.config.storages.len())
            .field("store", &self.store.backend_name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CircuitBreakerSettings, FeatureFlags};
    use crate::storage::MemoryFailureStore;
    use std::time::Duration;

    const RESET: Duration = Duration::from_secs(1800);

    fn aggregator() -> (Arc<MemoryFailureStore>, HealthAggregator) {
        let config = BreakerConfig::new()
            .with_hostname("a")
            .with_storage("default", "/srv/git/default")
            .with_storage("nfs-02", "/mnt/nfs-02")
            .with_settings(
                CircuitBreakerSettings::default()
                    .with_failure_count_threshold(2)
                    .with_backoff_threshold(1),
            )
            .with_features(FeatureFlags::enforcing());
        let store = Arc::new(MemoryFailureStore::new());
        let aggregator = HealthAggregator::new(Arc::new(config), store.clone());
        (store, aggregator)
    }

    fn fail(store: &MemoryFailureStore, storage: &str, host: &str, times: usize) {
        for _ in 0..times {
            store.record_failure(storage, host, RESET).unwrap();
        }
    }

    #[test]
    fn test_failing_hosts_and_total() {
        let (store, aggregator) = aggregator();
        fail(&store, "default", "a", 3);
        store.record_success("default", "b", RESET).unwrap();

        let health = aggregator.for_storage("default").unwrap();

        assert_eq!(health.info.len(), 2);
        assert!(health.failing());
        assert_eq!(health.failing_on_hosts(), vec!["a"]);
        assert_eq!(health.total_failures(), 3);
        assert_eq!(health.failing_info().count(), 1);
    }

    #[test]
    fn test_healthy_storage_is_not_failing() {
        let (store, aggregator) = aggregator();
        store.record_success("default", "a", RESET).unwrap();

        let health = aggregator.for_storage("default").unwrap();

        assert!(!health.failing());
        assert!(health.failing_on_hosts().is_empty());
        assert_eq!(health.total_failures(), 0);
    }

    #[test]
    fn test_for_failing_storages_filters() {
        let (store, aggregator) = aggregator();
        fail(&store, "nfs-02", "a", 1);
        store.record_success("default", "a", RESET).unwrap();

        let all = aggregator.for_all_storages().unwrap();
        let failing = aggregator.for_failing_storages().unwrap();

        assert_eq!(all.len(), 2);
        assert_eq!(failing.len(), 1);
        assert_eq!(failing[0].storage_name, "nfs-02");
    }

    #[test]
    fn test_failing_circuit_breakers_per_host() {
        let (store, aggregator) = aggregator();
        fail(&store, "default", "a", 3);
        fail(&store, "default", "b", 1);

        let health = aggregator.for_storage("default").unwrap();
        let breakers = health.failing_circuit_breakers();

        assert_eq!(breakers.len(), 2);
        assert_eq!(breakers[0].hostname(), "a");
        assert!(breakers[0].circuit_broken().unwrap());
        assert_eq!(breakers[1].hostname(), "b");
        assert!(!breakers[1].circuit_broken().unwrap());
    }

    #[test]
    fn test_health_serializes_without_handles() {
        let (store, aggregator) = aggregator();
        fail(&store, "default", "a", 2);

        let health = aggregator.for_storage("default").unwrap();
        let json = serde_json::to_value(&health).unwrap();

        assert_eq!(json["storage_name"], "default");
        assert_eq!(json["info"][0]["key"], "storage_accessible:default:a");
        assert_eq!(json["info"][0]["failure_count"], 2);
        assert!(json.get("store").is_none());
    }
}

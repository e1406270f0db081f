//! End-to-end tests for the check, breaker and health flow.
//!
//! Wires the checker, the breaker cache and the health aggregator to the
//! in-process store and lease, with real child-process probes.

// Integration tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]
#![cfg(unix)]

use shardguard::config::CircuitBreakerSettings;
use shardguard::storage::{LeaseProvider, MemoryLease};
use shardguard::{
    BreakerCache, BreakerConfig, Error, FailureStore, FeatureFlags, HealthAggregator,
    MemoryFailureStore, ProbeCommand, StorageChecker,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use test_case::test_case;

const HOST: &str = "web-01";

struct Fleet {
    dir: TempDir,
    config: Arc<BreakerConfig>,
    store: Arc<MemoryFailureStore>,
    lease: Arc<MemoryLease>,
}

impl Fleet {
    fn new(threshold: u64, features: FeatureFlags) -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("default")).unwrap();
        let config = BreakerConfig::new()
            .with_hostname(HOST)
            .with_storage("default", dir.path().join("default"))
            .with_settings(
                CircuitBreakerSettings::default()
                    .with_failure_count_threshold(threshold)
                    .with_backoff_threshold(threshold / 2)
                    .with_storage_timeout_ms(2_000)
                    .with_access_retries(1),
            )
            .with_features(features)
            .with_probe(ProbeCommand::new("test").with_args(["-d"]));
        Self {
            dir,
            config: Arc::new(config),
            store: Arc::new(MemoryFailureStore::new()),
            lease: Arc::new(MemoryLease::new()),
        }
    }

    fn storage_path(&self) -> std::path::PathBuf {
        self.dir.path().join("default")
    }

    fn checker(&self) -> StorageChecker {
        StorageChecker::new(
            Arc::clone(&self.config),
            self.store.clone(),
            self.lease.clone(),
        )
    }

    fn breakers(&self) -> BreakerCache {
        BreakerCache::new(Arc::clone(&self.config), self.store.clone())
    }

    fn take_offline(&self) {
        std::fs::remove_dir(self.storage_path()).unwrap();
    }

    fn bring_online(&self) {
        std::fs::create_dir(self.storage_path()).unwrap();
    }
}

fn open_repository(path: &Path) -> Result<usize, Error> {
    Ok(path.as_os_str().len())
}

#[test]
fn test_failures_open_circuit_and_success_closes_it() {
    let fleet = Fleet::new(5, FeatureFlags::enforcing());
    let checker = fleet.checker();
    fleet.take_offline();

    for _ in 0..6 {
        let result = checker.check_with_lease("default").unwrap();
        assert_eq!(result.success, Some(false));
    }

    let mut breakers = fleet.breakers();
    let err = breakers
        .for_storage("default")
        .perform(|| open_repository(&fleet.storage_path()))
        .unwrap_err();
    assert!(err.is_circuit_open());
    assert_eq!(err.retry_after(), Some(Duration::from_secs(1800)));

    fleet.bring_online();
    let result = checker.check_with_lease("default").unwrap();
    assert_eq!(result.success, Some(true));

    let mut breakers = fleet.breakers();
    assert!(
        breakers
            .for_storage("default")
            .perform(|| open_repository(&fleet.storage_path()))
            .is_ok()
    );
}

#[test_case(4, false ; "below threshold")]
#[test_case(5, false ; "at threshold")]
#[test_case(6, true ; "past threshold")]
fn test_threshold_boundary(failures: usize, broken: bool) {
    let fleet = Fleet::new(5, FeatureFlags::enforcing());
    for _ in 0..failures {
        fleet
            .store
            .record_failure("default", HOST, Duration::from_secs(60))
            .unwrap();
    }

    let breaker = fleet.breakers().for_storage("default");

    assert_eq!(breaker.circuit_broken().unwrap(), broken);
    assert_eq!(breaker.perform(|| Ok::<_, Error>(())).is_err(), broken);
}

#[test]
fn test_skipped_check_leaves_failure_info_untouched() {
    let fleet = Fleet::new(5, FeatureFlags::enforcing());
    let lease_name = shardguard::models::keys::lease_name("default", HOST);
    let token = fleet
        .lease
        .try_obtain(&lease_name, Duration::from_secs(30))
        .unwrap()
        .unwrap();

    let result = fleet.checker().check_with_lease("default").unwrap();
    assert!(result.is_skipped());
    assert!(fleet.store.load("default", HOST).unwrap().no_failures());

    fleet.lease.cancel(&lease_name, &token).unwrap();
    let result = fleet.checker().check_with_lease("default").unwrap();
    assert_eq!(result.success, Some(true));
}

#[test]
fn test_health_groups_hosts() {
    let fleet = Fleet::new(5, FeatureFlags::enforcing());
    let reset = Duration::from_secs(60);
    for _ in 0..3 {
        fleet.store.record_failure("default", "a", reset).unwrap();
    }
    fleet.store.record_success("default", "b", reset).unwrap();

    let aggregator = HealthAggregator::new(Arc::clone(&fleet.config), fleet.store.clone());
    let failing = aggregator.for_failing_storages().unwrap();

    assert_eq!(failing.len(), 1);
    assert_eq!(failing[0].failing_on_hosts(), vec!["a"]);
    assert_eq!(failing[0].total_failures(), 3);
}

#[test]
fn test_reset_closes_all_circuits() {
    let fleet = Fleet::new(2, FeatureFlags::enforcing());
    for _ in 0..3 {
        fleet
            .store
            .record_failure("default", HOST, Duration::from_secs(60))
            .unwrap();
    }
    let mut breakers = fleet.breakers();
    assert!(breakers.for_storage("default").circuit_broken().unwrap());

    breakers.reset_all().unwrap();

    assert!(!breakers.for_storage("default").circuit_broken().unwrap());
    let aggregator = HealthAggregator::new(Arc::clone(&fleet.config), fleet.store.clone());
    assert!(aggregator.for_failing_storages().unwrap().is_empty());
}

#[test]
fn test_disabled_enforcement_runs_work_for_broken_storage() {
    let fleet = Fleet::new(2, FeatureFlags::none());
    for _ in 0..10 {
        fleet
            .store
            .record_failure("default", HOST, Duration::from_secs(60))
            .unwrap();
    }

    let value = fleet
        .breakers()
        .for_storage("default")
        .perform(|| Ok::<_, Error>(42))
        .unwrap();

    assert_eq!(value, 42);
}

#[test]
fn test_unconfigured_storage_is_refused() {
    let fleet = Fleet::new(5, FeatureFlags::none());
    let breaker = fleet.breakers().for_storage("nfs-99");

    let err = breaker.perform(|| Ok::<_, Error>(())).unwrap_err();

    assert!(matches!(err, Error::Misconfiguration { .. }));
    assert_eq!(breaker.failure_info().unwrap().failure_count, 6);
}

//! Configuration management.
//!
//! Configuration is resolved in three layers: built-in defaults, an optional
//! TOML file, then environment variable overrides. The result is an explicit
//! [`BreakerConfig`] value handed to the breaker, checker and aggregator
//! constructors.
//!
//! ```toml
//! hostname = "web-01"
//! redis_url = "redis://localhost:6379"
//!
//! [circuit_breaker]
//! enabled = true
//! failure_count_threshold = 10
//! failure_reset_time = 1800
//!
//! [storages.default]
//! path = "/var/opt/git/repositories"
//!
//! [storages.nfs-02]
//! path = "/mnt/nfs-02/repositories"
//! failure_count_threshold = 3
//! ```

mod features;

pub use features::{FeatureFlags, HOST_OVERRIDE_ENV};
pub(crate) use features::is_truthy;

use crate::probe::ProbeCommand;
use crate::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Tunable thresholds shared by the breaker and the checker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerSettings {
    /// Failures tolerated before the circuit opens (strictly greater trips it).
    pub failure_count_threshold: u64,
    /// Window after the last failure during which a host is backing off.
    pub failure_wait_time_secs: u64,
    /// Inactivity after which failure info expires.
    pub failure_reset_time_secs: u64,
    /// Wall-clock budget for one storage check, split across retries.
    pub storage_timeout_ms: u64,
    /// Probe attempts per check.
    pub access_retries: u32,
    /// Failures after which a host is reported as backing off.
    pub backoff_threshold: u64,
    /// Delay between checks when running the watch loop.
    pub check_interval_secs: u64,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_count_threshold: 10,
            failure_wait_time_secs: 30,
            failure_reset_time_secs: 1800,
            storage_timeout_ms: 15_000,
            access_retries: 4,
            backoff_threshold: 5,
            check_interval_secs: 1,
        }
    }
}

impl CircuitBreakerSettings {
    /// Loads settings from environment variables on top of the defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Applies environment variable overrides.
    ///
    /// | Variable | Setting |
    /// |----------|---------|
    /// | `SHARDGUARD_FAILURE_COUNT_THRESHOLD` | `failure_count_threshold` |
    /// | `SHARDGUARD_FAILURE_WAIT_TIME` | `failure_wait_time_secs` |
    /// | `SHARDGUARD_FAILURE_RESET_TIME` | `failure_reset_time_secs` |
    /// | `SHARDGUARD_STORAGE_TIMEOUT_MS` | `storage_timeout_ms` |
    /// | `SHARDGUARD_ACCESS_RETRIES` | `access_retries` |
    /// | `SHARDGUARD_BACKOFF_THRESHOLD` | `backoff_threshold` |
    /// | `SHARDGUARD_CHECK_INTERVAL` | `check_interval_secs` |
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(v) = parse_env("SHARDGUARD_FAILURE_COUNT_THRESHOLD") {
            self.failure_count_threshold = v;
        }
        if let Some(v) = parse_env("SHARDGUARD_FAILURE_WAIT_TIME") {
            self.failure_wait_time_secs = v;
        }
        if let Some(v) = parse_env("SHARDGUARD_FAILURE_RESET_TIME") {
            self.failure_reset_time_secs = v;
        }
        if let Some(v) = parse_env("SHARDGUARD_STORAGE_TIMEOUT_MS") {
            self.storage_timeout_ms = v;
        }
        if let Some(v) = parse_env::<u32>("SHARDGUARD_ACCESS_RETRIES") {
            self.access_retries = v.max(1);
        }
        if let Some(v) = parse_env("SHARDGUARD_BACKOFF_THRESHOLD") {
            self.backoff_threshold = v;
        }
        if let Some(v) = parse_env("SHARDGUARD_CHECK_INTERVAL") {
            self.check_interval_secs = v;
        }
        self
    }

    /// Sets the failure count threshold.
    #[must_use]
    pub const fn with_failure_count_threshold(mut self, threshold: u64) -> Self {
        self.failure_count_threshold = threshold;
        self
    }

    /// Sets the failure wait time in seconds.
    #[must_use]
    pub const fn with_failure_wait_time_secs(mut self, secs: u64) -> Self {
        self.failure_wait_time_secs = secs;
        self
    }

    /// Sets the failure reset time in seconds.
    #[must_use]
    pub const fn with_failure_reset_time_secs(mut self, secs: u64) -> Self {
        self.failure_reset_time_secs = secs;
        self
    }

    /// Sets the storage check timeout in milliseconds.
    #[must_use]
    pub const fn with_storage_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.storage_timeout_ms = timeout_ms;
        self
    }

    /// Sets the number of probe attempts per check.
    #[must_use]
    pub const fn with_access_retries(mut self, retries: u32) -> Self {
        self.access_retries = retries;
        self
    }

    /// Sets the backoff threshold.
    #[must_use]
    pub const fn with_backoff_threshold(mut self, threshold: u64) -> Self {
        self.backoff_threshold = threshold;
        self
    }

    /// Returns the failure wait time.
    #[must_use]
    pub const fn failure_wait_time(&self) -> Duration {
        Duration::from_secs(self.failure_wait_time_secs)
    }

    /// Returns the failure reset time.
    #[must_use]
    pub const fn failure_reset_time(&self) -> Duration {
        Duration::from_secs(self.failure_reset_time_secs)
    }

    /// Returns the storage check timeout.
    #[must_use]
    pub const fn storage_timeout(&self) -> Duration {
        Duration::from_millis(self.storage_timeout_ms)
    }

    /// Returns the interval between watch loop iterations.
    #[must_use]
    pub const fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    /// Validates the relationships between thresholds.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if a value is out of range.
    pub fn validate(&self) -> Result<()> {
        if self.backoff_threshold >= self.failure_count_threshold {
            return Err(Error::InvalidInput(format!(
                "backoff_threshold ({}) must be lower than failure_count_threshold ({})",
                self.backoff_threshold, self.failure_count_threshold
            )));
        }
        if self.access_retries == 0 {
            return Err(Error::InvalidInput(
                "access_retries must be at least 1".to_string(),
            ));
        }
        if self.failure_reset_time_secs == 0 {
            return Err(Error::InvalidInput(
                "failure_reset_time must be greater than zero".to_string(),
            ));
        }
        if self.storage_timeout_ms == 0 {
            return Err(Error::InvalidInput(
                "storage_timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns a copy with the per-storage overrides applied.
    #[must_use]
    pub fn merged(&self, overrides: &SettingsOverrides) -> Self {
        Self {
            failure_count_threshold: overrides
                .failure_count_threshold
                .unwrap_or(self.failure_count_threshold),
            failure_wait_time_secs: overrides
                .failure_wait_time
                .unwrap_or(self.failure_wait_time_secs),
            failure_reset_time_secs: overrides
                .failure_reset_time
                .unwrap_or(self.failure_reset_time_secs),
            storage_timeout_ms: overrides
                .storage_timeout_ms
                .unwrap_or(self.storage_timeout_ms),
            access_retries: overrides.access_retries.unwrap_or(self.access_retries),
            backoff_threshold: overrides
                .backoff_threshold
                .unwrap_or(self.backoff_threshold),
            check_interval_secs: self.check_interval_secs,
        }
    }
}

/// Optional threshold overrides, used both in the `[circuit_breaker]` table
/// and per storage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SettingsOverrides {
    /// Failure count threshold.
    pub failure_count_threshold: Option<u64>,
    /// Failure wait time in seconds.
    pub failure_wait_time: Option<u64>,
    /// Failure reset time in seconds.
    pub failure_reset_time: Option<u64>,
    /// Storage check timeout in milliseconds.
    pub storage_timeout_ms: Option<u64>,
    /// Probe attempts per check.
    pub access_retries: Option<u32>,
    /// Backoff threshold.
    pub backoff_threshold: Option<u64>,
}

impl SettingsOverrides {
    /// Returns `true` if no value is overridden.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.failure_count_threshold.is_none()
            && self.failure_wait_time.is_none()
            && self.failure_reset_time.is_none()
            && self.storage_timeout_ms.is_none()
            && self.access_retries.is_none()
            && self.backoff_threshold.is_none()
    }
}

/// Configuration of one storage shard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct StorageConfig {
    /// Filesystem root of the shard.
    pub path: Option<PathBuf>,
    /// Threshold overrides for this shard.
    #[serde(flatten)]
    pub overrides: SettingsOverrides,
}

impl StorageConfig {
    /// Creates a storage entry rooted at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            overrides: SettingsOverrides::default(),
        }
    }
}

/// Logging section of the observability settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingSettings {
    /// `pretty` or `json`.
    pub format: Option<String>,
    /// `tracing-subscriber` filter directive.
    pub filter: Option<String>,
}

/// Metrics section of the observability settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricsSettings {
    /// Whether the Prometheus exporter is installed.
    pub enabled: Option<bool>,
    /// Port for the exporter's HTTP listener.
    pub port: Option<u16>,
}

/// Observability settings from the config file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ObservabilitySettings {
    /// Logging settings.
    pub logging: Option<LoggingSettings>,
    /// Metrics settings.
    pub metrics: Option<MetricsSettings>,
}

/// Main configuration for shardguard.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Name of the host recording and reading failure info.
    pub hostname: String,
    /// Configured storages, keyed by name.
    pub storages: BTreeMap<String, StorageConfig>,
    /// Global thresholds.
    pub settings: CircuitBreakerSettings,
    /// Enforcement flags.
    pub features: FeatureFlags,
    /// Redis URL for the shared store and leases.
    pub redis_url: Option<String>,
    /// Command used by the isolated prober.
    pub probe: ProbeCommand,
    /// Observability settings.
    pub observability: ObservabilitySettings,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            hostname: current_hostname(),
            storages: BTreeMap::new(),
            settings: CircuitBreakerSettings::default(),
            features: FeatureFlags::default(),
            redis_url: None,
            probe: ProbeCommand::default(),
            observability: ObservabilitySettings::default(),
        }
    }
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    /// Host name override.
    pub hostname: Option<String>,
    /// Redis URL.
    pub redis_url: Option<String>,
    /// Breaker section.
    pub circuit_breaker: Option<ConfigFileBreaker>,
    /// Storage table.
    #[serde(default)]
    pub storages: BTreeMap<String, StorageConfig>,
    /// Probe command.
    pub probe: Option<ConfigFileProbe>,
    /// Observability section.
    pub observability: Option<ObservabilitySettings>,
}

/// Breaker section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileBreaker {
    /// Fleet-wide enforcement flag.
    pub enabled: Option<bool>,
    /// Watch loop interval in seconds.
    pub check_interval: Option<u64>,
    /// Threshold values.
    #[serde(flatten)]
    pub thresholds: SettingsOverrides,
}

/// Probe section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileProbe {
    /// Program to execute.
    pub program: Option<String>,
    /// Arguments placed before the storage path.
    pub args: Option<Vec<String>>,
}

impl BreakerConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::OperationFailed {
            operation: "read_config_file".to_string(),
            cause: format!("{}: {e}", path.display()),
        })?;

        Self::from_toml(&contents)
    }

    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid TOML or the thresholds are invalid.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(contents).map_err(|e| Error::OperationFailed {
            operation: "parse_config_file".to_string(),
            cause: e.to_string(),
        })?;

        let config = Self::from_config_file(file);
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from the default location.
    ///
    /// Checks the platform config dir first, then `~/.config/shardguard/`.
    /// Returns the defaults if no file is found or the file is unusable.
    #[must_use]
    pub fn load_default() -> Self {
        let Some(base_dirs) = directories::BaseDirs::new() else {
            return Self::default();
        };

        let candidates = [
            base_dirs.config_dir().join("shardguard").join("config.toml"),
            base_dirs
                .home_dir()
                .join(".config")
                .join("shardguard")
                .join("config.toml"),
        ];

        for candidate in candidates {
            if !candidate.exists() {
                continue;
            }
            match Self::load_from_file(&candidate) {
                Ok(config) => return config,
                Err(e) => {
                    tracing::warn!(path = %candidate.display(), error = %e, "Ignoring config file");
                },
            }
        }

        Self::default()
    }

    fn from_config_file(file: ConfigFile) -> Self {
        let mut config = Self::default();

        if let Some(hostname) = file.hostname {
            config.hostname = hostname;
        }
        config.redis_url = file.redis_url;
        if let Some(breaker) = file.circuit_breaker {
            if let Some(enabled) = breaker.enabled {
                config.features.circuit_breaker = enabled;
            }
            if let Some(interval) = breaker.check_interval {
                config.settings.check_interval_secs = interval;
            }
            config.settings = config.settings.merged(&breaker.thresholds);
        }
        config.storages = file.storages;
        if let Some(probe) = file.probe {
            let program = probe.program.unwrap_or_else(|| config.probe.program.clone());
            config.probe = ProbeCommand::new(program).with_args(probe.args.unwrap_or_default());
        }
        if let Some(observability) = file.observability {
            config.observability = observability;
        }

        config
    }

    /// Applies environment variable overrides.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        self.settings = self.settings.with_env_overrides();
        self.features = self.features.with_env_overrides();
        if let Some(url) = parse_env::<String>("SHARDGUARD_REDIS_URL").filter(|u| !u.is_empty()) {
            self.redis_url = Some(url);
        }
        if let Some(host) = parse_env::<String>("SHARDGUARD_HOSTNAME").filter(|h| !h.is_empty()) {
            self.hostname = host;
        }
        self
    }

    /// Sets the host name.
    #[must_use]
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    /// Adds a storage rooted at `path`.
    #[must_use]
    pub fn with_storage(mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.storages.insert(name.into(), StorageConfig::new(path));
        self
    }

    /// Adds a storage with an explicit configuration.
    #[must_use]
    pub fn with_storage_config(mut self, name: impl Into<String>, storage: StorageConfig) -> Self {
        self.storages.insert(name.into(), storage);
        self
    }

    /// Replaces the global settings.
    #[must_use]
    pub const fn with_settings(mut self, settings: CircuitBreakerSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Replaces the feature flags.
    #[must_use]
    pub const fn with_features(mut self, features: FeatureFlags) -> Self {
        self.features = features;
        self
    }

    /// Replaces the probe command.
    #[must_use]
    pub fn with_probe(mut self, probe: ProbeCommand) -> Self {
        self.probe = probe;
        self
    }

    /// Returns the configuration of a storage, if present.
    #[must_use]
    pub fn storage(&self, name: &str) -> Option<&StorageConfig> {
        self.storages.get(name)
    }

    /// Returns the configured storage names in order.
    pub fn storage_names(&self) -> impl Iterator<Item = &str> {
        self.storages.keys().map(String::as_str)
    }

    /// Returns the effective settings for a storage.
    #[must_use]
    pub fn settings_for(&self, name: &str) -> CircuitBreakerSettings {
        self.storages
            .get(name)
            .map_or_else(|| self.settings.clone(), |s| self.settings.merged(&s.overrides))
    }

    /// Validates the global settings and the effective settings of every storage.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] naming the offending storage if its
    /// overrides produce invalid settings.
    pub fn validate(&self) -> Result<()> {
        self.settings.validate()?;
        for name in self.storage_names() {
            self.settings_for(name).validate().map_err(|e| match e {
                Error::InvalidInput(reason) => {
                    Error::InvalidInput(format!("storage '{name}': {reason}"))
                },
                other => other,
            })?;
        }
        Ok(())
    }
}

/// Returns the operating system host name, or `localhost` if it is unavailable.
#[must_use]
pub fn current_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

fn parse_env<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<T>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_are_valid() {
        let settings = CircuitBreakerSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.failure_reset_time(), Duration::from_secs(1800));
        assert_eq!(settings.storage_timeout(), Duration::from_secs(15));
    }

    #[test]
    fn test_backoff_threshold_must_be_below_failure_threshold() {
        let settings = CircuitBreakerSettings::default()
            .with_failure_count_threshold(3)
            .with_backoff_threshold(3);
        assert!(matches!(settings.validate(), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_zero_retries_rejected() {
        let settings = CircuitBreakerSettings::default().with_access_retries(0);
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_zero_storage_timeout_rejected() {
        let settings = CircuitBreakerSettings::default().with_storage_timeout_ms(0);
        assert!(matches!(settings.validate(), Err(Error::InvalidInput(_))));

        let result = BreakerConfig::from_toml(
            r"
            [circuit_breaker]
            storage_timeout_ms = 0
            ",
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_storage_override_fails_to_load() {
        let result = BreakerConfig::from_toml(
            r#"
            [circuit_breaker]
            failure_count_threshold = 2
            backoff_threshold = 1

            [storages.default]
            path = "/var/opt/git/repositories"
            failure_reset_time = 0
            "#,
        );
        assert!(matches!(
            result,
            Err(Error::InvalidInput(reason)) if reason.contains("storage 'default'")
        ));
    }

    #[test]
    fn test_storage_overrides_validated_against_merged_settings() {
        let lowered = StorageConfig {
            path: Some(PathBuf::from("/srv/nfs")),
            overrides: SettingsOverrides {
                failure_count_threshold: Some(3),
                ..SettingsOverrides::default()
            },
        };
        let config = BreakerConfig::new().with_storage_config("nfs-02", lowered);
        // Global backoff threshold 5 is not below the override of 3.
        assert!(config.settings.validate().is_ok());
        assert!(config.validate().is_err());

        let retries = StorageConfig {
            path: Some(PathBuf::from("/srv/nfs")),
            overrides: SettingsOverrides {
                access_retries: Some(0),
                ..SettingsOverrides::default()
            },
        };
        let config = BreakerConfig::new().with_storage_config("nfs-02", retries);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_config_file() {
        let config = BreakerConfig::from_toml(
            r#"
            hostname = "web-01"
            redis_url = "redis://cache:6379"

            [circuit_breaker]
            enabled = true
            failure_count_threshold = 7
            failure_reset_time = 600
            check_interval = 5

            [storages.default]
            path = "/var/opt/git/repositories"

            [storages.broken]

            [storages.nfs-02]
            path = "/mnt/nfs-02"
            failure_count_threshold = 20
            storage_timeout_ms = 500

            [probe]
            program = "test"
            args = ["-d"]
            "#,
        )
        .unwrap();

        assert_eq!(config.hostname, "web-01");
        assert_eq!(config.redis_url.as_deref(), Some("redis://cache:6379"));
        assert!(config.features.circuit_breaker);
        assert_eq!(config.settings.failure_count_threshold, 7);
        assert_eq!(config.settings.failure_reset_time_secs, 600);
        assert_eq!(config.settings.check_interval_secs, 5);
        assert_eq!(config.storages.len(), 3);
        assert!(config.storage("broken").unwrap().path.is_none());
        assert_eq!(config.probe.program, "test");
        assert_eq!(config.probe.args, vec!["-d".to_string()]);

        let nfs = config.settings_for("nfs-02");
        assert_eq!(nfs.failure_count_threshold, 20);
        assert_eq!(nfs.storage_timeout_ms, 500);
        assert_eq!(nfs.failure_reset_time_secs, 600);

        assert_eq!(config.settings_for("default"), config.settings);
        assert_eq!(config.settings_for("unknown"), config.settings);
    }

    #[test]
    fn test_invalid_thresholds_fail_to_load() {
        let result = BreakerConfig::from_toml(
            r"
            [circuit_breaker]
            failure_count_threshold = 2
            backoff_threshold = 4
            ",
        );
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_load_from_missing_file() {
        let result = BreakerConfig::load_from_file(Path::new("/nonexistent/shardguard.toml"));
        assert!(matches!(result, Err(Error::OperationFailed { .. })));
    }

    #[test]
    fn test_builders() {
        let config = BreakerConfig::new()
            .with_hostname("host-1")
            .with_storage("default", "/srv/git")
            .with_features(FeatureFlags::enforcing());
        assert_eq!(config.hostname, "host-1");
        assert_eq!(config.storage_names().collect::<Vec<_>>(), vec!["default"]);
        assert!(config.features.enforcement_enabled());
    }

    #[test]
    fn test_current_hostname_not_empty() {
        assert!(!current_hostname().is_empty());
    }
}

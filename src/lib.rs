//! # Shardguard
//!
//! A fleet-wide circuit breaker for networked git storage shards.
//!
//! Shardguard keeps a multi-tenant service from hammering a storage shard that
//! has become slow or unreachable. Health probes run in killable child
//! processes, their outcomes accumulate in a shared TTL store, and every
//! storage call site consults a circuit breaker before touching the shard.
//!
//! ## Components
//!
//! - [`storage`]: the shared failure info store and the distributed lease
//! - [`probe`]: the process-isolated filesystem prober
//! - [`services`]: the storage checker, the circuit breaker and the health view
//! - [`observability`]: structured logging and Prometheus metrics
//!
//! ## Example
//!
//! ```rust,ignore
//! use shardguard::{BreakerCache, BreakerConfig, MemoryFailureStore};
//! use std::sync::Arc;
//!
//! let config = Arc::new(BreakerConfig::load_default().with_env_overrides());
//! let mut breakers = BreakerCache::new(config, Arc::new(MemoryFailureStore::new()));
//! let repo = breakers.for_storage("default").perform(|| open_repository(path))?;
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use std::time::Duration;
use thiserror::Error as ThisError;

pub mod cli;
pub mod config;
pub mod models;
pub mod observability;
pub mod probe;
pub mod services;
pub mod storage;

pub use config::{BreakerConfig, CircuitBreakerSettings, FeatureFlags, StorageConfig};
pub use models::{CheckResult, FailureInfo};
pub use observability::CheckMetrics;
pub use probe::{IsolatedProbe, ProbeCommand};
pub use services::{
    Breaker, BreakerCache, CircuitBreaker, Health, HealthAggregator, HostFailure,
    NullCircuitBreaker, StorageChecker,
};
pub use storage::{FailureStore, LeaseProvider, MemoryFailureStore, MemoryLease};

/// Error type for shardguard operations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `InvalidInput` | Config file values out of range, unparsable settings |
/// | `OperationFailed` | Shared store or lease backend errors, I/O errors |
/// | `Misconfiguration` | A breaker is used for a storage with no entry or no path |
/// | `CircuitOpen` | A breaker refuses work because the storage keeps failing |
#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An operation failed.
    ///
    /// Raised when:
    /// - Redis commands or transactions fail
    /// - The lease backend cannot be reached
    /// - Config files cannot be read
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// The storage is unknown or has no configured path.
    ///
    /// This is a deployment bug, not a transient fault, and is never retried.
    #[error("storage '{storage}' is misconfigured: {reason}")]
    Misconfiguration {
        /// The storage name the breaker was built for.
        storage: String,
        /// What is missing.
        reason: String,
    },

    /// The circuit for a storage is open.
    #[error("circuit for storage '{storage}' is open, retry after {} seconds", retry_after.as_secs())]
    CircuitOpen {
        /// The storage whose circuit tripped.
        storage: String,
        /// Suggested wait before retrying.
        retry_after: Duration,
    },
}

impl Error {
    /// Returns the suggested retry delay for an open circuit.
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::CircuitOpen { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }

    /// Returns `true` if this error was raised by a tripped breaker.
    #[must_use]
    pub const fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }
}

/// Result type alias for shardguard operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidInput("bad threshold".to_string());
        assert_eq!(err.to_string(), "invalid input: bad threshold");

        let err = Error::OperationFailed {
            operation: "redis_load".to_string(),
            cause: "connection refused".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "operation 'redis_load' failed: connection refused"
        );

        let err = Error::CircuitOpen {
            storage: "default".to_string(),
            retry_after: Duration::from_secs(1800),
        };
        assert_eq!(
            err.to_string(),
            "circuit for storage 'default' is open, retry after 1800 seconds"
        );
    }

    #[test]
    fn test_retry_after_only_for_open_circuit() {
        let open = Error::CircuitOpen {
            storage: "default".to_string(),
            retry_after: Duration::from_secs(30),
        };
        assert_eq!(open.retry_after(), Some(Duration::from_secs(30)));
        assert!(open.is_circuit_open());

        let misconfigured = Error::Misconfiguration {
            storage: "nope".to_string(),
            reason: "storage is not configured".to_string(),
        };
        assert_eq!(misconfigured.retry_after(), None);
        assert!(!misconfigured.is_circuit_open());
    }
}

//! Shared state backends.
//!
//! Two pieces of state are shared across the fleet:
//! - **Failure info**: per (storage, host) failure streaks with a TTL
//! - **Leases**: short-lived exclusive tokens guarding storage checks
//!
//! Both come with an in-process implementation (tests, single host) and a
//! Redis implementation behind the `redis` feature.

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;
pub mod traits;

pub use memory::{MemoryFailureStore, MemoryLease};
#[cfg(feature = "redis")]
pub use redis::{RedisFailureStore, RedisLease};
pub use traits::{FailureStore, LeaseGuard, LeaseProvider};

use crate::BreakerConfig;
use std::sync::Arc;

/// Store and lease pair built from configuration.
pub struct SharedState {
    /// Failure info store.
    pub store: Arc<dyn FailureStore>,
    /// Lease provider.
    pub lease: Arc<dyn LeaseProvider>,
}

impl SharedState {
    /// Builds the in-process backends.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            store: Arc::new(MemoryFailureStore::new()),
            lease: Arc::new(MemoryLease::new()),
        }
    }

    /// Builds the backends selected by `config`.
    ///
    /// Uses Redis when a URL is configured and the `redis` feature is
    /// compiled in, otherwise falls back to process-local state.
    pub fn from_config(config: &BreakerConfig) -> crate::Result<Self> {
        match config.redis_url.as_deref() {
            #[cfg(feature = "redis")]
            Some(url) => Ok(Self {
                store: Arc::new(RedisFailureStore::new(url)?),
                lease: Arc::new(RedisLease::new(url)?),
            }),
            #[cfg(not(feature = "redis"))]
            Some(_) => {
                tracing::warn!(
                    "redis_url is configured but shardguard was built without the redis feature; \
                     failure info is process-local"
                );
                Ok(Self::in_memory())
            },
            None => {
                tracing::warn!("No redis_url configured; failure info is process-local");
                Ok(Self::in_memory())
            },
        }
    }
}

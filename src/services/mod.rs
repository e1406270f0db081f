//! Breaker services.
//!
//! Services combine the configuration, the shared state backends and the
//! prober into the operations call sites use.

mod breaker;
mod checker;
mod health;

pub use breaker::{Breaker, BreakerCache, CircuitBreaker, NullCircuitBreaker};
pub use checker::StorageChecker;
pub use health::{Health, HealthAggregator, HostFailure};

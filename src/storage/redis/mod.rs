//! Redis backends for the failure store and the lease.
//!
//! # Command Timeout
//!
//! Connections use a 5-second read and write timeout so a stalled Redis
//! server cannot hang a checker or a breaker lookup indefinitely.

mod connection;
mod failure_store;
mod lease;

pub use failure_store::RedisFailureStore;
pub use lease::RedisLease;

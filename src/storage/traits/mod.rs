//! Storage backend traits.

mod failure_store;
mod lease;

pub use failure_store::FailureStore;
pub(crate) use failure_store::expiry_millis;
pub use lease::{LeaseGuard, LeaseProvider};

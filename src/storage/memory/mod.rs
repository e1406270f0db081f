//! In-process backends.

mod failure_store;
mod lease;

pub use failure_store::MemoryFailureStore;
pub use lease::MemoryLease;

//! Data models for shardguard.
//!
//! This module contains the records shared by the store, the checker, the
//! breaker and the health view.

mod check_result;
mod failure_info;
pub mod keys;

pub use check_result::CheckResult;
pub use failure_info::FailureInfo;

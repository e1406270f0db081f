//! Shared failure info store trait.

use crate::Result;
use crate::models::FailureInfo;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Trait for the fleet-wide, TTL-backed failure info store.
///
/// Every host writes its own (storage, host) record; any host can read all of
/// them. Each record is indexed in a sorted set of known keys scored by
/// expiry, so the fleet view never needs a keyspace scan.
///
/// Implementations must apply the writes of a single `record_*` call as one
/// unit: a reader never sees `failure_count` bumped without `last_failure`.
pub trait FailureStore: Send + Sync {
    /// Loads the failure info for a (storage, host) pair.
    ///
    /// An absent or expired record yields [`FailureInfo::default`].
    fn load(&self, storage: &str, host: &str) -> Result<FailureInfo>;

    /// Records a failed check at `now`.
    ///
    /// Keeps `first_failure` if already set, sets `last_failure`, increments
    /// `failure_count` and extends the record and its index entry to expire
    /// `reset_time` after `now`.
    fn record_failure_at(
        &self,
        storage: &str,
        host: &str,
        now: DateTime<Utc>,
        reset_time: Duration,
    ) -> Result<()>;

    /// Records a successful check at `now`, clearing the streak.
    fn record_success_at(
        &self,
        storage: &str,
        host: &str,
        now: DateTime<Utc>,
        reset_time: Duration,
    ) -> Result<()>;

    /// Deletes every known record and the index itself.
    fn reset_all(&self) -> Result<()>;

    /// Returns the live keys of a storage, purging expired index entries.
    fn known_keys_at(&self, storage: &str, now: DateTime<Utc>) -> Result<Vec<String>>;

    /// Reads `failure_count` for many keys in one round trip.
    ///
    /// The result has one entry per key, in order; missing records count as 0.
    fn failure_counts(&self, keys: &[String]) -> Result<Vec<u64>>;

    /// Short backend name for logs.
    fn backend_name(&self) -> &'static str;

    /// Records a failed check now.
    fn record_failure(&self, storage: &str, host: &str, reset_time: Duration) -> Result<()> {
        self.record_failure_at(storage, host, Utc::now(), reset_time)
    }

    /// Records a successful check now.
    fn record_success(&self, storage: &str, host: &str, reset_time: Duration) -> Result<()> {
        self.record_success_at(storage, host, Utc::now(), reset_time)
    }

    /// Returns the live keys of a storage.
    fn enumerate_keys_with_prefix(&self, storage: &str) -> Result<Vec<String>> {
        self.known_keys_at(storage, Utc::now())
    }
}

/// Returns `now + ttl` as epoch milliseconds.
pub(crate) fn expiry_millis(now: DateTime<Utc>, ttl: Duration) -> i64 {
    let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
    now.timestamp_millis().saturating_add(ttl_ms)
}

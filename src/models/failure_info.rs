//! Accumulated failure info for one (storage, host) pair.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Failure streak recorded for a storage as seen from one host.
///
/// The three fields are written together, so either all of them are at
/// their zero value or `failure_count` is positive and both timestamps are
/// set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FailureInfo {
    /// Start of the current streak.
    pub first_failure: Option<DateTime<Utc>>,
    /// Most recent failure.
    pub last_failure: Option<DateTime<Utc>>,
    /// Consecutive failures since the last success or reset.
    pub failure_count: u64,
}

impl FailureInfo {
    /// Returns `true` if no failure has been recorded.
    #[must_use]
    pub const fn no_failures(&self) -> bool {
        self.first_failure.is_none() && self.last_failure.is_none() && self.failure_count == 0
    }

    /// Builds a record from raw stored values (epoch milliseconds).
    ///
    /// Missing or unparsable values map to their zero value.
    #[must_use]
    pub fn from_raw(
        first_failure_ms: Option<i64>,
        last_failure_ms: Option<i64>,
        failure_count: Option<u64>,
    ) -> Self {
        Self {
            first_failure: first_failure_ms.and_then(DateTime::from_timestamp_millis),
            last_failure: last_failure_ms.and_then(DateTime::from_timestamp_millis),
            failure_count: failure_count.unwrap_or(0),
        }
    }

    /// Returns this record after one more failure at `now`.
    #[must_use]
    pub fn with_failure_at(self, now: DateTime<Utc>) -> Self {
        Self {
            first_failure: Some(self.first_failure.unwrap_or(now)),
            last_failure: Some(now),
            failure_count: self.failure_count.saturating_add(1),
        }
    }
}

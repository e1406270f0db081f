//! In-process failure info store.

use crate::Result;
use crate::models::{FailureInfo, keys};
use crate::storage::traits::{FailureStore, expiry_millis};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
struct Record {
    info: FailureInfo,
    expires_at_ms: i64,
}

#[derive(Debug, Default)]
struct State {
    records: HashMap<String, Record>,
    known_keys: HashMap<String, i64>,
}

impl State {
    fn touch(&mut self, key: String, info: FailureInfo, now: DateTime<Utc>, ttl: Duration) {
        let now_ms = now.timestamp_millis();
        let expires_at_ms = expiry_millis(now, ttl);
        self.known_keys.retain(|_, expiry| *expiry > now_ms);
        self.records.retain(|_, record| record.expires_at_ms > now_ms);
        self.known_keys.insert(key.clone(), expires_at_ms);
        self.records.insert(key, Record { info, expires_at_ms });
    }

    fn live_info(&self, key: &str, now_ms: i64) -> FailureInfo {
        self.records
            .get(key)
            .filter(|record| record.expires_at_ms > now_ms)
            .map(|record| record.info)
            .unwrap_or_default()
    }
}

/// Failure store kept in process memory.
///
/// Useful for tests and single-host deployments. Every call takes one lock,
/// which makes each `record_*` call a single atomic update.
#[derive(Debug, Default)]
pub struct MemoryFailureStore {
    state: Mutex<State>,
}

impl MemoryFailureStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of records, live or expired, still held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    /// Returns `true` if no record is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl FailureStore for MemoryFailureStore {
    fn load(&self, storage: &str, host: &str) -> Result<FailureInfo> {
        let key = keys::cache_key(storage, host);
        Ok(self.lock().live_info(&key, Utc::now().timestamp_millis()))
    }

    fn record_failure_at(
        &self,
        storage: &str,
        host: &str,
        now: DateTime<Utc>,
        reset_time: Duration,
    ) -> Result<()> {
        let key = keys::cache_key(storage, host);
        let mut state = self.lock();
        let current = state.live_info(&key, now.timestamp_millis());
        state.touch(key, current.with_failure_at(now), now, reset_time);
        Ok(())
    }

    fn record_success_at(
        &self,
        storage: &str,
        host: &str,
        now: DateTime<Utc>,
        reset_time: Duration,
    ) -> Result<()> {
        let key = keys::cache_key(storage, host);
        self.lock()
            .touch(key, FailureInfo::default(), now, reset_time);
        Ok(())
    }

    fn reset_all(&self) -> Result<()> {
        let mut state = self.lock();
        let known: Vec<String> = state.known_keys.drain().map(|(key, _)| key).collect();
        for key in known {
            state.records.remove(&key);
        }
        Ok(())
    }

    fn known_keys_at(&self, storage: &str, now: DateTime<Utc>) -> Result<Vec<String>> {
        let prefix = keys::storage_prefix(storage);
        let now_ms = now.timestamp_millis();
        let mut state = self.lock();
        state.known_keys.retain(|_, expiry| *expiry > now_ms);

        let mut matched: Vec<String> = state
            .known_keys
            .keys()
            .filter(|key| key.starts_with(&prefix))
            .cloned()
            .collect();
        matched.sort();
        Ok(matched)
    }

    fn failure_counts(&self, keys: &[String]) -> Result<Vec<u64>> {
        let now_ms = Utc::now().timestamp_millis();
        let state = self.lock();
        Ok(keys
            .iter()
            .map(|key| state.live_info(key, now_ms).failure_count)
            .collect())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

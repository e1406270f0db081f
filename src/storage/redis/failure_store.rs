//! Redis-backed failure info store.
//!
//! Each (storage, host) record is a hash with `first_failure`,
//! `last_failure` (epoch milliseconds) and `failure_count`. Writes go through
//! a `MULTI`/`EXEC` pipeline so the three fields, the key TTL and the known
//! keys index move together.

use super::connection::RedisConnection;
use crate::Result;
use crate::models::{FailureInfo, keys};
use crate::storage::traits::{FailureStore, expiry_millis};
use chrono::{DateTime, Utc};
use std::time::Duration;

const FIRST_FAILURE: &str = "first_failure";
const LAST_FAILURE: &str = "last_failure";
const FAILURE_COUNT: &str = "failure_count";

/// Failure store shared by the fleet through Redis.
pub struct RedisFailureStore {
    connection: RedisConnection,
}

impl RedisFailureStore {
    /// Creates a store for the Redis server at `url`.
    pub fn new(url: &str) -> Result<Self> {
        Ok(Self {
            connection: RedisConnection::open(url)?,
        })
    }

    fn maintain_known_keys(pipe: &mut redis::Pipeline, key: &str, now: DateTime<Utc>, ttl: Duration) {
        pipe.cmd("EXPIRE")
            .arg(key)
            .arg(ttl.as_secs().max(1))
            .ignore()
            .cmd("ZADD")
            .arg(keys::KNOWN_KEYS)
            .arg(expiry_millis(now, ttl))
            .arg(key)
            .ignore()
            .cmd("ZREMRANGEBYSCORE")
            .arg(keys::KNOWN_KEYS)
            .arg("-inf")
            .arg(now.timestamp_millis())
            .ignore();
    }
}

impl FailureStore for RedisFailureStore {
    fn load(&self, storage: &str, host: &str) -> Result<FailureInfo> {
        let key = keys::cache_key(storage, host);
        let values: Vec<Option<String>> = self.connection.with("redis_load", |conn| {
            redis::cmd("HMGET")
                .arg(&key)
                .arg(FIRST_FAILURE)
                .arg(LAST_FAILURE)
                .arg(FAILURE_COUNT)
                .query(conn)
        })?;

        let field = |idx: usize| values.get(idx).cloned().flatten();
        Ok(FailureInfo::from_raw(
            field(0).and_then(|v| v.parse().ok()),
            field(1).and_then(|v| v.parse().ok()),
            field(2).and_then(|v| v.parse().ok()),
        ))
    }

    fn record_failure_at(
        &self,
        storage: &str,
        host: &str,
        now: DateTime<Utc>,
        reset_time: Duration,
    ) -> Result<()> {
        let key = keys::cache_key(storage, host);
        let now_ms = now.timestamp_millis();

        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("HSETNX")
            .arg(&key)
            .arg(FIRST_FAILURE)
            .arg(now_ms)
            .ignore()
            .cmd("HSET")
            .arg(&key)
            .arg(LAST_FAILURE)
            .arg(now_ms)
            .ignore()
            .cmd("HINCRBY")
            .arg(&key)
            .arg(FAILURE_COUNT)
            .arg(1)
            .ignore();
        Self::maintain_known_keys(&mut pipe, &key, now, reset_time);

        self.connection
            .with("redis_record_failure", |conn| pipe.query::<()>(conn))
    }

    fn record_success_at(
        &self,
        storage: &str,
        host: &str,
        now: DateTime<Utc>,
        reset_time: Duration,
    ) -> Result<()> {
        let key = keys::cache_key(storage, host);

        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("HDEL")
            .arg(&key)
            .arg(FIRST_FAILURE)
            .arg(LAST_FAILURE)
            .ignore()
            .cmd("HSET")
            .arg(&key)
            .arg(FAILURE_COUNT)
            .arg(0)
            .ignore();
        Self::maintain_known_keys(&mut pipe, &key, now, reset_time);

        self.connection
            .with("redis_record_success", |conn| pipe.query::<()>(conn))
    }

    fn reset_all(&self) -> Result<()> {
        self.connection.with("redis_reset_all", |conn| {
            let known: Vec<String> = redis::cmd("ZRANGE")
                .arg(keys::KNOWN_KEYS)
                .arg(0)
                .arg(-1)
                .query(conn)?;

            let mut pipe = redis::pipe();
            pipe.atomic();
            if !known.is_empty() {
                pipe.cmd("DEL").arg(&known).ignore();
            }
            pipe.cmd("DEL").arg(keys::KNOWN_KEYS).ignore();
            pipe.query::<()>(conn)
        })
    }

    fn known_keys_at(&self, storage: &str, now: DateTime<Utc>) -> Result<Vec<String>> {
        let prefix = keys::storage_prefix(storage);
        let now_ms = now.timestamp_millis();

        let (live,): (Vec<String>,) = self.connection.with("redis_known_keys", |conn| {
            redis::pipe()
                .cmd("ZREMRANGEBYSCORE")
                .arg(keys::KNOWN_KEYS)
                .arg("-inf")
                .arg(now_ms)
                .ignore()
                .cmd("ZRANGEBYSCORE")
                .arg(keys::KNOWN_KEYS)
                .arg(format!("({now_ms}"))
                .arg("+inf")
                .query(conn)
        })?;

        let mut matched: Vec<String> = live
            .into_iter()
            .filter(|key| key.starts_with(&prefix))
            .collect();
        matched.sort();
        Ok(matched)
    }

    fn failure_counts(&self, keys: &[String]) -> Result<Vec<u64>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let counts: Vec<Option<u64>> = self.connection.with("redis_failure_counts", |conn| {
            let mut pipe = redis::pipe();
            for key in keys {
                pipe.cmd("HGET").arg(key).arg(FAILURE_COUNT);
            }
            pipe.query(conn)
        })?;

        Ok(counts.into_iter().map(Option::unwrap_or_default).collect())
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

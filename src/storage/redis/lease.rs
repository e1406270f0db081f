//! Redis-backed lease (`SET NX PX` plus compare-and-delete).

use super::connection::RedisConnection;
use crate::Result;
use crate::storage::traits::LeaseProvider;
use std::time::Duration;
use uuid::Uuid;

const CANCEL_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end
"#;

/// Fleet-wide lease stored in Redis.
pub struct RedisLease {
    connection: RedisConnection,
    cancel: redis::Script,
}

impl RedisLease {
    /// Creates a lease provider for the Redis server at `url`.
    pub fn new(url: &str) -> Result<Self> {
        Ok(Self {
            connection: RedisConnection::open(url)?,
            cancel: redis::Script::new(CANCEL_SCRIPT),
        })
    }
}

impl LeaseProvider for RedisLease {
    fn try_obtain(&self, name: &str, timeout: Duration) -> Result<Option<String>> {
        let token = Uuid::new_v4().to_string();
        let ttl_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX).max(1);

        let reply: Option<String> = self.connection.with("redis_lease_obtain", |conn| {
            redis::cmd("SET")
                .arg(name)
                .arg(&token)
                .arg("NX")
                .arg("PX")
                .arg(ttl_ms)
                .query(conn)
        })?;

        Ok(reply.map(|_| token))
    }

    fn cancel(&self, name: &str, token: &str) -> Result<()> {
        self.connection.with("redis_lease_cancel", |conn| {
            self.cancel.key(name).arg(token).invoke::<i64>(conn)
        })?;
        Ok(())
    }
}

//! Reusable Redis connection shared by the store and the lease.

use crate::{Error, Result};
use redis::{Client, Connection};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Default timeout for Redis operations.
const REDIS_TIMEOUT: Duration = Duration::from_secs(5);

/// Lazily opened connection, reused across commands.
pub struct RedisConnection {
    client: Client,
    connection: Mutex<Option<Connection>>,
}

impl RedisConnection {
    /// Creates a connection handle for `url`.
    ///
    /// No network traffic happens until the first command.
    pub fn open(url: &str) -> Result<Self> {
        let client = Client::open(url).map_err(|e| Error::OperationFailed {
            operation: "redis_connect".to_string(),
            cause: e.to_string(),
        })?;

        Ok(Self {
            client,
            connection: Mutex::new(None),
        })
    }

    /// Runs `f` with a connection, returning the connection to the cache
    /// only if `f` succeeded.
    pub fn with<T, F>(&self, operation: &str, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> redis::RedisResult<T>,
    {
        let mut conn = self.get_connection()?;
        match f(&mut conn) {
            Ok(value) => {
                self.return_connection(conn);
                Ok(value)
            },
            Err(e) => Err(Error::OperationFailed {
                operation: operation.to_string(),
                cause: e.to_string(),
            }),
        }
    }

    fn get_connection(&self) -> Result<Connection> {
        let cached = self
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(conn) = cached {
            return Ok(conn);
        }

        let conn = self
            .client
            .get_connection()
            .map_err(|e| Error::OperationFailed {
                operation: "redis_get_connection".to_string(),
                cause: e.to_string(),
            })?;

        conn.set_read_timeout(Some(REDIS_TIMEOUT))
            .map_err(|e| Error::OperationFailed {
                operation: "redis_set_read_timeout".to_string(),
                cause: e.to_string(),
            })?;
        conn.set_write_timeout(Some(REDIS_TIMEOUT))
            .map_err(|e| Error::OperationFailed {
                operation: "redis_set_write_timeout".to_string(),
                cause: e.to_string(),
            })?;

        Ok(conn)
    }

    fn return_connection(&self, conn: Connection) {
        // A connection that raced another thread back into the slot is dropped.
        let mut slot = self
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(conn);
        }
    }
}

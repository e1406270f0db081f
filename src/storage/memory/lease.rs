//! In-process lease.

use crate::Result;
use crate::storage::traits::LeaseProvider;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use uuid::Uuid;

#[derive(Debug)]
struct Held {
    token: String,
    expires_at: Instant,
}

/// Lease table kept in process memory.
///
/// Only excludes checkers sharing this process; use the Redis lease to
/// coordinate a fleet.
#[derive(Debug, Default)]
pub struct MemoryLease {
    held: Mutex<HashMap<String, Held>>,
}

impl MemoryLease {
    /// Creates an empty lease table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl LeaseProvider for MemoryLease {
    fn try_obtain(&self, name: &str, timeout: Duration) -> Result<Option<String>> {
        let now = Instant::now();
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);

        if held.get(name).is_some_and(|lease| lease.expires_at > now) {
            return Ok(None);
        }

        let token = Uuid::new_v4().to_string();
        held.insert(
            name.to_string(),
            Held {
                token: token.clone(),
                expires_at: now + timeout,
            },
        );
        Ok(Some(token))
    }

    fn cancel(&self, name: &str, token: &str) -> Result<()> {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        if held.get(name).is_some_and(|lease| lease.token == token) {
            held.remove(name);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::traits::LeaseGuard;

    #[test]
    fn test_lease_is_exclusive_until_cancelled() {
        let lease = MemoryLease::new();
        let token = lease
            .try_obtain("storage_check:a", Duration::from_secs(5))
            .unwrap()
            .unwrap();
        assert!(
            lease
                .try_obtain("storage_check:a", Duration::from_secs(5))
                .unwrap()
                .is_none()
        );

        lease.cancel("storage_check:a", &token).unwrap();
        assert!(
            lease
                .try_obtain("storage_check:a", Duration::from_secs(5))
                .unwrap()
                .is_some()
        );
    }

    #[test]
    fn test_cancel_with_stale_token_keeps_lease() {
        let lease = MemoryLease::new();
        let _token = lease
            .try_obtain("storage_check:a", Duration::from_secs(5))
            .unwrap();
        lease.cancel("storage_check:a", "not-the-owner").unwrap();
        assert!(
            lease
                .try_obtain("storage_check:a", Duration::from_secs(5))
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_lease_expires() {
        let lease = MemoryLease::new();
        let _token = lease
            .try_obtain("storage_check:a", Duration::from_millis(10))
            .unwrap();
        std::thread::sleep(Duration::from_millis(30));
        assert!(
            lease
                .try_obtain("storage_check:a", Duration::from_secs(5))
                .unwrap()
                .is_some()
        );
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let lease = MemoryLease::new();
        {
            let guard = LeaseGuard::obtain(&lease, "storage_check:b", Duration::from_secs(5))
                .unwrap()
                .unwrap();
            assert_eq!(guard.name(), "storage_check:b");
            assert!(
                LeaseGuard::obtain(&lease, "storage_check:b", Duration::from_secs(5))
                    .unwrap()
                    .is_none()
            );
        }
        assert!(
            LeaseGuard::obtain(&lease, "storage_check:b", Duration::from_secs(5))
                .unwrap()
                .is_some()
        );
    }
}

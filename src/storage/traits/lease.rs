//! Distributed lease trait.

use crate::Result;
use std::fmt;
use std::time::Duration;

/// Named, exclusively held token with a timeout.
///
/// A lease is advisory: it only keeps hosts from running the same check
/// twice at once. It expires on its own if the holder dies.
pub trait LeaseProvider: Send + Sync {
    /// Tries to obtain the lease `name` for `timeout`.
    ///
    /// Returns the ownership token, or `None` if someone else holds it.
    fn try_obtain(&self, name: &str, timeout: Duration) -> Result<Option<String>>;

    /// Releases the lease if `token` still owns it.
    fn cancel(&self, name: &str, token: &str) -> Result<()>;
}

/// Held lease, released on [`LeaseGuard::release`] or on drop.
pub struct LeaseGuard<'a> {
    provider: &'a dyn LeaseProvider,
    name: String,
    token: Option<String>,
}

impl<'a> LeaseGuard<'a> {
    /// Tries to obtain `name` and wraps the token in a guard.
    pub fn obtain(
        provider: &'a dyn LeaseProvider,
        name: impl Into<String>,
        timeout: Duration,
    ) -> Result<Option<Self>> {
        let name = name.into();
        let token = provider.try_obtain(&name, timeout)?;
        Ok(token.map(|token| Self {
            provider,
            name,
            token: Some(token),
        }))
    }

    /// Returns the lease name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Releases the lease, surfacing backend errors.
    pub fn release(mut self) -> Result<()> {
        match self.token.take() {
            Some(token) => self.provider.cancel(&self.name, &token),
            None => Ok(()),
        }
    }
}

impl Drop for LeaseGuard<'_> {
    fn drop(&mut self) {
        if let Some(token) = self.token.take()
            && let Err(e) = self.provider.cancel(&self.name, &token)
        {
            tracing::warn!(lease = %self.name, error = %e, "Failed to release lease");
        }
    }
}

impl fmt::Debug for LeaseGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeaseGuard")
            .field("name", &self.name)
            .field("held", &self.token.is_some())
            .finish()
    }
}

//! Outcome of one storage check.

use serde::Serialize;
use std::fmt;

/// Result of a leased storage check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckResult {
    /// Storage that was checked.
    pub storage: String,
    /// Probe outcome, or `None` if another checker held the lease.
    pub success: Option<bool>,
}

impl CheckResult {
    /// A check that ran and produced an outcome.
    #[must_use]
    pub fn checked(storage: impl Into<String>, success: bool) -> Self {
        Self {
            storage: storage.into(),
            success: Some(success),
        }
    }

    /// A check skipped because of lease contention.
    #[must_use]
    pub fn skipped(storage: impl Into<String>) -> Self {
        Self {
            storage: storage.into(),
            success: None,
        }
    }

    /// Returns `true` if the check was skipped.
    #[must_use]
    pub const fn is_skipped(&self) -> bool {
        self.success.is_none()
    }

    /// Metric label for this outcome.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self.success {
            Some(true) => "success",
            Some(false) => "failure",
            None => "skipped",
        }
    }
}

impl fmt::Display for CheckResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.success {
            Some(true) => write!(f, "{}: accessible", self.storage),
            Some(false) => write!(f, "{}: not accessible", self.storage),
            None => write!(f, "{}: skipped (check in progress elsewhere)", self.storage),
        }
    }
}

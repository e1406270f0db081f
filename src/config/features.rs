//! Feature flags gating breaker enforcement.

/// Environment variable that enables enforcement on a single host.
pub const HOST_OVERRIDE_ENV: &str = "GIT_STORAGE_CIRCUIT_BREAKER";

/// Feature flags for controlling breaker enforcement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureFlags {
    /// Fleet-wide toggle for circuit breaker enforcement.
    pub circuit_breaker: bool,
    /// Host-local override, normally taken from [`HOST_OVERRIDE_ENV`].
    pub host_override: bool,
}

impl FeatureFlags {
    /// Creates feature flags with enforcement disabled everywhere.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            circuit_breaker: false,
            host_override: false,
        }
    }

    /// Creates feature flags with fleet-wide enforcement.
    #[must_use]
    pub const fn enforcing() -> Self {
        Self {
            circuit_breaker: true,
            host_override: false,
        }
    }

    /// Returns `true` if breakers should refuse work for failing storages.
    #[must_use]
    pub const fn enforcement_enabled(&self) -> bool {
        self.circuit_breaker || self.host_override
    }

    /// Applies the host-local environment override.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(value) = std::env::var(HOST_OVERRIDE_ENV) {
            self.host_override = is_truthy(&value);
        }
        self
    }
}

pub(crate) fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_either_flag_enables_enforcement() {
        assert!(!FeatureFlags::none().enforcement_enabled());
        assert!(FeatureFlags::enforcing().enforcement_enabled());

        let host_only = FeatureFlags {
            circuit_breaker: false,
            host_override: true,
        };
        assert!(host_only.enforcement_enabled());
    }

    #[test]
    fn test_truthy_values() {
        assert!(is_truthy("1"));
        assert!(is_truthy("TRUE"));
        assert!(is_truthy(" yes "));
        assert!(!is_truthy("0"));
        assert!(!is_truthy("false"));
        assert!(!is_truthy("on"));
        assert!(!is_truthy(""));
    }
}

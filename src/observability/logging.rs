//! Structured logging configuration.

use crate::config::LoggingSettings;

const DEFAULT_FILTER: &str = "shardguard=info";
const VERBOSE_FILTER: &str = "shardguard=debug";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable, multi-line output.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

impl LogFormat {
    /// Parses a format name, defaulting to pretty output.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Pretty,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Output format.
    pub format: LogFormat,
    /// `tracing-subscriber` filter directive.
    pub filter: String,
}

impl LoggingConfig {
    /// Builds logging configuration from config settings with env overrides.
    ///
    /// `SHARDGUARD_LOG_FORMAT` overrides the format and `SHARDGUARD_LOG`
    /// overrides the filter. `verbose` raises the default filter to debug.
    #[must_use]
    pub fn from_settings(settings: Option<&LoggingSettings>, verbose: bool) -> Self {
        let default_filter = if verbose {
            VERBOSE_FILTER
        } else {
            DEFAULT_FILTER
        };

        let mut config = Self {
            format: settings
                .and_then(|s| s.format.as_deref())
                .map(LogFormat::parse)
                .unwrap_or_default(),
            filter: settings
                .and_then(|s| s.filter.clone())
                .unwrap_or_else(|| default_filter.to_string()),
        };

        if let Ok(format) = std::env::var("SHARDGUARD_LOG_FORMAT") {
            config.format = LogFormat::parse(&format);
        }
        if let Ok(filter) = std::env::var("SHARDGUARD_LOG")
            && !filter.trim().is_empty()
        {
            config.filter = filter;
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_format() {
        assert_eq!(LogFormat::parse("json"), LogFormat::Json);
        assert_eq!(LogFormat::parse("JSON "), LogFormat::Json);
        assert_eq!(LogFormat::parse("pretty"), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("anything"), LogFormat::Pretty);
    }

    #[test]
    fn test_settings_take_effect() {
        let settings = LoggingSettings {
            format: Some("json".to_string()),
            filter: Some("shardguard=trace".to_string()),
        };
        let config = LoggingConfig::from_settings(Some(&settings), false);
        if std::env::var("SHARDGUARD_LOG_FORMAT").is_err() {
            assert_eq!(config.format, LogFormat::Json);
        }
        if std::env::var("SHARDGUARD_LOG").is_err() {
            assert_eq!(config.filter, "shardguard=trace");
        }
    }
}

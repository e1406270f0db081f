//! Health CLI command.

use super::write_error;
use crate::services::{Health, HealthAggregator, HostFailure};
use crate::{Error, Result};
use serde::Serialize;
use std::io::Write;

/// Options for the health command.
#[derive(Debug, Clone, Copy, Default)]
pub struct HealthArgs {
    /// Only show storages with failing hosts.
    pub failing: bool,
    /// Emit JSON instead of text.
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct HealthReport<'a> {
    storage_name: &'a str,
    failing: bool,
    failing_on_hosts: Vec<&'a str>,
    total_failures: u64,
    info: &'a [HostFailure],
}

impl<'a> From<&'a Health> for HealthReport<'a> {
    fn from(health: &'a Health) -> Self {
        Self {
            storage_name: &health.storage_name,
            failing: health.failing(),
            failing_on_hosts: health.failing_on_hosts(),
            total_failures: health.total_failures(),
            info: &health.info,
        }
    }
}

/// Prints the fleet-wide health of the configured storages.
///
/// # Errors
///
/// Returns an error if the store cannot be read or the output cannot be written.
pub fn cmd_health(
    aggregator: &HealthAggregator,
    args: HealthArgs,
    out: &mut dyn Write,
) -> Result<()> {
    let healths = if args.failing {
        aggregator.for_failing_storages()?
    } else {
        aggregator.for_all_storages()?
    };

    if args.json {
        let reports: Vec<HealthReport<'_>> = healths.iter().map(HealthReport::from).collect();
        serde_json::to_writer_pretty(&mut *out, &reports).map_err(|e| Error::OperationFailed {
            operation: "serialize_health".to_string(),
            cause: e.to_string(),
        })?;
        writeln!(out).map_err(write_error)?;
        return Ok(());
    }

    if healths.is_empty() {
        let message = if args.failing {
            "No failing storages"
        } else {
            "No storages configured"
        };
        writeln!(out, "{message}").map_err(write_error)?;
        return Ok(());
    }

    for health in &healths {
        if health.failing() {
            writeln!(
                out,
                "{}: failing on {} ({} failures)",
                health.storage_name,
                health.failing_on_hosts().join(", "),
                health.total_failures()
            )
            .map_err(write_error)?;
        } else {
            writeln!(out, "{}: healthy", health.storage_name).map_err(write_error)?;
        }
    }
    Ok(())
}

//! Probe CLI command.

use super::write_error;
use crate::Result;
use crate::probe::IsolatedProbe;
use std::io::Write;
use std::path::Path;
use std::time::{Duration, Instant};

/// Runs the isolated prober against `path` and prints the verdict.
///
/// # Errors
///
/// Returns an error if the output cannot be written.
pub fn cmd_probe(
    probe: &IsolatedProbe,
    path: &Path,
    timeout: Duration,
    retries: u32,
    out: &mut dyn Write,
) -> Result<bool> {
    let started = Instant::now();
    let available = probe.available(path, timeout, retries);
    let elapsed = started.elapsed();

    let verdict = if available {
        "accessible"
    } else {
        "not accessible"
    };
    writeln!(
        out,
        "{}: {verdict} after {}ms",
        path.display(),
        elapsed.as_millis()
    )
    .map_err(write_error)?;
    Ok(available)
}

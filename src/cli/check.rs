//! Check CLI command.

use super::write_error;
use crate::Result;
use crate::models::CheckResult;
use crate::services::StorageChecker;
use std::io::Write;

/// Runs one check of every configured storage and prints the results.
///
/// Returns the results so the caller can pick an exit status.
///
/// # Errors
///
/// Returns an error if a check fails to run or the output cannot be written.
pub fn cmd_check(checker: &StorageChecker, out: &mut dyn Write) -> Result<Vec<CheckResult>> {
    let results = checker.check_all()?;
    print_results(&results, out)?;
    Ok(results)
}

pub(super) fn print_results(results: &[CheckResult], out: &mut dyn Write) -> Result<()> {
    if results.is_empty() {
        writeln!(out, "No storages configured").map_err(write_error)?;
        return Ok(());
    }
    for result in results {
        writeln!(out, "{result}").map_err(write_error)?;
    }
    Ok(())
}

/// Returns `true` unless a check ran and found its storage inaccessible.
#[must_use]
pub fn all_accessible(results: &[CheckResult]) -> bool {
    results.iter().all(|result| result.success != Some(false))
}

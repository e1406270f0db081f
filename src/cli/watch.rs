//! Watch CLI command.

use crate::services::StorageChecker;
use crate::{Error, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

/// Shortest accepted interval between check rounds.
pub const MIN_INTERVAL: Duration = Duration::from_millis(100);

/// Checks every storage each `interval` until `shutdown` completes.
///
/// A failed round is logged and the loop keeps going. A round in flight when
/// `shutdown` fires runs to completion first, so its leases are released.
/// Returns the number of completed rounds.
///
/// # Errors
///
/// Returns an error if a check round cannot be scheduled.
pub async fn cmd_watch<S>(
    checker: Arc<StorageChecker>,
    interval: Duration,
    shutdown: S,
) -> Result<u64>
where
    S: Future<Output = ()>,
{
    let mut ticker = tokio::time::interval(interval.max(MIN_INTERVAL));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::pin!(shutdown);

    let mut rounds = 0_u64;
    loop {
        tokio::select! {
            biased;
            () = &mut shutdown => {
                tracing::info!(rounds, "Stopping storage watch");
                return Ok(rounds);
            }
            _ = ticker.tick() => {}
        }

        let round = Arc::clone(&checker);
        let outcome = tokio::task::spawn_blocking(move || round.check_all())
            .await
            .map_err(|e| Error::OperationFailed {
                operation: "watch_check_round".to_string(),
                cause: e.to_string(),
            })?;
        rounds += 1;

        match outcome {
            Ok(results) => {
                let failed = results.iter().filter(|r| r.success == Some(false)).count();
                tracing::debug!(
                    round = rounds,
                    checked = results.len(),
                    failed,
                    "Storage check round finished"
                );
            },
            Err(e) => tracing::error!(round = rounds, error = %e, "Storage check round failed"),
        }
    }
}

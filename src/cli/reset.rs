//! Reset CLI command.

use super::write_error;
use crate::Result;
use crate::services::BreakerCache;
use std::io::Write;

/// Wipes all failure info, closing every circuit.
///
/// # Errors
///
/// Returns an error if the store cannot be wiped or the output cannot be written.
pub fn cmd_reset(cache: &mut BreakerCache, out: &mut dyn Write) -> Result<()> {
    cache.reset_all()?;
    writeln!(out, "All failure info has been reset").map_err(write_error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BreakerConfig;
    use crate::storage::{FailureStore, MemoryFailureStore};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_reset_wipes_store() {
        let store = Arc::new(MemoryFailureStore::new());
        store
            .record_failure("default", "a", Duration::from_secs(60))
            .unwrap();
        let mut cache = BreakerCache::new(Arc::new(BreakerConfig::new()), store.clone());
        let mut out = Vec::new();

        cmd_reset(&mut cache, &mut out).unwrap();

        assert!(store.is_empty());
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "All failure info has been reset\n"
        );
    }
}

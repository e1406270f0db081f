//! CLI command implementations.
//!
//! Each submodule implements one `shardguard` subcommand against the
//! library's services, writing human output to the given writer.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `check` | Check every configured storage once |
//! | `watch` | Check every storage on an interval until interrupted |
//! | `health` | Show fleet-wide failure info per storage |
//! | `reset` | Wipe all failure info |
//! | `probe` | Run the isolated prober against a path |
//!
//! # Example Usage
//!
//! ```bash
//! # Run one round of checks
//! shardguard --config /etc/shardguard/config.toml check
//!
//! # Show failing storages as JSON
//! shardguard health --failing --json
//! ```

mod check;
mod health;
mod probe;
mod reset;
mod watch;

pub use check::{all_accessible, cmd_check};
pub use health::{HealthArgs, cmd_health};
pub use probe::cmd_probe;
pub use reset::cmd_reset;
pub use watch::{MIN_INTERVAL, cmd_watch};

use crate::Error;

fn write_error(e: std::io::Error) -> Error {
    Error::OperationFailed {
        operation: "write_output".to_string(),
        cause: e.to_string(),
    }
}

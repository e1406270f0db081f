//! Binary entry point for shardguard.
//!
//! This binary checks storage shards and inspects or resets the shared
//! failure info the circuit breakers read.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow print_stderr in main binary for CLI output
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

use anyhow::Context;
use clap::{Parser, Subcommand};
use shardguard::cli::{self, HealthArgs};
use shardguard::observability::{self, ObservabilityConfig};
use shardguard::storage::SharedState;
use shardguard::{BreakerCache, BreakerConfig, HealthAggregator, IsolatedProbe, StorageChecker};
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

/// Shardguard - circuit breaker for networked git storage shards.
#[derive(Parser)]
#[command(name = "shardguard")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to configuration file.
    #[arg(short, long, global = true, env = "SHARDGUARD_CONFIG_PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Check every configured storage once.
    Check,

    /// Check every configured storage on an interval until Ctrl-C.
    Watch {
        /// Seconds between check rounds (defaults to the configured interval).
        #[arg(short, long)]
        interval: Option<u64>,
    },

    /// Show fleet-wide failure info per storage.
    Health {
        /// Only show storages with failing hosts.
        #[arg(long)]
        failing: bool,

        /// Emit JSON.
        #[arg(long)]
        json: bool,
    },

    /// Wipe all failure info, closing every circuit.
    Reset,

    /// Run the isolated prober against a path.
    Probe {
        /// Path to probe.
        path: PathBuf,

        /// Total time budget in milliseconds.
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Number of attempts.
        #[arg(long)]
        retries: Option<u32>,
    },
}

/// Main entry point.
#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e:#}");
            return ExitCode::FAILURE;
        },
    };

    let _observability = match observability::init(ObservabilityConfig::from_settings(
        &config.observability,
        cli.verbose,
    )) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Failed to initialize observability: {e}");
            return ExitCode::FAILURE;
        },
    };

    match run_command(cli.command, config).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        },
    }
}

/// Runs the selected command.
async fn run_command(command: Commands, config: BreakerConfig) -> anyhow::Result<ExitCode> {
    let mut stdout = io::stdout().lock();

    match command {
        Commands::Probe {
            path,
            timeout_ms,
            retries,
        } => {
            let timeout =
                timeout_ms.map_or_else(|| config.settings.storage_timeout(), Duration::from_millis);
            let retries = retries.unwrap_or(config.settings.access_retries);
            let probe = IsolatedProbe::new(config.probe.clone());
            let available = cli::cmd_probe(&probe, &path, timeout, retries, &mut stdout)?;
            Ok(exit_code(available))
        },
        Commands::Check => {
            let state = open_state(&config)?;
            let checker = StorageChecker::new(Arc::new(config), state.store, state.lease);
            let results = cli::cmd_check(&checker, &mut stdout)?;
            Ok(exit_code(cli::all_accessible(&results)))
        },
        Commands::Watch { interval } => {
            drop(stdout);
            let state = open_state(&config)?;
            let interval =
                interval.map_or_else(|| config.settings.check_interval(), Duration::from_secs);
            tracing::info!(
                storages = config.storages.len(),
                interval_secs = interval.as_secs(),
                "Watching storages"
            );
            let checker = Arc::new(StorageChecker::new(
                Arc::new(config),
                state.store,
                state.lease,
            ));
            cli::cmd_watch(checker, interval, async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %e, "Failed to listen for Ctrl-C");
                }
            })
            .await?;
            Ok(ExitCode::SUCCESS)
        },
        Commands::Health { failing, json } => {
            let state = open_state(&config)?;
            let aggregator = HealthAggregator::new(Arc::new(config), state.store);
            cli::cmd_health(&aggregator, HealthArgs { failing, json }, &mut stdout)?;
            Ok(ExitCode::SUCCESS)
        },
        Commands::Reset => {
            let state = open_state(&config)?;
            let mut cache = BreakerCache::new(Arc::new(config), state.store);
            cli::cmd_reset(&mut cache, &mut stdout)?;
            Ok(ExitCode::SUCCESS)
        },
    }
}

/// Opens the failure store and lease selected by the configuration.
fn open_state(config: &BreakerConfig) -> anyhow::Result<SharedState> {
    SharedState::from_config(config).context("failed to open shared state")
}

/// Loads configuration, then applies environment overrides.
fn load_config(path: Option<&Path>) -> anyhow::Result<BreakerConfig> {
    let config = match path {
        Some(path) => BreakerConfig::load_from_file(path)
            .with_context(|| format!("cannot load {}", path.display()))?,
        None => BreakerConfig::load_default(),
    };
    let config = config.with_env_overrides();
    config.validate()?;
    Ok(config)
}

const fn exit_code(ok: bool) -> ExitCode {
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

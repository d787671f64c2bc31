//! # resmgr
//!
//! Entry point of the resource manager simulation.
//!
//! ## Startup
//!
//! 1. **CLI and tracing** - parse flags, install the subscriber
//! 2. **Configuration** - file or defaults, `RESMGR_*` overrides, flags
//! 3. **Stop wiring** - SIGTERM/SIGINT handlers and the wall-clock timer
//! 4. **Coordinator** - run ticks until a stop arrives
//!
//! ## Shutdown
//!
//! Every live worker is terminated before the counters are reported, also
//! when the run aborts on a fatal error.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![deny(clippy::expect_used)]

mod cli;
mod log_file;

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use resmgr_master::{
    Master, RunStats, ShutdownCoordinator, arm_run_timer, install_signal_handlers,
};

use crate::cli::Cli;
use crate::log_file::{CappedLogFile, MAX_LOG_FILE_LINES};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_file.as_deref())?;

    let config = cli.resolve_config()?;
    info!(
        seed = ?config.seed,
        slots = config.slot_count,
        resources = config.resource_count,
        max_run_time_secs = config.max_run_time.as_secs_f64(),
        "resmgr starting"
    );

    let shutdown = Arc::new(ShutdownCoordinator::new());
    let signals = install_signal_handlers(Arc::clone(&shutdown));
    let timer = arm_run_timer(Arc::clone(&shutdown), config.max_run_time);

    let master =
        Master::new(config, Arc::clone(&shutdown)).context("failed to initialise the coordinator")?;
    let outcome = master.run().await;

    signals.abort();
    timer.abort();

    let stats = outcome.context("simulation aborted")?;
    report(&stats, cli.json)?;
    Ok(())
}

/// Initialize tracing: `info` by default, `debug` with `-v`, `RUST_LOG`
/// wins when set. With a log file, events go to stderr and the file; the
/// file stops growing after `MAX_LOG_FILE_LINES` lines.
fn init_tracing(verbose: bool, log_file: Option<&Path>) -> Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let file_layer = match log_file {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("failed to create log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(CappedLogFile::new(file, MAX_LOG_FILE_LINES)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    Ok(())
}

fn report(stats: &RunStats, json: bool) -> Result<()> {
    if json {
        let text = serde_json::to_string_pretty(stats).context("failed to encode counters")?;
        println!("{text}");
    } else {
        println!("Granted {} resources", stats.grants);
        println!("Processes spawned: {}", stats.spawned);
        println!("Processes terminated normally: {}", stats.normal_terminations);
        println!("Processes killed by deadlock recovery: {}", stats.deadlock_kills);
        println!("Deadlock detection runs: {}", stats.detection_runs);
        println!("Stopped at virtual time {}", stats.final_time);
    }
    Ok(())
}

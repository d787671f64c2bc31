//! CLI definitions using clap.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use resmgr_master::MasterConfig;

/// resmgr - single-node resource manager simulation
#[derive(Parser, Debug)]
#[command(name = "resmgr")]
#[command(version)]
#[command(about = "Grant typed resources to worker actors, block, wake and recover from deadlock")]
#[command(
    long_about = "resmgr runs a coordinator that spawns worker actors on a virtual clock, grants and reclaims a fixed pool of resources, and kills a victim whenever a circular wait is detected. It stops after the wall-clock bound or on SIGINT/SIGTERM."
)]
pub struct Cli {
    /// Log every protocol event, including table snapshots
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Wall-clock run bound in seconds
    #[arg(short = 't', long = "time", value_name = "SECONDS")]
    pub max_run_time: Option<u64>,

    /// TOML or JSON configuration file
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Seed for every random decision
    #[arg(long)]
    pub seed: Option<u64>,

    /// Also write the log to this file
    #[arg(long, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Print the final counters as JSON on stdout
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

impl Cli {
    /// Build the run configuration: file (or defaults), then `RESMGR_*`
    /// environment overrides, then command-line flags.
    pub fn resolve_config(&self) -> Result<MasterConfig> {
        let base = match &self.config {
            Some(path) => MasterConfig::from_file(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => MasterConfig::default(),
        };

        let mut config = base.with_env_overrides();
        if let Some(seed) = self.seed {
            config = config.seed(seed);
        }
        if let Some(secs) = self.max_run_time {
            config = config.max_run_time(Duration::from_secs(secs));
        }

        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

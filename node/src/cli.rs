//! # CLI Interface
//!
//! Command-line arguments for `strata-node`, using `clap` derive. Flags
//! override values from the TOML configuration file.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Strata consensus devnet node.
///
/// Runs several validators in one process on the block-proposal consensus
/// core and exposes Prometheus metrics.
#[derive(Parser, Debug)]
#[command(
    name = "strata-node",
    about = "Strata consensus devnet node",
    version,
    propagate_version = true
)]
pub struct StrataNodeCli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start a local devnet.
    Run(RunArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug, Default)]
pub struct RunArgs {
    /// Path to the node configuration file (TOML).
    #[arg(long, short = 'c', env = "STRATA_CONFIG")]
    pub config: Option<PathBuf>,

    /// Number of validators in the devnet.
    #[arg(long, env = "STRATA_VALIDATORS")]
    pub validators: Option<usize>,

    /// Stop after this many finalized heights. 0 runs until Ctrl+C.
    #[arg(long, env = "STRATA_HEIGHTS")]
    pub heights: Option<u64>,

    /// Listen address of the Prometheus endpoint.
    #[arg(long, env = "STRATA_METRICS_ADDR")]
    pub metrics_addr: Option<String>,

    /// Validators (by index) that are never started.
    #[arg(long, value_delimiter = ',')]
    pub offline: Vec<usize>,

    /// Demo transfers submitted before the first height.
    #[arg(long)]
    pub transfers: Option<u64>,

    /// Log output format: pretty or json.
    #[arg(long, env = "STRATA_LOG_FORMAT")]
    pub log_format: Option<String>,
}

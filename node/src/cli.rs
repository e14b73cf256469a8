//! # CLI Interface
//!
//! Defines the command-line argument structure for `lumen-node` using
//! `clap` derive. Supports three subcommands: `run`, `init`, and
//! `version`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Lumen guarded-spending node.
///
/// Serves the REST API over the merchant attestation ledger, the
/// allowance service, and the atomic purchase coordinator.
#[derive(Parser, Debug)]
#[command(
    name = "lumen-node",
    about = "Lumen guarded-spending service node",
    version,
    propagate_version = true
)]
pub struct LumenNodeCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands for the Lumen node binary.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the service node.
    Run(RunArgs),
    /// Initialize a new node — creates the data directory and generates
    /// a fresh signing keypair.
    Init(InitArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Path to the node data directory where the store and keys live.
    ///
    /// Created on first run if it does not exist.
    #[arg(long, short = 'd', env = "LUMEN_DATA_DIR", default_value = "~/.lumen")]
    pub data_dir: PathBuf,

    /// Port for the REST API.
    #[arg(
        long,
        env = "LUMEN_API_PORT",
        default_value_t = lumen_protocol::config::DEFAULT_API_PORT
    )]
    pub api_port: u16,

    /// Log output format: "pretty" or "json".
    #[arg(long, env = "LUMEN_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,

    /// Hex-encoded Ed25519 signing key for purchase group submission.
    ///
    /// If not provided, the node reads the key from the data directory.
    /// **Never pass this flag in production** — use a key file instead.
    #[arg(long, env = "LUMEN_SIGNING_KEY")]
    pub signing_key: Option<String>,
}

/// Arguments for the `init` subcommand.
#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Path to the data directory to initialize.
    #[arg(long, short = 'd', env = "LUMEN_DATA_DIR", default_value = "~/.lumen")]
    pub data_dir: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli_structure() {
        // Ensures the derive macros produce a valid CLI definition.
        LumenNodeCli::command().debug_assert();
    }
}

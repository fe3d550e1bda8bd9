//! CLI command definitions using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Operatify - generic reconciliation engine
#[derive(Parser, Debug)]
#[command(name = "operatify")]
#[command(version)]
#[command(about = "Reconcile declared resources against an external backend")]
#[command(
    long_about = "Operatify applies a manifest of A and B instances, drives each one through create, verify, update and delete against a simulated backend, and reports where every instance settled."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Apply a manifest and reconcile it until every instance settles
    Run {
        /// Operator configuration file (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Manifest of instances to apply (YAML)
        #[arg(short, long)]
        manifest: PathBuf,

        /// Delete every instance once settled and wait for removal
        #[arg(short, long, default_value_t = false)]
        delete: bool,

        /// Seconds to wait for each phase
        #[arg(short, long, default_value_t = 60)]
        timeout: u64,
    },

    /// Print the effective configuration
    Config {
        /// Operator configuration file (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

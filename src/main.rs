//! # Operatify - operator entry point
//!
//! `run` starts one controller and reconciliation loop per sample kind,
//! applies a manifest, waits until every instance has settled, optionally
//! deletes everything again, and prints a JSON summary. Ctrl+C stops it at
//! any point.

#![forbid(unsafe_code)]
#![forbid(clippy::unwrap_used)]
#![forbid(clippy::panic)]
#![deny(clippy::expect_used)]

mod cli;

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use operatify::{Manifest, Operator, OperatorConfig};

use crate::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    match cli.command {
        Commands::Run {
            config,
            manifest,
            delete,
            timeout,
        } => {
            let config = OperatorConfig::load(config.as_deref())?;
            let limit = Duration::from_secs(timeout);
            tokio::select! {
                result = run(&config, &manifest, delete, limit) => result,
                () = wait_for_shutdown() => Ok(()),
            }
        }
        Commands::Config { config } => {
            let config = OperatorConfig::load(config.as_deref())?;
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

/// Initialize tracing subscriber with environment filter.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn run(config: &OperatorConfig, manifest: &Path, delete: bool, limit: Duration) -> Result<()> {
    let manifest = Manifest::load(manifest)?;
    let operator = Operator::start(config)?;

    let outcome = drive(&operator, &manifest, delete, limit).await;
    operator.shutdown().await;
    outcome
}

async fn drive(
    operator: &Operator,
    manifest: &Manifest,
    delete: bool,
    limit: Duration,
) -> Result<()> {
    operator.apply(manifest).await?;
    let settled = operator.wait_settled(limit).await?;
    println!(
        "{}",
        serde_json::to_string_pretty(&settled).context("Failed to render summary")?
    );

    if delete {
        info!("Deleting all instances");
        operator.delete_all().await?;
        operator.wait_removed(limit).await?;
        info!("All instances removed");
    }
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C).
async fn wait_for_shutdown() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(err) => error!("Failed to listen for shutdown signal: {}", err),
    }
}

// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Accord Demonstration Node
//!
//! Entry point for the `accord-node` binary. Parses CLI arguments,
//! initializes logging, spins up an in-process network and runs the
//! requested scenario.
//!
//! The binary supports three subcommands:
//!
//! - `demo`    — run a scripted scenario and print the outcome
//! - `config`  — print the effective node configuration
//! - `version` — print build version information

mod cli;
mod logging;
mod scenario;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use std::time::Duration;
use tokio::signal;

use accord_protocol::config::{NodeConfig, WIRE_PROTOCOL_VERSION};

use cli::{AccordNodeCli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = AccordNodeCli::parse();
    logging::init_logging(&cli.log_level, cli.log_format);

    match cli.command {
        Commands::Demo(args) => run_demo(args).await,
        Commands::Config(args) => {
            let config = load_config(args.config.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Runs the chosen scenario, or stops early on Ctrl+C.
async fn run_demo(args: cli::DemoArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    tracing::info!(
        scenario = ?args.scenario,
        scheduler = config.scheduler_enabled,
        page_size = config.selection_page_size,
        "starting demo network"
    );

    let report = tokio::select! {
        report = scenario::run(args.scenario, &config, Duration::from_secs(args.expiry_secs)) => report?,
        _ = shutdown_signal() => {
            tracing::info!("interrupted, abandoning demo");
            return Ok(());
        }
    };

    if args.json {
        println!("{}", report.to_json()?);
    } else {
        report.print_table();
    }
    tracing::info!(steps = report.steps.len(), "demo complete");
    Ok(())
}

/// Reads and validates a JSON config file, or falls back to defaults.
fn load_config(path: Option<&Path>) -> Result<NodeConfig> {
    match path {
        Some(path) => NodeConfig::from_json_file(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Ok(NodeConfig::default()),
    }
}

fn print_version() {
    println!("accord-node {}", env!("CARGO_PKG_VERSION"));
    println!("wire        v{}", WIRE_PROTOCOL_VERSION);
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported. If a handler cannot be
/// installed the corresponding branch never completes.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

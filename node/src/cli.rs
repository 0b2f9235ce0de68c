//! # CLI Interface
//!
//! Defines the command-line argument structure for `accord-node` using
//! `clap` derive. Supports three subcommands: `demo`, `config` and
//! `version`.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::logging::LogFormat;

/// Accord demonstration node.
///
/// Spins up an in-process network of participants, runs a scripted
/// scenario end to end and prints what happened. Nothing is persisted.
#[derive(Parser, Debug)]
#[command(
    name = "accord-node",
    about = "Accord in-process demonstration network",
    version,
    propagate_version = true
)]
pub struct AccordNodeCli {
    /// Log output format.
    #[arg(long, global = true, value_enum, env = "ACCORD_LOG_FORMAT", default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    /// Default log filter when `RUST_LOG` is not set.
    #[arg(long, global = true, env = "ACCORD_LOG", default_value = "accord_node=info,accord_contracts=info,accord_protocol=warn")]
    pub log_level: String,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands for the Accord node binary.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a scripted scenario on a fresh in-process network.
    Demo(DemoArgs),
    /// Print the effective node configuration as JSON and exit.
    Config(ConfigArgs),
    /// Print version information and exit.
    Version,
}

/// Which story the demo tells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Scenario {
    /// Issue cash, pay with change, redeem.
    Tokens,
    /// Describe a car, offer it, accept with due diligence.
    Sale,
    /// Let a proposal lapse and watch the seller cancel it.
    Expiry,
    /// All of the above, in order.
    All,
}

/// Arguments for the `demo` subcommand.
#[derive(Parser, Debug)]
pub struct DemoArgs {
    /// Scenario to run.
    #[arg(value_enum, default_value_t = Scenario::All)]
    pub scenario: Scenario,

    /// Path to a JSON node configuration applied to every participant.
    #[arg(long, short = 'c', env = "ACCORD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Seconds until the demo proposal expires in the `expiry` scenario.
    #[arg(long, default_value_t = 3)]
    pub expiry_secs: u64,

    /// Print the outcome as JSON instead of a table.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `config` subcommand.
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Configuration file to validate and print. Defaults are printed
    /// when omitted.
    #[arg(long, short = 'c', env = "ACCORD_CONFIG")]
    pub config: Option<PathBuf>,
}

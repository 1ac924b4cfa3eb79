//! CLI type definitions
//!
//! This module contains clap command structures that define the CLI interface.

use clap::{Parser, Subcommand};

use super::commands::config::ConfigArgs;
use super::commands::investigate::InvestigateArgs;
use super::commands::report::ReportArgs;
use super::commands::worker::WorkerArgs;

#[derive(Parser)]
#[command(name = "sleuth")]
#[command(about = "Sleuth - multi-agent root-cause investigation", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Configuration file (defaults to .sleuth/config.yaml)
    #[arg(long, global = true)]
    pub config_file: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Investigate a defect and print the decision
    Investigate(InvestigateArgs),

    /// Run one trial worker (spawned by the supervisor)
    #[command(hide = true)]
    Worker(WorkerArgs),

    /// Configuration commands
    Config(ConfigArgs),

    /// Inspect persisted trial reports
    Report(ReportArgs),
}

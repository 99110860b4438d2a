//! Command-line interface.
//!
//! Unified CLI for diffred operations.

pub mod commands;

use clap::{Parser, Subcommand};

/// diffred - phase-gated diffraction data reduction.
#[derive(Parser, Debug)]
#[command(name = "diffred")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path.
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Reduce every crystal in the configuration.
    Run(commands::RunArgs),
    /// Configuration operations.
    Config(commands::ConfigArgs),
    /// Run lattice selection over a Bravais-settings summary.
    Select(commands::SelectArgs),
    /// Inspect persisted state.
    Inspect(commands::InspectArgs),
}

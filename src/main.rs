//! diffred - unified CLI entrypoint.
//!
//! Usage:
//!   diffred run --config diffred.toml [--state work/state.json]
//!   diffred config validate --config diffred.toml
//!   diffred config show --config diffred.toml [--format json]
//!   diffred select <bravais_summary.json> [--lattice tP] [--cell a,b,c,al,be,ga]
//!   diffred inspect state <file>

use anyhow::Result;
use clap::Parser;
use diffred::cli::commands::{run_config, run_inspect, run_pipeline, run_select};
use diffred::cli::{Cli, Commands};
use std::path::PathBuf;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Determine config path - use global --config or default
    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("diffred.toml"));

    match cli.command {
        Commands::Run(args) => run_pipeline(&config_path, cli.log_level, args),
        Commands::Config(args) => run_config(&config_path, args),
        Commands::Select(args) => run_select(args),
        Commands::Inspect(args) => run_inspect(args),
    }
}

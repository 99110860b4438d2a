//! Inspect command implementation.

use crate::storage::ProjectState;
use anyhow::Result;
use clap::{Args, Subcommand};
use std::path::PathBuf;

/// Inspect persisted state.
#[derive(Args, Debug)]
pub struct InspectArgs {
    #[command(subcommand)]
    pub command: InspectCommand,
}

/// Inspect subcommands.
#[derive(Subcommand, Debug)]
pub enum InspectCommand {
    /// Summarise a saved project state.
    State {
        /// State file (JSON, or bincode with a .bin extension).
        path: PathBuf,
        /// Print the full state as JSON.
        #[arg(long)]
        json: bool,
    },
}

/// Run the inspect command.
pub fn run_inspect(args: InspectArgs) -> Result<()> {
    match args.command {
        InspectCommand::State { path, json } => {
            let state = ProjectState::read_from_file(&path)?;
            if json {
                println!("{}", state.to_json()?);
                return Ok(());
            }

            println!("State: {:?}", path);
            println!("  Format:  {}", state.format);
            println!("  Saved:   {}", state.saved_at);
            println!("  Stages:  {}", state.stage_count());
            for (label, refiner) in &state.refiners {
                println!("  {} [{:?}] {:?}", label, refiner.flags.state(), refiner.stage.kind);
                for (epoch, indexer) in &refiner.stage.indexers {
                    let lattice = indexer
                        .stage
                        .solution
                        .as_ref()
                        .map(|s| s.lattice.to_string())
                        .unwrap_or_else(|| "-".to_string());
                    println!(
                        "    epoch {}: {} [{:?}] lattice {}",
                        epoch,
                        indexer.name,
                        indexer.flags.state(),
                        lattice
                    );
                }
            }
            for (label, integrater) in &state.integraters {
                println!("  {} [{:?}]", label, integrater.flags.state());
            }
            for (label, scaler) in &state.scalers {
                println!("  {} [{:?}]", label, scaler.flags.state());
            }
        }
    }
    Ok(())
}

//! Run command implementation.

use crate::core::config::{Config, ConfigOverrides};
use crate::hierarchy::HierarchyCoordinator;
use crate::lattice::TabulatedSymmetry;
use crate::programs::{CommandSuite, Role};
use crate::storage::ProjectState;
use anyhow::{Context, Result};
use clap::Args;
use std::path::{Path, PathBuf};

/// Reduce every crystal in the configuration.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Override the working directory.
    #[arg(long)]
    pub working_directory: Option<PathBuf>,

    /// Override the worker count handed to external programs.
    #[arg(long)]
    pub nproc: Option<usize>,

    /// Refine all sweeps of a crystal together.
    #[arg(long)]
    pub joint_refinement: bool,

    /// Pin the indexer implementation.
    #[arg(long)]
    pub indexer: Option<String>,

    /// Pin the refiner implementation.
    #[arg(long)]
    pub refiner: Option<String>,

    /// Pin the integrater implementation.
    #[arg(long)]
    pub integrater: Option<String>,

    /// Pin the scaler implementation.
    #[arg(long)]
    pub scaler: Option<String>,

    /// Stage state file, restored before and saved after the run.
    #[arg(long)]
    pub state: Option<PathBuf>,
}

impl RunArgs {
    fn overrides(&self, log_level: Option<String>) -> ConfigOverrides {
        let preferences = [
            (Role::Indexer, &self.indexer),
            (Role::Refiner, &self.refiner),
            (Role::Integrater, &self.integrater),
            (Role::Scaler, &self.scaler),
        ]
        .into_iter()
        .filter_map(|(role, name)| name.clone().map(|n| (role, n)))
        .collect();

        ConfigOverrides {
            log_level,
            working_directory: self.working_directory.clone(),
            nproc: self.nproc,
            joint_refinement: self.joint_refinement,
            preferences,
        }
    }
}

/// Initialize tracing subscriber if the telemetry feature is enabled.
#[cfg(feature = "telemetry")]
fn init_tracing(level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();
}

#[cfg(not(feature = "telemetry"))]
fn init_tracing(_level: &str) {}

/// Run the pipeline with the given config path.
pub fn run_pipeline(config_path: &Path, log_level: Option<String>, args: RunArgs) -> Result<()> {
    let mut config = Config::from_file(config_path)
        .with_context(|| format!("failed to load config from {:?}", config_path))?;
    config.apply_overrides(&args.overrides(log_level));
    config.validate()?;

    init_tracing(&config.telemetry.log_level);

    let suite = CommandSuite::new(
        config.programs.search_path.clone(),
        config.programs.executables.clone(),
    );
    let mut coordinator =
        HierarchyCoordinator::from_config(&config, Box::new(suite), Box::new(TabulatedSymmetry))?;

    if let Some(path) = args.state.as_deref().filter(|p| p.exists()) {
        let state = ProjectState::read_from_file(path)?;
        coordinator.restore(state)?;
        tracing::info!(path = %path.display(), "resuming from saved state");
    }

    let outcomes = coordinator.run_all();

    if let Some(path) = args.state.as_deref() {
        coordinator
            .snapshot()
            .write_to_file(path)
            .with_context(|| format!("failed to save state to {:?}", path))?;
    }

    let mut failed = Vec::new();
    for (crystal, outcome) in &outcomes {
        match outcome {
            Ok(result) => {
                println!("✓ {}", crystal);
                for file in &result.reflections {
                    println!("    {}", file.display());
                }
            }
            Err(e) => {
                println!("✗ {}: {}", crystal, e);
                failed.push(crystal.as_str());
            }
        }
    }

    if !failed.is_empty() {
        anyhow::bail!("reduction failed for: {}", failed.join(", "));
    }
    Ok(())
}

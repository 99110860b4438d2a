//! Config command implementation.

use crate::core::config::Config;
use anyhow::Result;
use clap::{Args, Subcommand};
use std::path::Path;

/// Configuration operations.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Validate configuration file.
    Validate,
    /// Print configuration with defaults.
    Show {
        /// Output format (toml, json).
        #[arg(long, default_value = "toml")]
        format: String,
    },
    /// Print a configuration template.
    Generate,
}

/// Run the config command.
pub fn run_config(config_path: &Path, args: ConfigArgs) -> Result<()> {
    match args.command {
        ConfigCommand::Validate => validate_config(config_path),
        ConfigCommand::Show { format } => show_config(config_path, &format),
        ConfigCommand::Generate => {
            println!("{}", config_template());
            Ok(())
        }
    }
}

fn validate_config(path: &Path) -> Result<()> {
    if !path.exists() {
        anyhow::bail!("Config file not found: {:?}", path);
    }
    let config = Config::from_file(path)?;
    println!("✓ Config file is valid");

    if config.crystals.is_empty() {
        println!("  ⚠ Warning: no [[crystals]] defined");
    }
    for crystal in &config.crystals {
        let sweeps: usize = crystal.wavelengths.iter().map(|w| w.sweeps.len()).sum();
        if sweeps == 0 {
            println!("  ⚠ Warning: crystal {} has no sweeps", crystal.name);
        }
        if config.preferences.scaler.as_deref() == Some("null") {
            for sweep in crystal.wavelengths.iter().flat_map(|w| &w.sweeps) {
                if sweep.reflections.is_none() {
                    println!(
                        "  ⚠ Warning: sweep {} has no reflections for the null scaler",
                        sweep.name
                    );
                }
            }
        }
    }

    println!("✓ Configuration validation complete");
    Ok(())
}

fn show_config(path: &Path, format: &str) -> Result<()> {
    let config = Config::from_file(path)?;
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&config)?),
        _ => println!("{}", config.to_toml()?),
    }
    Ok(())
}

fn config_template() -> &'static str {
    r#"# diffred configuration

[pipeline]
working_directory = "work"
nproc = 4
joint_refinement = false
trust_beam_centre = false

[preferences]
# indexer = "dials"
# refiner = "dials"
# integrater = "dials"
# scaler = "aimless"

[programs]
search_path = []

[selection]
cell_length_tolerance = 0.05
cell_angle_tolerance = 5.0

[telemetry]
log_level = "info"

[[crystals]]
name = "lyso"
# lattice = "tP"
# cell = [78.1, 78.1, 37.2, 90.0, 90.0, 90.0]

[[crystals.wavelengths]]
name = "native"
wavelength = 0.9795

[[crystals.wavelengths.sweeps]]
name = "sweep1"
template = "lyso_1_####.cbf"
directory = "/data/lyso"
first_image = 1
last_image = 900
epoch = 1
"#
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_parses() {
        let config = Config::from_toml(config_template()).unwrap();
        assert_eq!(config.pipeline.nproc, 4);
        assert_eq!(config.crystals.len(), 1);
        assert_eq!(config.crystals[0].wavelengths[0].sweeps[0].last_image, 900);
    }
}

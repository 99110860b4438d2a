//! Configuration parsing and validation.
//!
//! diffred configuration is loaded from a TOML file with CLI overrides. It
//! carries the pipeline settings, the resolved role preferences, program
//! lookup, lattice selection tolerances and the crystal → wavelength →
//! sweep project description.

use crate::lattice::{BravaisLattice, CellTolerance, SelectionThresholds, UnitCell};
use crate::programs::Role;
use crate::stage::StageSettings;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

/// Top-level diffred configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Pipeline-wide settings.
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Role → implementation preferences.
    #[serde(default)]
    pub preferences: PreferencesConfig,

    /// External program lookup.
    #[serde(default)]
    pub programs: ProgramsConfig,

    /// Lattice selection tolerances.
    #[serde(default)]
    pub selection: SelectionConfig,

    /// Logging configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,

    /// Crystals to reduce.
    #[serde(default)]
    pub crystals: Vec<CrystalConfig>,
}

/// Pipeline-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Root directory for program working directories.
    #[serde(default = "default_working_directory")]
    pub working_directory: PathBuf,

    /// Worker count handed to external programs.
    #[serde(default = "default_nproc")]
    pub nproc: usize,

    /// Refine all sweeps of a crystal together when the refiner allows it.
    #[serde(default)]
    pub joint_refinement: bool,

    /// Skip beam-centre discovery during indexing.
    #[serde(default)]
    pub trust_beam_centre: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            working_directory: default_working_directory(),
            nproc: default_nproc(),
            joint_refinement: false,
            trust_beam_centre: false,
        }
    }
}

/// Implementation names pinned per role.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PreferencesConfig {
    #[serde(default)]
    pub indexer: Option<String>,
    #[serde(default)]
    pub refiner: Option<String>,
    #[serde(default)]
    pub integrater: Option<String>,
    #[serde(default)]
    pub scaler: Option<String>,
}

impl PreferencesConfig {
    /// Preference for one role.
    pub fn get(&self, role: Role) -> Option<&str> {
        match role {
            Role::Indexer => self.indexer.as_deref(),
            Role::Refiner => self.refiner.as_deref(),
            Role::Integrater => self.integrater.as_deref(),
            Role::Scaler => self.scaler.as_deref(),
        }
    }

    /// Set the preference for one role.
    pub fn set(&mut self, role: Role, name: Option<String>) {
        match role {
            Role::Indexer => self.indexer = name,
            Role::Refiner => self.refiner = name,
            Role::Integrater => self.integrater = name,
            Role::Scaler => self.scaler = name,
        }
    }
}

/// External program lookup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgramsConfig {
    /// Directories searched before `PATH`.
    #[serde(default)]
    pub search_path: Vec<PathBuf>,

    /// Explicit executable per tool name, e.g. `"dials.index"`.
    #[serde(default)]
    pub executables: BTreeMap<String, PathBuf>,
}

/// Lattice selection tolerances.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionConfig {
    #[serde(default = "default_cell_length_tolerance")]
    pub cell_length_tolerance: f64,
    #[serde(default = "default_cell_angle_tolerance")]
    pub cell_angle_tolerance: f64,
    #[serde(default = "default_tight_angular_deviation")]
    pub tight_angular_deviation: f64,
    #[serde(default = "default_tight_min_cc")]
    pub tight_min_cc: f64,
    #[serde(default = "default_tight_rmsd_ratio")]
    pub tight_rmsd_ratio: f64,
    #[serde(default = "default_loose_min_cc")]
    pub loose_min_cc: f64,
    #[serde(default = "default_loose_rmsd_ratio")]
    pub loose_rmsd_ratio: f64,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            cell_length_tolerance: default_cell_length_tolerance(),
            cell_angle_tolerance: default_cell_angle_tolerance(),
            tight_angular_deviation: default_tight_angular_deviation(),
            tight_min_cc: default_tight_min_cc(),
            tight_rmsd_ratio: default_tight_rmsd_ratio(),
            loose_min_cc: default_loose_min_cc(),
            loose_rmsd_ratio: default_loose_rmsd_ratio(),
        }
    }
}

impl SelectionConfig {
    /// Acceptance-rule thresholds.
    pub fn thresholds(&self) -> SelectionThresholds {
        SelectionThresholds {
            tight_angular_deviation: self.tight_angular_deviation,
            tight_min_cc: self.tight_min_cc,
            tight_rmsd_ratio: self.tight_rmsd_ratio,
            loose_min_cc: self.loose_min_cc,
            loose_rmsd_ratio: self.loose_rmsd_ratio,
        }
    }

    /// Cell comparison tolerance.
    pub fn tolerance(&self) -> CellTolerance {
        CellTolerance {
            length_fraction: self.cell_length_tolerance,
            angle_degrees: self.cell_angle_tolerance,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

/// One crystal and its datasets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrystalConfig {
    pub name: String,

    /// Asserted Bravais lattice, e.g. `"tP"`.
    #[serde(default)]
    pub lattice: Option<BravaisLattice>,

    /// Asserted cell; requires `lattice`.
    #[serde(default)]
    pub cell: Option<UnitCell>,

    #[serde(default)]
    pub wavelengths: Vec<WavelengthConfig>,
}

/// One wavelength of a crystal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WavelengthConfig {
    pub name: String,

    /// Wavelength in Å.
    pub wavelength: f64,

    #[serde(default)]
    pub sweeps: Vec<SweepConfig>,
}

/// One sweep of images.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    pub name: String,
    pub template: String,
    pub directory: PathBuf,
    pub first_image: u32,
    pub last_image: u32,
    /// Orders sweeps within a crystal.
    pub epoch: u64,
    #[serde(default)]
    pub beam: Option<[f64; 2]>,
    #[serde(default)]
    pub distance: Option<f64>,
    /// High-resolution limit (Å).
    #[serde(default)]
    pub resolution: Option<f64>,
    /// Pre-reduced reflections used by the null scaler.
    #[serde(default)]
    pub reflections: Option<PathBuf>,
}

fn default_working_directory() -> PathBuf {
    PathBuf::from("work")
}

fn default_nproc() -> usize {
    1
}

fn default_cell_length_tolerance() -> f64 {
    0.05
}

fn default_cell_angle_tolerance() -> f64 {
    5.0
}

fn default_tight_angular_deviation() -> f64 {
    0.5
}

fn default_tight_min_cc() -> f64 {
    0.5
}

fn default_tight_rmsd_ratio() -> f64 {
    2.0
}

fn default_loose_min_cc() -> f64 {
    0.7
}

fn default_loose_rmsd_ratio() -> f64 {
    1.5
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| "failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).with_context(|| "failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).with_context(|| "failed to render config")
    }

    /// Apply CLI overrides to the configuration.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(ref log_level) = overrides.log_level {
            self.telemetry.log_level = log_level.clone();
        }
        if let Some(ref dir) = overrides.working_directory {
            self.pipeline.working_directory = dir.clone();
        }
        if let Some(nproc) = overrides.nproc {
            self.pipeline.nproc = nproc;
        }
        if overrides.joint_refinement {
            self.pipeline.joint_refinement = true;
        }
        for (role, name) in &overrides.preferences {
            self.preferences.set(*role, Some(name.clone()));
        }
    }

    /// Settings handed to every stage.
    pub fn stage_settings(&self) -> StageSettings {
        StageSettings {
            working_directory: self.pipeline.working_directory.clone(),
            nproc: self.pipeline.nproc,
            trust_beam_centre: self.pipeline.trust_beam_centre,
            thresholds: self.selection.thresholds(),
            tolerance: self.selection.tolerance(),
        }
    }

    /// Validate configuration consistency.
    pub fn validate(&self) -> Result<()> {
        self.validate_pipeline()?;
        self.validate_preferences()?;
        self.validate_selection()?;
        self.validate_telemetry()?;
        self.validate_crystals()?;
        Ok(())
    }

    fn validate_pipeline(&self) -> Result<()> {
        if self.pipeline.nproc == 0 {
            anyhow::bail!("pipeline.nproc must be > 0");
        }
        if self.pipeline.working_directory.as_os_str().is_empty() {
            anyhow::bail!("pipeline.working_directory must not be empty");
        }
        Ok(())
    }

    fn validate_preferences(&self) -> Result<()> {
        for role in [Role::Indexer, Role::Refiner, Role::Integrater, Role::Scaler] {
            if let Some(name) = self.preferences.get(role) {
                let known = role.implementations();
                if !known.iter().any(|k| *k == name) {
                    anyhow::bail!(
                        "preferences.{} must be one of {:?}, got: {}",
                        role,
                        known,
                        name
                    );
                }
            }
        }
        Ok(())
    }

    fn validate_selection(&self) -> Result<()> {
        let s = &self.selection;
        let values = [
            ("cell_length_tolerance", s.cell_length_tolerance),
            ("cell_angle_tolerance", s.cell_angle_tolerance),
            ("tight_angular_deviation", s.tight_angular_deviation),
            ("tight_min_cc", s.tight_min_cc),
            ("tight_rmsd_ratio", s.tight_rmsd_ratio),
            ("loose_min_cc", s.loose_min_cc),
            ("loose_rmsd_ratio", s.loose_rmsd_ratio),
        ];
        for (key, value) in values {
            if !(value > 0.0) {
                anyhow::bail!("selection.{} must be > 0, got: {}", key, value);
            }
        }
        Ok(())
    }

    fn validate_telemetry(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.telemetry.log_level.as_str()) {
            anyhow::bail!(
                "telemetry.log_level must be one of {:?}, got: {}",
                valid_levels,
                self.telemetry.log_level
            );
        }
        Ok(())
    }

    fn validate_crystals(&self) -> Result<()> {
        let mut crystal_names = HashSet::new();
        let mut sweep_names = HashSet::new();

        for crystal in &self.crystals {
            if !crystal_names.insert(crystal.name.as_str()) {
                anyhow::bail!("crystals: duplicate crystal name: {}", crystal.name);
            }
            if crystal.cell.is_some() && crystal.lattice.is_none() {
                anyhow::bail!(
                    "crystals.{}.cell requires crystals.{}.lattice",
                    crystal.name,
                    crystal.name
                );
            }

            let mut epochs = HashSet::new();
            for wavelength in &crystal.wavelengths {
                if !(wavelength.wavelength > 0.0) {
                    anyhow::bail!(
                        "crystals.{}.wavelengths.{}.wavelength must be > 0, got: {}",
                        crystal.name,
                        wavelength.name,
                        wavelength.wavelength
                    );
                }
                for sweep in &wavelength.sweeps {
                    if !sweep_names.insert(sweep.name.as_str()) {
                        anyhow::bail!("sweeps: duplicate sweep name: {}", sweep.name);
                    }
                    if sweep.first_image > sweep.last_image {
                        anyhow::bail!(
                            "sweep {}: first_image ({}) cannot exceed last_image ({})",
                            sweep.name,
                            sweep.first_image,
                            sweep.last_image
                        );
                    }
                    if !epochs.insert(sweep.epoch) {
                        anyhow::bail!(
                            "sweep {}: epoch {} already used in crystal {}",
                            sweep.name,
                            sweep.epoch,
                            crystal.name
                        );
                    }
                }
            }
        }
        Ok(())
    }
}

/// CLI override options that can be applied to configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Override log level.
    pub log_level: Option<String>,
    /// Override working directory.
    pub working_directory: Option<PathBuf>,
    /// Override worker count.
    pub nproc: Option<usize>,
    /// Force joint refinement on.
    pub joint_refinement: bool,
    /// Pin role implementations.
    pub preferences: Vec<(Role, String)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROJECT: &str = r#"
[pipeline]
working_directory = "/tmp/diffred"
nproc = 4

[preferences]
indexer = "dials"
scaler = "null"

[[crystals]]
name = "lyso"
lattice = "tP"
cell = [78.1, 78.1, 37.2, 90.0, 90.0, 90.0]

[[crystals.wavelengths]]
name = "NATIVE"
wavelength = 0.9795

[[crystals.wavelengths.sweeps]]
name = "SWEEP1"
template = "lyso_1_####.cbf"
directory = "/data/lyso"
first_image = 1
last_image = 360
epoch = 1
beam = [211.2, 219.4]
"#;

    #[test]
    fn project_template_parses() {
        let config = Config::from_toml(PROJECT).unwrap();
        assert_eq!(config.pipeline.nproc, 4);
        assert_eq!(config.preferences.get(Role::Indexer), Some("dials"));
        let crystal = &config.crystals[0];
        assert_eq!(crystal.lattice, Some(BravaisLattice::Tp));
        assert_eq!(crystal.wavelengths[0].sweeps[0].last_image, 360);
        assert_eq!(config.selection.tight_min_cc, 0.5);
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.pipeline.working_directory, PathBuf::from("work"));
        assert_eq!(config.telemetry.log_level, "info");
        assert!(config.crystals.is_empty());
    }

    #[test]
    fn unknown_preference_is_rejected() {
        let err = Config::from_toml("[preferences]\nscaler = \"scala\"\n").unwrap_err();
        assert!(err.to_string().contains("preferences.scaler"));
    }

    #[test]
    fn overrides_pin_roles() {
        let mut config = Config::default();
        config.apply_overrides(&ConfigOverrides {
            nproc: Some(8),
            preferences: vec![(Role::Refiner, "xds".to_string())],
            ..Default::default()
        });
        assert_eq!(config.pipeline.nproc, 8);
        assert_eq!(config.preferences.get(Role::Refiner), Some("xds"));
    }
}

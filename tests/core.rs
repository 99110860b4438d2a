//! Core infrastructure tests.

mod common;

use diffred::core::config::{Config, ConfigOverrides};
use diffred::core::error::{NoSolutionReason, PipelineError};
use diffred::lattice::{BravaisLattice, UnitCell};
use diffred::programs::Role;
use std::io::Write;
use std::path::PathBuf;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

const TWO_SWEEPS: &str = r#"
[pipeline]
working_directory = "/tmp/diffred-test"
nproc = 2
joint_refinement = true

[preferences]
refiner = "dials"

[selection]
tight_min_cc = 0.6

[[crystals]]
name = "thau"
lattice = "tP"

[[crystals.wavelengths]]
name = "SAD"
wavelength = 0.9795

[[crystals.wavelengths.sweeps]]
name = "SWEEP1"
template = "thau_1_####.cbf"
directory = "/data/thau"
first_image = 1
last_image = 180
epoch = 10

[[crystals.wavelengths.sweeps]]
name = "SWEEP2"
template = "thau_2_####.cbf"
directory = "/data/thau"
first_image = 1
last_image = 180
epoch = 20
resolution = 1.8
"#;

// ============================================================================
// Config tests
// ============================================================================

#[test]
fn parse_project_config() {
    let file = write_config(TWO_SWEEPS);
    let config = Config::from_file(file.path()).unwrap();

    assert_eq!(config.pipeline.nproc, 2);
    assert!(config.pipeline.joint_refinement);
    assert_eq!(config.preferences.get(Role::Refiner), Some("dials"));
    assert_eq!(config.preferences.get(Role::Scaler), None);

    let crystal = &config.crystals[0];
    assert_eq!(crystal.lattice, Some(BravaisLattice::Tp));
    assert!(crystal.cell.is_none());
    let sweeps = &crystal.wavelengths[0].sweeps;
    assert_eq!(sweeps.len(), 2);
    assert_eq!(sweeps[1].epoch, 20);
    assert_eq!(sweeps[1].resolution, Some(1.8));
}

#[test]
fn selection_section_feeds_stage_settings() {
    let config = Config::from_toml(TWO_SWEEPS).unwrap();
    let settings = config.stage_settings();

    assert_eq!(settings.working_directory, PathBuf::from("/tmp/diffred-test"));
    assert_eq!(settings.nproc, 2);
    assert_eq!(settings.thresholds.tight_min_cc, 0.6);
    // Unset keys keep their defaults.
    assert_eq!(settings.thresholds.loose_rmsd_ratio, 1.5);
    assert_eq!(settings.tolerance.length_fraction, 0.05);
    assert_eq!(settings.tolerance.angle_degrees, 5.0);
}

#[test]
fn missing_file_reports_path() {
    let err = Config::from_file(std::path::Path::new("/nonexistent/diffred.toml")).unwrap_err();
    assert!(err.to_string().contains("failed to read config file"));
}

#[test]
fn validate_zero_nproc() {
    let file = write_config("[pipeline]\nnproc = 0\n");
    let err = Config::from_file(file.path()).unwrap_err();
    assert!(err.to_string().contains("nproc"));
}

#[test]
fn validate_unknown_preference() {
    let err = Config::from_toml("[preferences]\nindexer = \"denzo\"\n").unwrap_err();
    let message = err.to_string();
    assert!(message.contains("preferences.indexer"));
    assert!(message.contains("denzo"));
}

#[test]
fn validate_cell_requires_lattice() {
    let content = r#"
[[crystals]]
name = "lyso"
cell = [78.1, 78.1, 37.2, 90.0, 90.0, 90.0]
"#;
    let err = Config::from_toml(content).unwrap_err();
    assert!(err.to_string().contains("requires"));
}

#[test]
fn validate_duplicate_epoch_in_crystal() {
    let content = TWO_SWEEPS.replace("epoch = 20", "epoch = 10");
    let err = Config::from_toml(&content).unwrap_err();
    assert!(err.to_string().contains("epoch 10 already used"));
}

#[test]
fn validate_inverted_wedge() {
    let content = TWO_SWEEPS.replacen("first_image = 1", "first_image = 200", 1);
    let err = Config::from_toml(&content).unwrap_err();
    assert!(err.to_string().contains("first_image"));
}

#[test]
fn validate_log_level() {
    let err = Config::from_toml("[telemetry]\nlog_level = \"verbose\"\n").unwrap_err();
    assert!(err.to_string().contains("log_level"));
}

#[test]
fn validate_selection_thresholds_positive() {
    let err = Config::from_toml("[selection]\nloose_min_cc = 0.0\n").unwrap_err();
    assert!(err.to_string().contains("selection.loose_min_cc"));
}

#[test]
fn overrides_apply_on_top_of_file() {
    let mut config = Config::from_toml(TWO_SWEEPS).unwrap();
    config.apply_overrides(&ConfigOverrides {
        log_level: Some("debug".to_string()),
        working_directory: Some(PathBuf::from("/scratch")),
        nproc: Some(16),
        joint_refinement: false,
        preferences: vec![
            (Role::Indexer, "xds".to_string()),
            (Role::Scaler, "null".to_string()),
        ],
    });

    assert_eq!(config.telemetry.log_level, "debug");
    assert_eq!(config.pipeline.working_directory, PathBuf::from("/scratch"));
    assert_eq!(config.pipeline.nproc, 16);
    // A false flag does not switch joint refinement off.
    assert!(config.pipeline.joint_refinement);
    assert_eq!(config.preferences.get(Role::Indexer), Some("xds"));
    assert_eq!(config.preferences.get(Role::Scaler), Some("null"));
    config.validate().unwrap();
}

#[test]
fn rendered_config_parses_back() {
    let config = Config::from_toml(TWO_SWEEPS).unwrap();
    let rendered = config.to_toml().unwrap();
    let back = Config::from_toml(&rendered).unwrap();
    assert_eq!(back.crystals[0].wavelengths[0].sweeps[1].name, "SWEEP2");
    assert_eq!(back.selection.tight_min_cc, 0.6);
}

// ============================================================================
// Error tests
// ============================================================================

#[test]
fn stage_failures_are_retriable() {
    let err = PipelineError::stage("SWEEP1/index", "dials.index exited with status 1");
    assert!(err.is_stage_failure());
    assert!(err.is_retriable());
    assert!(!err.is_fatal());
    assert_eq!(
        err.to_string(),
        "stage SWEEP1/index failed: dials.index exited with status 1"
    );
}

#[test]
fn io_and_malformed_count_as_stage_failures() {
    let io = PipelineError::io(
        "reading bravais summary",
        std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
    );
    let malformed = PipelineError::malformed("bravais summary", "expected object");
    assert!(io.is_retriable());
    assert!(malformed.is_retriable());
    assert_eq!(malformed.to_string(), "malformed bravais summary: expected object");
}

#[test]
fn configuration_and_unavailable_are_fatal() {
    let config = PipelineError::configuration("scaler scala unknown");
    assert!(config.is_fatal());
    assert!(!config.is_retriable());
    assert_eq!(config.to_string(), "configuration error: scaler scala unknown");

    let unavailable = PipelineError::NotAvailable {
        role: "scaler".to_string(),
        attempted: vec!["xscale".to_string()],
    };
    assert!(unavailable.is_fatal());
    assert_eq!(
        unavailable.to_string(),
        "no scaler implementation available (tried: xscale)"
    );
}

#[test]
fn no_solution_exposes_reason() {
    let err = PipelineError::no_solution(NoSolutionReason::CellMismatch {
        lattice: BravaisLattice::Tp,
        cell: UnitCell::new(78.0, 78.0, 37.0, 90.0, 90.0, 90.0),
    });
    assert!(!err.is_fatal());
    assert!(!err.is_stage_failure());
    assert!(matches!(
        err.no_solution_reason(),
        Some(NoSolutionReason::CellMismatch {
            lattice: BravaisLattice::Tp,
            ..
        })
    ));
    assert!(err.to_string().starts_with("no solution: cell mismatch"));

    let other = PipelineError::configuration("x");
    assert!(other.no_solution_reason().is_none());
}

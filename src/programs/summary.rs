//! Bravais-settings refinement summary.
//!
//! The refinement program writes a JSON object keyed by candidate number:
//!
//! ```json
//! { "1": { "bravais": "aP", "max_angular_difference": 0.0, "min_cc": null,
//!          "rmsd": 0.05, "nspots": 812, "cb_op": "a,b,c",
//!          "experiments_file": "bravais_setting_1.expt",
//!          "unit_cell": [57.8, 57.8, 150.0, 90.0, 90.0, 90.0] } }
//! ```

use crate::core::error::{PipelineError, PipelineResult};
use crate::lattice::{BravaisLattice, Candidate, ChangeOfBasis, SymmetryMath, UnitCell};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// One entry of the summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BravaisSetting {
    pub bravais: BravaisLattice,
    pub max_angular_difference: f64,
    /// Missing when the program could not compute correlations.
    #[serde(default)]
    pub min_cc: Option<f64>,
    pub rmsd: f64,
    #[serde(default)]
    pub nspots: u64,
    pub cb_op: String,
    pub experiments_file: PathBuf,
    pub unit_cell: UnitCell,
}

/// Parsed summary, by candidate number.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BravaisSummary {
    settings: BTreeMap<u32, BravaisSetting>,
}

impl BravaisSummary {
    /// Parse a summary from JSON text.
    pub fn from_json(text: &str) -> PipelineResult<Self> {
        serde_json::from_str(text)
            .map_err(|e| PipelineError::malformed("bravais summary", e.to_string()))
    }

    /// Read a summary file, resolving experiment paths against its directory.
    pub fn from_file(path: &Path) -> PipelineResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::io(format!("failed to read {}", path.display()), e)
        })?;
        let mut summary = Self::from_json(&text)?;
        if let Some(dir) = path.parent() {
            for setting in summary.settings.values_mut() {
                if setting.experiments_file.is_relative() {
                    setting.experiments_file = dir.join(&setting.experiments_file);
                }
            }
        }
        Ok(summary)
    }

    /// Settings by candidate number.
    pub fn settings(&self) -> &BTreeMap<u32, BravaisSetting> {
        &self.settings
    }

    /// Number of settings.
    pub fn len(&self) -> usize {
        self.settings.len()
    }

    /// Check if the summary is empty.
    pub fn is_empty(&self) -> bool {
        self.settings.is_empty()
    }

    /// Candidate solutions, one per setting, ranked by candidate number.
    ///
    /// Each cell is moved to the reference setting of its lattice and the
    /// reported change of basis is composed with that reduction, so
    /// reindexing lands directly in the reference setting.
    pub fn candidates(&self, symmetry: &dyn SymmetryMath) -> Vec<Candidate> {
        self.settings
            .iter()
            .map(|(rank, s)| {
                let (unit_cell, best_to_ref) = symmetry.reference_setting(s.bravais, &s.unit_cell);
                let reported = ChangeOfBasis::new(s.cb_op.clone());
                Candidate {
                    rank: *rank,
                    lattice: s.bravais,
                    unit_cell,
                    angular_deviation: s.max_angular_difference,
                    rmsd: s.rmsd,
                    min_correlation: s.min_cc.unwrap_or(0.0),
                    nspots: s.nspots,
                    change_of_basis: symmetry.compose(&best_to_ref, &reported),
                    source: Some(s.experiments_file.clone()),
                }
            })
            .collect()
    }
}

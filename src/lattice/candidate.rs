//! Candidate lattice solutions produced by a symmetry refinement pass.

use super::{BravaisLattice, UnitCell};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Opaque change-of-basis token, e.g. `"a,b,c"` or `"-b,a+b,c"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeOfBasis(String);

impl ChangeOfBasis {
    const IDENTITY: &'static str = "a,b,c";

    /// Create a token from its textual form.
    pub fn new(op: impl Into<String>) -> Self {
        Self(op.into())
    }

    /// The identity operation.
    pub fn identity() -> Self {
        Self(Self::IDENTITY.to_string())
    }

    /// Check if this is the identity operation.
    pub fn is_identity(&self) -> bool {
        self.0 == Self::IDENTITY
    }

    /// Textual form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ChangeOfBasis {
    fn default() -> Self {
        Self::identity()
    }
}

impl std::fmt::Display for ChangeOfBasis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One candidate lattice from a Bravais-settings refinement.
///
/// Higher `rank` means a more specialised (higher symmetry) lattice; the
/// `aP` candidate is the unconstrained P1 baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Ordinal of the candidate within its refinement run.
    pub rank: u32,

    /// Bravais lattice of the candidate setting.
    pub lattice: BravaisLattice,

    /// Refined cell in the reference setting.
    pub unit_cell: UnitCell,

    /// Maximum angular deviation of the candidate basis (degrees).
    pub angular_deviation: f64,

    /// Refinement residual.
    pub rmsd: f64,

    /// Lowest correlation between symmetry-equivalent reflections.
    pub min_correlation: f64,

    /// Number of spots used in the refinement.
    #[serde(default)]
    pub nspots: u64,

    /// Transform from the candidate basis to the reference setting.
    pub change_of_basis: ChangeOfBasis,

    /// Experiment model written for this candidate.
    #[serde(default)]
    pub source: Option<PathBuf>,
}

impl Candidate {
    /// Check if this is the P1 candidate.
    pub fn is_baseline(&self) -> bool {
        self.lattice == BravaisLattice::Ap
    }
}

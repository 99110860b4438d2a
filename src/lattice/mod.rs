//! Crystal lattice model and solution selection.
//!
//! - [`bravais`] - Bravais lattice labels and space group lookup
//! - [`cell`] - Unit cells and cell equivalence
//! - [`candidate`] - Candidate solutions from a Bravais-settings refinement
//! - [`selection`] - [`LatticeSolutionSet`] and the acceptance rule
//! - [`symmetry`] - Symmetry functions consumed from the toolkit

pub mod bravais;
pub mod candidate;
pub mod cell;
pub mod selection;
pub mod symmetry;

pub use bravais::BravaisLattice;
pub use candidate::{Candidate, ChangeOfBasis};
pub use cell::{cells_equivalent, CellTolerance, UnitCell};
pub use selection::{AlternativeLattice, LatticeSolutionSet, SelectionThresholds};
pub use symmetry::{SymmetryMath, TabulatedSymmetry};

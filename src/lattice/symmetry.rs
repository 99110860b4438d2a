//! Symmetry utilities consumed as pure functions.
//!
//! Cell reduction and space group algebra are owned by the crystallographic
//! toolkit; the pipeline only needs the three operations below.

use super::{BravaisLattice, ChangeOfBasis, UnitCell};

/// Pure symmetry functions used while reconciling candidate solutions.
pub trait SymmetryMath {
    /// Bravais lattice of a space group given by number and centring letter.
    fn lattice_for_space_group(&self, number: u16, centring: char) -> Option<BravaisLattice>;

    /// Reduce a cell to the reference setting of `lattice`.
    fn reference_setting(
        &self,
        lattice: BravaisLattice,
        cell: &UnitCell,
    ) -> (UnitCell, ChangeOfBasis);

    /// Compose `outer ∘ inner`.
    fn compose(&self, outer: &ChangeOfBasis, inner: &ChangeOfBasis) -> ChangeOfBasis;
}

/// Table-driven symmetry that trusts settings reported by the refinement program.
///
/// Cells coming out of a Bravais-settings refinement are already in their
/// reference setting, so reduction is the identity and composition only
/// needs to chain tokens.
#[derive(Debug, Clone, Copy, Default)]
pub struct TabulatedSymmetry;

impl SymmetryMath for TabulatedSymmetry {
    fn lattice_for_space_group(&self, number: u16, centring: char) -> Option<BravaisLattice> {
        BravaisLattice::from_space_group(number, centring)
    }

    fn reference_setting(
        &self,
        _lattice: BravaisLattice,
        cell: &UnitCell,
    ) -> (UnitCell, ChangeOfBasis) {
        (*cell, ChangeOfBasis::identity())
    }

    fn compose(&self, outer: &ChangeOfBasis, inner: &ChangeOfBasis) -> ChangeOfBasis {
        match (outer.is_identity(), inner.is_identity()) {
            (true, _) => inner.clone(),
            (false, true) => outer.clone(),
            (false, false) => ChangeOfBasis::new(format!("{}*{}", outer, inner)),
        }
    }
}

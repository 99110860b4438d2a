//! Crystal → wavelength → sweep hierarchy.
//!
//! - [`model`] - Arena of crystals, wavelengths and sweeps with typed ids
//! - [`coordinator`] - [`HierarchyCoordinator`], lazy stage construction
//!   and downward invalidation

pub mod coordinator;
pub mod model;

pub use coordinator::{HierarchyCoordinator, RefinerKey, StageRef};
pub use model::{
    Crystal, CrystalId, Hierarchy, NodeRef, Sweep, SweepId, SweepSpec, Wavelength, WavelengthId,
};

//! diffred - phase-gated X-ray diffraction data reduction.
//!
//! diffred drives external crystallographic programs through indexing,
//! geometry refinement, integration and scaling, and reconciles their
//! results into one crystal/lattice model. Every stage runs behind the same
//! three-phase gate, so asking a downstream stage for its result brings
//! each stage it depends on up to date first and replays only the phases
//! an input change invalidated.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     HierarchyCoordinator                        │
//! │        crystal → wavelength → sweep, lazy stage wiring          │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      Stage controllers                          │
//! │      Indexer → Refiner → Integrater → Scaler (PhaseGate each)   │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │     LatticeSolutionSet      │      External programs            │
//! │  candidate selection rule   │  Program / ProgramSuite / roles   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Module Organization
//!
//! ## Core
//! - [`core::config`] - Configuration parsing and validation
//! - [`core::error`] - Error kinds and helpers
//!
//! ## Pipeline
//! - [`phase`] - Three-phase gate with re-entry
//! - [`lattice`] - Bravais lattices, cells and solution selection
//! - [`programs`] - External program contracts and role selection
//! - [`stage`] - Stage controllers and the concrete stages
//! - [`hierarchy`] - Project hierarchy and the coordinator
//!
//! ## Storage
//! - [`storage::records`] - Persisted stage records
//! - [`storage::state`] - Whole-project snapshots
//!
//! ## CLI
//! - [`cli::commands`] - CLI command implementations
//!
//! # Key Invariants
//!
//! - `executed` implies `prepared`, `finished` implies `executed`
//! - A full reset clears every flag and the cached result
//! - The selected lattice is the highest-ranked candidate passing the
//!   acceptance rule against the P1 baseline
//! - Invalidation flows only downwards through the hierarchy

// Core infrastructure
pub mod core;

// Pipeline
pub mod hierarchy;
pub mod lattice;
pub mod phase;
pub mod programs;
pub mod stage;

// Persisted state
pub mod storage;

// CLI
pub mod cli;

// Re-exports for convenience
pub use self::core::{config, error};
pub use hierarchy::HierarchyCoordinator;
pub use phase::{PhaseGate, PhaseState};
pub use stage::StageController;

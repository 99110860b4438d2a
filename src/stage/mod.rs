//! Pipeline stages.
//!
//! - [`controller`] - [`StageController`], [`StageLogic`] and the run environment
//! - [`payload`] - Named stage artifacts
//! - [`indexer`] - Autoindexing and lattice selection
//! - [`refiner`] - Geometry refinement over indexed sweeps
//! - [`integrater`] - Integration of one sweep
//! - [`scaler`] - Scaling of one crystal

pub mod controller;
pub mod indexer;
pub mod integrater;
pub mod payload;
pub mod refiner;
pub mod scaler;
pub mod sweep;

pub use controller::{StageContext, StageController, StageEnv, StageLogic, StageSettings};
pub use indexer::{IndexerStage, LatticeAssertion};
pub use integrater::{IntegraterStage, IntegrationResult};
pub use payload::{Artifact, Payload};
pub use refiner::{ProgramParameters, RefinedPayloads, RefinerStage};
pub use scaler::{ScalerStage, ScalingResult};
pub use sweep::{Epoch, SweepInput};

//! Phase-gated execution shared by every pipeline stage.

pub mod gate;

pub use gate::{PhaseControl, PhaseFlags, PhaseGate, PhaseHooks, PhaseState};

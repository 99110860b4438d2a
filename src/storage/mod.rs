//! Storage layer.
//!
//! Stage controllers persist through explicit record types rather than
//! their in-memory shape, so a saved project can be restored and resumed
//! from whatever phase each stage had reached.
//!
//! # Modules
//!
//! - [`records`] - Per-stage records and encode/decode
//! - [`state`] - Whole-project snapshots
//!
//! # Invariants
//!
//! - Restored flags are checked for consistency; a flag set that could
//!   not have been reached by running restores as not prepared
//! - A cached result is only trusted together with the `EXECUTED` flag

pub mod records;
pub mod state;

pub use records::{
    decode_stage, encode_stage, IndexerRecord, IndexerState, IntegraterRecord, IntegraterState,
    RefinerRecord, RefinerState, ScalerRecord, ScalerState, StageRecord, StageSchema,
};
pub use state::{ProjectState, FORMAT_VERSION};

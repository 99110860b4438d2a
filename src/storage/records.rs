//! Persisted stage records.
//!
//! Each stage has an explicit record type. A [`StageRecord`] wraps it
//! with the controller's label, phase flags, payload and cached result.
//! The refiner record nests its indexers' records keyed by epoch.

use crate::core::error::{PipelineError, PipelineResult};
use crate::lattice::{BravaisLattice, Candidate, LatticeSolutionSet, UnitCell};
use crate::phase::PhaseFlags;
use crate::programs::{IndexerKind, IntegraterKind, RefinerKind, ScalerKind};
use crate::stage::{
    Epoch, IndexerStage, IntegraterStage, IntegrationResult, Payload, ProgramParameters,
    RefinerStage, ScalerStage, ScalingResult, StageController, StageLogic, SweepInput,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Persisted form of one stage controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord<T, R> {
    /// Controller label.
    pub name: String,
    pub flags: PhaseFlags,
    pub payload: Payload,
    /// Cached result of the last execute.
    pub result: Option<R>,
    /// Successful executes of the controller.
    pub executions: u64,
    /// Stage-specific fields.
    pub stage: T,
}

impl<T, R> StageRecord<T, R>
where
    T: Serialize + DeserializeOwned,
    R: Serialize + DeserializeOwned,
{
    /// Render as pretty JSON.
    pub fn to_json(&self) -> PipelineResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| PipelineError::malformed("stage record", e.to_string()))
    }

    /// Parse from JSON.
    pub fn from_json(text: &str) -> PipelineResult<Self> {
        serde_json::from_str(text)
            .map_err(|e| PipelineError::malformed("stage record", e.to_string()))
    }
}

/// Stages with an explicit persisted schema.
pub trait StageSchema: StageLogic + Sized {
    /// Stage-specific record.
    type Record: Serialize + DeserializeOwned;

    fn to_record(&self) -> Self::Record;

    fn from_record(record: Self::Record) -> Self;
}

/// Encode a controller.
pub fn encode_stage<L>(controller: &StageController<L>) -> StageRecord<L::Record, L::Output>
where
    L: StageSchema,
{
    StageRecord {
        name: controller.label().to_string(),
        flags: controller.flags(),
        payload: controller.payload().clone(),
        result: controller.cached().cloned(),
        executions: controller.executions(),
        stage: controller.logic().to_record(),
    }
}

/// Decode a controller. Inconsistent flags restore as `NotPrepared`.
pub fn decode_stage<L>(record: StageRecord<L::Record, L::Output>) -> StageController<L>
where
    L: StageSchema,
{
    StageController::restore(
        record.name,
        record.flags,
        record.result,
        record.executions,
        record.payload,
        L::from_record(record.stage),
    )
}

/// Indexer fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexerRecord {
    pub kind: IndexerKind,
    pub sweep: SweepInput,
    pub input_lattice: Option<BravaisLattice>,
    pub input_cell: Option<UnitCell>,
    pub user_lattice: bool,
    pub solutions: LatticeSolutionSet,
    pub solution: Option<Candidate>,
    pub d_max: Option<f64>,
    pub low_resolution: Option<f64>,
}

impl StageSchema for IndexerStage {
    type Record = IndexerRecord;

    fn to_record(&self) -> IndexerRecord {
        IndexerRecord {
            kind: self.kind,
            sweep: self.sweep.clone(),
            input_lattice: self.input_lattice,
            input_cell: self.input_cell,
            user_lattice: self.user_lattice,
            solutions: self.solutions.clone(),
            solution: self.solution.clone(),
            d_max: self.d_max,
            low_resolution: self.low_resolution,
        }
    }

    fn from_record(r: IndexerRecord) -> Self {
        Self {
            kind: r.kind,
            sweep: r.sweep,
            input_lattice: r.input_lattice,
            input_cell: r.input_cell,
            user_lattice: r.user_lattice,
            solutions: r.solutions,
            solution: r.solution,
            d_max: r.d_max,
            low_resolution: r.low_resolution,
        }
    }
}

/// Persisted indexer controller.
pub type IndexerState = StageRecord<IndexerRecord, Candidate>;

/// Refiner fields with its indexers nested by epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinerRecord {
    pub kind: RefinerKind,
    pub indexers: BTreeMap<Epoch, IndexerState>,
    #[serde(default)]
    pub parameters: ProgramParameters,
    /// Present once refinement has executed.
    #[serde(default)]
    pub refined_experiments: Option<Vec<PathBuf>>,
}

impl StageSchema for RefinerStage {
    type Record = RefinerRecord;

    fn to_record(&self) -> RefinerRecord {
        RefinerRecord {
            kind: self.kind,
            indexers: self
                .indexers
                .iter()
                .map(|(epoch, indexer)| (*epoch, encode_stage(indexer)))
                .collect(),
            parameters: self.parameters.clone(),
            refined_experiments: self.refined_experiments.clone(),
        }
    }

    fn from_record(r: RefinerRecord) -> Self {
        Self {
            kind: r.kind,
            indexers: r
                .indexers
                .into_iter()
                .map(|(epoch, state)| (epoch, decode_stage(state)))
                .collect(),
            parameters: r.parameters,
            refined_experiments: r.refined_experiments,
        }
    }
}

/// Persisted refiner controller.
pub type RefinerState = StageRecord<RefinerRecord, BTreeMap<Epoch, Payload>>;

/// Integrater fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegraterRecord {
    pub kind: IntegraterKind,
    pub sweep: String,
    pub epoch: Epoch,
    pub d_min: Option<f64>,
    pub d_max: Option<f64>,
    pub mosaicity: Option<f64>,
    pub refiner_executions: Option<u64>,
}

impl StageSchema for IntegraterStage {
    type Record = IntegraterRecord;

    fn to_record(&self) -> IntegraterRecord {
        IntegraterRecord {
            kind: self.kind,
            sweep: self.sweep.clone(),
            epoch: self.epoch,
            d_min: self.d_min,
            d_max: self.d_max,
            mosaicity: self.mosaicity,
            refiner_executions: self.refiner_executions,
        }
    }

    fn from_record(r: IntegraterRecord) -> Self {
        Self {
            kind: r.kind,
            sweep: r.sweep,
            epoch: r.epoch,
            d_min: r.d_min,
            d_max: r.d_max,
            mosaicity: r.mosaicity,
            refiner_executions: r.refiner_executions,
        }
    }
}

/// Persisted integrater controller.
pub type IntegraterState = StageRecord<IntegraterRecord, IntegrationResult>;

/// Scaler fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalerRecord {
    pub kind: ScalerKind,
    pub crystal: String,
    pub inputs: BTreeMap<Epoch, PathBuf>,
    pub sources: BTreeMap<Epoch, u64>,
}

impl StageSchema for ScalerStage {
    type Record = ScalerRecord;

    fn to_record(&self) -> ScalerRecord {
        ScalerRecord {
            kind: self.kind,
            crystal: self.crystal.clone(),
            inputs: self.inputs.clone(),
            sources: self.sources.clone(),
        }
    }

    fn from_record(r: ScalerRecord) -> Self {
        Self {
            kind: r.kind,
            crystal: r.crystal,
            inputs: r.inputs,
            sources: r.sources,
        }
    }
}

/// Persisted scaler controller.
pub type ScalerState = StageRecord<ScalerRecord, ScalingResult>;

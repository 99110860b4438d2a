//! Scaling stage.
//!
//! Takes one reflection file per epoch. The null flavour passes
//! pre-reduced files through untouched; the others run a scaling program
//! over all inputs at once.

use super::controller::{StageContext, StageController, StageLogic};
use super::sweep::Epoch;
use crate::core::error::{PipelineError, PipelineResult};
use crate::programs::{Implementation, ProgramExt, ScalerKind, Tool};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Outcome of scaling one crystal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingResult {
    /// Scaled reflection files; one per input for the null scaler.
    pub reflections: Vec<PathBuf>,
}

/// Scaling logic for one crystal.
#[derive(Debug, Clone)]
pub struct ScalerStage {
    pub(crate) kind: ScalerKind,
    pub(crate) crystal: String,
    pub(crate) inputs: BTreeMap<Epoch, PathBuf>,
    /// Execute count of the integrater behind each input.
    pub(crate) sources: BTreeMap<Epoch, u64>,
}

impl ScalerStage {
    pub fn new(kind: ScalerKind, crystal: impl Into<String>) -> Self {
        Self {
            kind,
            crystal: crystal.into(),
            inputs: BTreeMap::new(),
            sources: BTreeMap::new(),
        }
    }

    /// Wrap in a controller labelled after the crystal.
    pub fn into_controller(self) -> StageController<ScalerStage> {
        let label = format!("{}/scale", self.crystal);
        StageController::new(label, self)
    }

    /// Replace the input reflection files. Returns whether they changed.
    pub fn set_inputs(&mut self, inputs: BTreeMap<Epoch, PathBuf>) -> bool {
        self.set_integrated(inputs, BTreeMap::new())
    }

    /// Replace the inputs along with the execute count of the integrater
    /// that wrote each one. A rerun writing to the same path still counts
    /// as a change.
    pub fn set_integrated(
        &mut self,
        inputs: BTreeMap<Epoch, PathBuf>,
        sources: BTreeMap<Epoch, u64>,
    ) -> bool {
        if self.inputs == inputs && self.sources == sources {
            return false;
        }
        self.inputs = inputs;
        self.sources = sources;
        true
    }

    pub fn kind(&self) -> ScalerKind {
        self.kind
    }

    pub fn inputs(&self) -> &BTreeMap<Epoch, PathBuf> {
        &self.inputs
    }

    fn tool(&self) -> Option<Tool> {
        match self.kind {
            ScalerKind::Aimless => Some(Tool::Aimless),
            ScalerKind::Xscale => Some(Tool::Xscale),
            ScalerKind::Null => None,
        }
    }
}

impl StageLogic for ScalerStage {
    type Output = ScalingResult;
    type Upstream = ();

    fn prepare(&mut self, ctx: &mut StageContext<'_, '_>, _: &mut ()) -> PipelineResult<()> {
        if self.inputs.is_empty() {
            return Err(PipelineError::stage(
                ctx.label(),
                "no reflection files to scale",
            ));
        }
        for (epoch, path) in &self.inputs {
            if !path.is_file() {
                return Err(PipelineError::missing_output(
                    ctx.label(),
                    path.display().to_string(),
                ));
            }
            ctx.payload.insert(format!("reflections.{}", epoch), path.clone());
        }
        Ok(())
    }

    fn execute(
        &mut self,
        ctx: &mut StageContext<'_, '_>,
        _: &mut (),
    ) -> PipelineResult<ScalingResult> {
        let Some(tool) = self.tool() else {
            tracing::info!(
                crystal = %self.crystal,
                files = self.inputs.len(),
                "passing reduced data through"
            );
            return Ok(ScalingResult {
                reflections: self.inputs.values().cloned().collect(),
            });
        };

        let dir = ctx.work_dir(&[&self.crystal, "scale", self.kind.name()])?;
        let mut scale = ctx.program(tool, &dir)?;
        for (epoch, path) in &self.inputs {
            scale.set_path(&format!("hklin.{}", epoch), path);
        }
        scale.set_input("nproc", ctx.env.settings.nproc.to_string());
        scale.run()?;

        let scaled = ctx.require_output(&*scale, tool.primary_output())?;
        ctx.payload.insert("scaled_filename", scaled.clone());
        tracing::info!(crystal = %self.crystal, scaled = %scaled.display(), "crystal scaled");
        Ok(ScalingResult {
            reflections: vec![scaled],
        })
    }
}

//! Integration stage.

use super::controller::{StageContext, StageController, StageLogic};
use super::refiner::RefinerStage;
use super::sweep::Epoch;
use crate::core::error::{PipelineError, PipelineResult};
use crate::programs::{Implementation, IntegraterKind, ProgramExt, Tool};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Outcome of integrating one sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrationResult {
    pub epoch: Epoch,
    pub integrated: PathBuf,
    /// Reported mosaic spread (degrees).
    pub mosaicity: Option<f64>,
}

/// Integration logic for the sweep at one epoch of a refiner.
#[derive(Debug, Clone)]
pub struct IntegraterStage {
    pub(crate) kind: IntegraterKind,
    pub(crate) sweep: String,
    pub(crate) epoch: Epoch,
    pub(crate) d_min: Option<f64>,
    pub(crate) d_max: Option<f64>,
    pub(crate) mosaicity: Option<f64>,
    /// Refiner execute count whose geometry `prepare` copied.
    pub(crate) refiner_executions: Option<u64>,
}

impl IntegraterStage {
    pub fn new(kind: IntegraterKind, sweep: impl Into<String>, epoch: Epoch) -> Self {
        Self {
            kind,
            sweep: sweep.into(),
            epoch,
            d_min: None,
            d_max: None,
            mosaicity: None,
            refiner_executions: None,
        }
    }

    /// Wrap in a controller labelled after the sweep.
    pub fn into_controller(self) -> StageController<IntegraterStage> {
        let label = format!("{}/integrate", self.sweep);
        StageController::new(label, self)
    }

    /// Set resolution limits. Returns whether they changed.
    pub fn set_resolution(&mut self, d_min: Option<f64>, d_max: Option<f64>) -> bool {
        let changed = self.d_min != d_min || self.d_max != d_max;
        self.d_min = d_min;
        self.d_max = d_max;
        changed
    }

    pub fn kind(&self) -> IntegraterKind {
        self.kind
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn resolution(&self) -> (Option<f64>, Option<f64>) {
        (self.d_min, self.d_max)
    }

    /// Mosaic spread reported by the last integration.
    pub fn mosaicity(&self) -> Option<f64> {
        self.mosaicity
    }

    /// Check if the geometry copied in `prepare` came from the refiner's
    /// latest execute.
    pub fn is_current_with(&self, refiner: &StageController<RefinerStage>) -> bool {
        self.refiner_executions == Some(refiner.executions())
    }

    fn tool(&self) -> Tool {
        match self.kind {
            IntegraterKind::Dials => Tool::DialsIntegrate,
            IntegraterKind::Xds => Tool::XdsIntegrate,
            IntegraterKind::Mosflm => Tool::MosflmIntegrate,
        }
    }
}

impl StageLogic for IntegraterStage {
    type Output = IntegrationResult;
    type Upstream = StageController<RefinerStage>;

    fn prepare(
        &mut self,
        ctx: &mut StageContext<'_, '_>,
        refiner: &mut StageController<RefinerStage>,
    ) -> PipelineResult<()> {
        let refined = refiner.run(ctx.env, &mut ())?;
        let geometry = refined.get(&self.epoch).ok_or_else(|| {
            PipelineError::stage(
                ctx.label(),
                format!("refiner has no geometry for epoch {}", self.epoch),
            )
        })?;

        let mut keys = vec!["experiments_filename", "indexed_filename"];
        if self.kind == IntegraterKind::Xds {
            keys.push("XPARM.XDS");
        }
        for key in keys {
            let path = geometry
                .path(key)
                .ok_or_else(|| PipelineError::missing_output(ctx.label(), key))?
                .to_path_buf();
            ctx.payload.insert(key, path);
        }
        if let Some(low) = geometry.number("low_resolution") {
            ctx.payload.insert("low_resolution", low);
        }
        self.refiner_executions = Some(refiner.executions());
        Ok(())
    }

    fn execute(
        &mut self,
        ctx: &mut StageContext<'_, '_>,
        _: &mut StageController<RefinerStage>,
    ) -> PipelineResult<IntegrationResult> {
        let tool = self.tool();
        let dir = ctx.work_dir(&[&self.sweep, "integrate", self.kind.name()])?;
        let experiments = ctx.require_payload("experiments_filename")?;
        let reflections = ctx.require_payload("indexed_filename")?;

        let mut integrate = ctx.program(tool, &dir)?;
        integrate.set_path("experiments", &experiments);
        integrate.set_path("reflections", &reflections);
        if let Some(xparm) = ctx.payload.path("XPARM.XDS") {
            integrate.set_path("xparm", xparm);
        }
        integrate.set_input("nproc", ctx.env.settings.nproc.to_string());
        if let Some(d_min) = self.d_min {
            integrate.set_input("d_min", d_min.to_string());
        }
        if let Some(d_max) = self.d_max.or_else(|| ctx.payload.number("low_resolution")) {
            integrate.set_input("d_max", d_max.to_string());
        }
        integrate.run()?;

        let integrated = ctx.require_output(&*integrate, tool.primary_output())?;
        self.mosaicity = integrate.reported_f64("Sigma_m");
        ctx.payload.insert("integrated_filename", integrated.clone());
        if let Some(mosaic) = self.mosaicity {
            ctx.payload.insert("mosaicity", mosaic);
        }

        tracing::info!(
            stage = %ctx.label(),
            epoch = %self.epoch,
            mosaicity = ?self.mosaicity,
            "sweep integrated"
        );
        Ok(IntegrationResult {
            epoch: self.epoch,
            integrated,
            mosaicity: self.mosaicity,
        })
    }
}

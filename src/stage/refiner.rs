//! Geometry refinement stage.
//!
//! The refiner owns one indexer controller per epoch and runs them as part
//! of its own prepare phase. The XDS flavour needs an `XPARM.XDS` geometry
//! file for every sweep: DIALS indexing results are exported, any other
//! indexer without one is replaced by an XDS indexer and prepare is
//! replayed.

use super::controller::{StageContext, StageController, StageEnv, StageLogic};
use super::indexer::{IndexerStage, LatticeAssertion};
use super::payload::Payload;
use super::sweep::Epoch;
use crate::core::error::{PipelineError, PipelineResult};
use crate::lattice::BravaisLattice;
use crate::programs::{IndexerKind, Program, ProgramExt, RefinerKind, Tool};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Background frames used by the XDS initialisation jobs.
const BACKGROUND_IMAGES: u32 = 5;

/// Refined per-epoch payloads handed to integration.
pub type RefinedPayloads = BTreeMap<Epoch, Payload>;

/// Per-program parameter overrides.
pub type ProgramParameters = BTreeMap<String, BTreeMap<String, String>>;

/// Refinement logic over one or more indexed sweeps.
#[derive(Debug, Clone)]
pub struct RefinerStage {
    pub(crate) kind: RefinerKind,
    pub(crate) indexers: BTreeMap<Epoch, StageController<IndexerStage>>,
    pub(crate) parameters: ProgramParameters,
    pub(crate) refined_experiments: Option<Vec<PathBuf>>,
}

impl RefinerStage {
    pub fn new(kind: RefinerKind) -> Self {
        Self {
            kind,
            indexers: BTreeMap::new(),
            parameters: BTreeMap::new(),
            refined_experiments: None,
        }
    }

    /// Wrap in a controller.
    pub fn into_controller(self, label: impl Into<String>) -> StageController<RefinerStage> {
        StageController::new(label, self)
    }

    pub fn kind(&self) -> RefinerKind {
        self.kind
    }

    pub fn indexers(&self) -> &BTreeMap<Epoch, StageController<IndexerStage>> {
        &self.indexers
    }

    pub fn indexer(&self, epoch: Epoch) -> Option<&StageController<IndexerStage>> {
        self.indexers.get(&epoch)
    }

    /// Lattice selected by the first indexer.
    pub fn lattice(&self) -> Option<BravaisLattice> {
        self.indexers.values().next().and_then(|ix| ix.logic().lattice())
    }

    /// Experiment files gathered by the last execute.
    pub fn refined_experiments(&self) -> Option<&[PathBuf]> {
        self.refined_experiments.as_deref()
    }

    /// Parameters set for one program.
    pub fn parameters(&self, program: &str) -> Option<&BTreeMap<String, String>> {
        self.parameters.get(program)
    }

    pub fn parameter(&self, program: &str, key: &str) -> Option<&str> {
        self.parameters
            .get(program)
            .and_then(|p| p.get(key))
            .map(String::as_str)
    }

    fn set_parameter(&mut self, program: &str, key: &str, value: &str) {
        self.parameters
            .entry(program.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
    }

    fn apply_parameters(parameters: &ProgramParameters, program: &mut dyn Program) {
        if let Some(values) = parameters.get(program.tool().name()) {
            for (key, value) in values {
                program.set_input(key, value.clone());
            }
        }
    }

    /// Generate XDS geometry for a DIALS-indexed sweep.
    fn export_to_xds(
        ctx: &StageContext<'_, '_>,
        parameters: &ProgramParameters,
        indexer: &mut StageController<IndexerStage>,
    ) -> PipelineResult<()> {
        let sweep = indexer.logic().sweep().clone();
        let dir = ctx.work_dir(&[&sweep.name, "xds"])?;
        let (first, last) = sweep.wedge;
        let last_background = last.min(first + BACKGROUND_IMAGES - 1);
        let experiments = indexer
            .payload()
            .path("experiments_filename")
            .map(|p| p.to_path_buf())
            .ok_or_else(|| PipelineError::missing_output(indexer.label(), "experiments_filename"))?;

        tracing::debug!(sweep = %sweep.name, first, last, "exporting indexing result to XDS");

        let mut xycorr = ctx.program(Tool::XdsXycorr, &dir)?;
        xycorr.set_path("template", &sweep.template_path());
        xycorr.set_input("data_range", format!("{} {}", first, last));
        xycorr.set_input("background_range", format!("{} {}", first, last_background));
        Self::apply_parameters(parameters, &mut *xycorr);
        xycorr.run()?;
        let mut corrections = Vec::new();
        for name in Tool::XdsXycorr.outputs() {
            let path = ctx.require_output(&*xycorr, name)?;
            indexer.set_payload(*name, path.clone());
            corrections.push((*name, path));
        }

        let mut init = ctx.program(Tool::XdsInit, &dir)?;
        init.set_path("template", &sweep.template_path());
        for (name, path) in &corrections {
            init.set_path(name, path);
        }
        init.set_input("data_range", format!("{} {}", first, last));
        init.set_input("background_range", format!("{} {}", first, last_background));
        Self::apply_parameters(parameters, &mut *init);
        init.run()?;
        for name in Tool::XdsInit.outputs() {
            let path = ctx.require_output(&*init, name)?;
            indexer.set_payload(*name, path);
        }

        let mut export = ctx.program(Tool::DialsExportXds, &dir)?;
        export.set_path("experiments", &experiments);
        export.run()?;
        let xparm = ctx.require_output(&*export, "XPARM.XDS")?;
        indexer.set_payload("XPARM.XDS", xparm);
        Ok(())
    }
}

impl StageLogic for RefinerStage {
    type Output = RefinedPayloads;
    type Upstream = ();

    fn prepare(&mut self, ctx: &mut StageContext<'_, '_>, _: &mut ()) -> PipelineResult<()> {
        if self.indexers.is_empty() {
            return Err(PipelineError::stage(
                ctx.label(),
                "no indexers assigned for refinement",
            ));
        }

        let epochs: Vec<Epoch> = self.indexers.keys().copied().collect();
        for epoch in epochs {
            let Some(indexer) = self.indexers.get_mut(&epoch) else {
                continue;
            };
            indexer.run(ctx.env, &mut ())?;

            if self.kind != RefinerKind::Xds || indexer.payload().contains("XPARM.XDS") {
                continue;
            }

            if indexer.logic().kind() == IndexerKind::Dials {
                Self::export_to_xds(ctx, &self.parameters, indexer)?;
            } else {
                tracing::debug!(
                    %epoch,
                    from = ?indexer.logic().kind(),
                    "generating an XDS indexer"
                );
                let rebuilt = indexer.logic().rebuilt_as(IndexerKind::Xds).into_controller();
                self.indexers.insert(epoch, rebuilt);
                ctx.control.reset_prepared();
            }
        }
        Ok(())
    }

    fn execute(
        &mut self,
        ctx: &mut StageContext<'_, '_>,
        _: &mut (),
    ) -> PipelineResult<RefinedPayloads> {
        let mut refined = BTreeMap::new();
        let mut experiments = Vec::new();

        for (epoch, indexer) in self.indexers.iter_mut() {
            indexer.run(ctx.env, &mut ())?;
            let payload = indexer.payload().clone();
            if let Some(path) = payload.path("experiments_filename") {
                experiments.push(path.to_path_buf());
                ctx.payload
                    .insert(format!("experiments.{}", epoch), path.to_path_buf());
            }
            refined.insert(*epoch, payload);
        }

        tracing::info!(
            stage = %ctx.label(),
            sweeps = refined.len(),
            "refined geometry collected"
        );
        self.refined_experiments = Some(experiments);
        Ok(refined)
    }
}

impl StageController<RefinerStage> {
    /// Attach an indexer for `epoch`, resetting the refiner.
    pub fn add_indexer(&mut self, epoch: Epoch, indexer: StageController<IndexerStage>) {
        self.update(|refiner| {
            refiner.indexers.insert(epoch, indexer);
            true
        });
    }

    /// Mutable access to one indexer. Changing it resets the refiner.
    pub fn update_indexer<F>(&mut self, epoch: Epoch, f: F) -> bool
    where
        F: FnOnce(&mut StageController<IndexerStage>) -> bool,
    {
        self.update(|refiner| refiner.indexers.get_mut(&epoch).map_or(false, f))
    }

    /// Set a parameter for one program, replaying refinement.
    pub fn set_parameter(&mut self, program: &str, key: &str, value: &str) {
        self.update_parameters(|refiner| refiner.set_parameter(program, key, value));
    }

    /// Assert a lattice on every indexer; the answer is the worst of theirs.
    pub fn assert_lattice(
        &mut self,
        env: StageEnv<'_>,
        lattice: BravaisLattice,
    ) -> PipelineResult<LatticeAssertion> {
        if self.logic().indexers.is_empty() {
            return Err(PipelineError::stage(
                self.label(),
                "no indexers assigned for refinement",
            ));
        }

        let mut consensus = LatticeAssertion::Correct;
        for indexer in self.logic_mut().indexers.values_mut() {
            consensus = consensus.max(indexer.assert_lattice(env, lattice)?);
        }
        if consensus != LatticeAssertion::Correct {
            self.reset(true);
        }
        Ok(consensus)
    }
}

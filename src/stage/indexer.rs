//! Autoindexing stage.
//!
//! prepare: image import and spot finding, plus optional beam-centre
//! discovery whose failure is tolerated.
//! execute: indexing, then either lattice selection over the Bravais
//! settings or, with a target lattice, validation of the single indexing
//! solution; the chosen setting is reindexed when needed.
//! finish: low-resolution limit from the indexing program's `d_max`.

use super::controller::{StageContext, StageController, StageEnv, StageLogic};
use super::sweep::SweepInput;
use crate::core::error::{PipelineError, PipelineResult};
use crate::lattice::{
    AlternativeLattice, BravaisLattice, Candidate, LatticeSolutionSet, UnitCell,
};
use crate::programs::{BravaisSummary, Implementation, IndexerKind, Program, ProgramExt, Tool};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Margin applied to the reported low-resolution limit.
const LOW_RESOLUTION_MARGIN: f64 = 1.05;

/// Answer to a request to force a lattice onto an indexed sweep.
///
/// Ordered from best to worst, so the consensus over several indexers is
/// the maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LatticeAssertion {
    /// The lattice is the one already selected.
    Correct,
    /// The lattice was a supported alternative; the stage has been reset to use it.
    Possible,
    /// The lattice was never supported.
    Impossible,
}

/// Tools used by one indexer flavour.
#[derive(Debug, Clone, Copy)]
struct Recipe {
    spots: Tool,
    discover: Option<Tool>,
    index: Tool,
    reindex: Option<Tool>,
}

impl Recipe {
    fn for_kind(kind: IndexerKind) -> Self {
        match kind {
            IndexerKind::Dials => Self {
                spots: Tool::DialsFindSpots,
                discover: Some(Tool::DialsDiscoverBetterModel),
                index: Tool::DialsIndex,
                reindex: Some(Tool::DialsReindex),
            },
            IndexerKind::Labelit => Self {
                spots: Tool::DialsFindSpots,
                discover: None,
                index: Tool::LabelitIndex,
                reindex: Some(Tool::DialsReindex),
            },
            IndexerKind::Mosflm => Self {
                spots: Tool::DialsFindSpots,
                discover: None,
                index: Tool::MosflmIndex,
                reindex: Some(Tool::DialsReindex),
            },
            IndexerKind::Xds => Self {
                spots: Tool::XdsColspot,
                discover: None,
                index: Tool::XdsIdxref,
                reindex: None,
            },
        }
    }
}

/// Indexing logic for one sweep.
#[derive(Debug, Clone)]
pub struct IndexerStage {
    pub(crate) kind: IndexerKind,
    pub(crate) sweep: SweepInput,
    pub(crate) input_lattice: Option<BravaisLattice>,
    pub(crate) input_cell: Option<UnitCell>,
    pub(crate) user_lattice: bool,
    pub(crate) solutions: LatticeSolutionSet,
    pub(crate) solution: Option<Candidate>,
    pub(crate) d_max: Option<f64>,
    pub(crate) low_resolution: Option<f64>,
}

impl IndexerStage {
    /// Create an indexer with no target lattice.
    pub fn new(kind: IndexerKind, sweep: SweepInput) -> Self {
        Self {
            kind,
            sweep,
            input_lattice: None,
            input_cell: None,
            user_lattice: false,
            solutions: LatticeSolutionSet::new(),
            solution: None,
            d_max: None,
            low_resolution: None,
        }
    }

    /// Wrap in a controller labelled after the sweep.
    pub fn into_controller(self) -> StageController<IndexerStage> {
        let label = format!("{}/index", self.sweep.name);
        StageController::new(label, self)
    }

    /// Set the target lattice and cell. Returns whether anything changed.
    pub fn set_target(
        &mut self,
        lattice: Option<BravaisLattice>,
        cell: Option<UnitCell>,
        user_assigned: bool,
    ) -> bool {
        let changed = self.input_lattice != lattice
            || self.input_cell != cell
            || self.user_lattice != user_assigned;
        self.input_lattice = lattice;
        self.input_cell = cell;
        self.user_lattice = user_assigned;
        changed
    }

    /// Fresh indexer of another flavour for the same sweep, carrying over
    /// the selected (or requested) lattice and cell.
    pub fn rebuilt_as(&self, kind: IndexerKind) -> Self {
        let mut rebuilt = Self::new(kind, self.sweep.clone());
        rebuilt.input_lattice = self.lattice().or(self.input_lattice);
        rebuilt.input_cell = self.cell().or(self.input_cell);
        rebuilt.user_lattice = self.user_lattice;
        rebuilt
    }

    pub fn kind(&self) -> IndexerKind {
        self.kind
    }

    pub fn sweep(&self) -> &SweepInput {
        &self.sweep
    }

    /// Lattice of the selected solution.
    pub fn lattice(&self) -> Option<BravaisLattice> {
        self.solution.as_ref().map(|s| s.lattice)
    }

    /// Cell of the selected solution.
    pub fn cell(&self) -> Option<UnitCell> {
        self.solution.as_ref().map(|s| s.unit_cell)
    }

    pub fn solution(&self) -> Option<&Candidate> {
        self.solution.as_ref()
    }

    /// Other lattices that passed selection, with their best cells.
    pub fn alternatives(&self) -> impl Iterator<Item = &AlternativeLattice> {
        self.solutions.alternatives()
    }

    pub fn input_lattice(&self) -> Option<BravaisLattice> {
        self.input_lattice
    }

    pub fn input_cell(&self) -> Option<UnitCell> {
        self.input_cell
    }

    /// Check if the target lattice came from the user.
    pub fn is_user_lattice(&self) -> bool {
        self.user_lattice
    }

    /// Low-resolution limit estimated in `finish`.
    pub fn low_resolution(&self) -> Option<f64> {
        self.low_resolution
    }

    /// Decide whether `lattice` fits the indexing result.
    ///
    /// A supported alternative becomes the new target; the caller must
    /// reset the stage so indexing reruns with it.
    pub fn assert_lattice(&mut self, lattice: BravaisLattice) -> LatticeAssertion {
        if self.lattice() == Some(lattice) {
            return LatticeAssertion::Correct;
        }
        match self.solutions.alternative(lattice).map(|alt| alt.unit_cell) {
            Some(cell) => {
                tracing::info!(
                    sweep = %self.sweep.name,
                    %lattice,
                    %cell,
                    "adopting asserted lattice"
                );
                self.set_target(Some(lattice), Some(cell), true);
                LatticeAssertion::Possible
            }
            None => LatticeAssertion::Impossible,
        }
    }

    fn work_dir(&self, ctx: &StageContext<'_, '_>) -> PipelineResult<PathBuf> {
        ctx.work_dir(&[&self.sweep.name, self.kind.name()])
    }

    fn discover_beam_centre(
        &self,
        ctx: &StageContext<'_, '_>,
        tool: Tool,
        dir: &Path,
        datablock: &Path,
        spot_list: &Path,
    ) -> PipelineResult<PathBuf> {
        let mut discover = ctx.program(tool, dir)?;
        discover.set_path("experiments", datablock);
        discover.set_path("reflections", spot_list);
        discover.run()?;
        ctx.require_output(&*discover, tool.primary_output())
    }

    /// Candidate built from the indexing program's own report.
    fn reported_candidate(
        &self,
        ctx: &StageContext<'_, '_>,
        index: &dyn Program,
        experiments: &Path,
    ) -> PipelineResult<Candidate> {
        let context = format!("{} report", index.tool());
        let number: u16 = index
            .reported("space_group_number")
            .and_then(|v| v.trim().parse().ok())
            .ok_or_else(|| PipelineError::malformed(&context, "no space_group_number"))?;
        let centring = index
            .reported("space_group")
            .and_then(|symbol| symbol.trim().chars().next())
            .unwrap_or('P');
        let lattice = ctx
            .env
            .symmetry
            .lattice_for_space_group(number, centring)
            .ok_or_else(|| {
                PipelineError::malformed(
                    &context,
                    format!("no lattice for space group {}{}", centring, number),
                )
            })?;
        let cell: UnitCell = index
            .reported("unit_cell")
            .ok_or_else(|| PipelineError::malformed(&context, "no unit_cell"))?
            .parse()
            .map_err(|e: String| PipelineError::malformed(&context, e))?;
        let (unit_cell, change_of_basis) = ctx.env.symmetry.reference_setting(lattice, &cell);

        Ok(Candidate {
            rank: 1,
            lattice,
            unit_cell,
            angular_deviation: 0.0,
            rmsd: index.reported_f64("rmsd").unwrap_or(0.0),
            min_correlation: 1.0,
            nspots: index
                .reported("nspots")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(0),
            change_of_basis,
            source: Some(experiments.to_path_buf()),
        })
    }
}

fn cell_argument(cell: &UnitCell) -> String {
    cell.parameters()
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

impl StageLogic for IndexerStage {
    type Output = Candidate;
    type Upstream = ();

    fn prepare(&mut self, ctx: &mut StageContext<'_, '_>, _: &mut ()) -> PipelineResult<()> {
        let dir = self.work_dir(ctx)?;
        let recipe = Recipe::for_kind(self.kind);

        let mut import = ctx.program(Tool::DialsImport, &dir)?;
        import.set_path("template", &self.sweep.template_path());
        import.set_input("image_range", self.sweep.image_range());
        if let Some([x, y]) = self.sweep.beam {
            import.set_input("beam_centre", format!("{},{}", x, y));
        }
        if let Some(distance) = self.sweep.distance {
            import.set_input("distance", distance.to_string());
        }
        if let Some(wavelength) = self.sweep.wavelength {
            import.set_input("wavelength", wavelength.to_string());
        }
        import.run()?;
        let datablock = ctx.require_output(&*import, Tool::DialsImport.primary_output())?;
        ctx.payload.insert("datablock", datablock.clone());

        let mut spots = ctx.program(recipe.spots, &dir)?;
        spots.set_path("experiments", &datablock);
        spots.set_input("nproc", ctx.env.settings.nproc.to_string());
        spots.run()?;
        let spot_list = ctx.require_output(&*spots, recipe.spots.primary_output())?;
        ctx.payload.insert("spot_list", spot_list.clone());

        if ctx.env.settings.trust_beam_centre {
            return Ok(());
        }
        if let Some(tool) = recipe.discover {
            match self.discover_beam_centre(ctx, tool, &dir, &datablock, &spot_list) {
                Ok(better) => ctx.payload.insert("datablock", better),
                Err(err) => tracing::warn!(
                    sweep = %self.sweep.name,
                    error = %err,
                    "beam centre discovery failed, keeping imported geometry"
                ),
            }
        }
        Ok(())
    }

    fn execute(&mut self, ctx: &mut StageContext<'_, '_>, _: &mut ()) -> PipelineResult<Candidate> {
        let dir = self.work_dir(ctx)?;
        let recipe = Recipe::for_kind(self.kind);
        let datablock = ctx.require_payload("datablock")?;
        let spot_list = ctx.require_payload("spot_list")?;

        let mut index = ctx.program(recipe.index, &dir)?;
        index.set_path("experiments", &datablock);
        index.set_path("reflections", &spot_list);
        index.set_input("nproc", ctx.env.settings.nproc.to_string());
        match self.input_cell {
            Some(cell) => {
                index.set_input("method", "real_space_grid_search".into());
                index.set_input("unit_cell", cell_argument(&cell));
            }
            None => index.set_input("method", "fft3d".into()),
        }
        if let Some(lattice) = self.input_lattice {
            index.set_input("space_group", lattice.minimum_space_group().to_string());
        }
        index.run()?;

        let outputs = recipe.index.outputs();
        let experiments = ctx.require_output(&*index, outputs[0])?;
        let reflections = ctx.require_output(&*index, outputs[1])?;
        self.d_max = index.reported_f64("d_max");
        if recipe.index == Tool::XdsIdxref {
            ctx.payload.insert("XPARM.XDS", experiments.clone());
        }

        let candidates = match self.input_lattice {
            Some(_) => vec![self.reported_candidate(ctx, &*index, &experiments)?],
            None => {
                let mut bravais = ctx.program(Tool::DialsRefineBravaisSettings, &dir)?;
                bravais.set_path("experiments", &experiments);
                bravais.set_path("reflections", &reflections);
                bravais.set_input("nproc", ctx.env.settings.nproc.to_string());
                bravais.run()?;
                let summary = ctx.require_output(
                    &*bravais,
                    Tool::DialsRefineBravaisSettings.primary_output(),
                )?;
                BravaisSummary::from_file(&summary)?.candidates(ctx.env.symmetry)
            }
        };

        let settings = ctx.env.settings;
        let mut solutions =
            LatticeSolutionSet::with_thresholds(settings.thresholds, settings.tolerance);
        match self.input_lattice {
            Some(_) => solutions.ingest_constrained(candidates)?,
            None => solutions.ingest(candidates)?,
        }
        let chosen = solutions.select_best(self.input_lattice, self.input_cell.as_ref())?;
        self.solutions = solutions;

        let chosen_experiments = chosen.source.clone().unwrap_or_else(|| experiments.clone());
        let needs_reindex =
            !chosen.change_of_basis.is_identity() || chosen_experiments != experiments;

        let (experiments_out, reflections_out) = match recipe.reindex {
            Some(tool) if needs_reindex => {
                let mut reindex = ctx.program(tool, &dir)?;
                reindex.set_path("experiments", &chosen_experiments);
                reindex.set_path("reflections", &reflections);
                reindex.set_input("change_of_basis_op", chosen.change_of_basis.to_string());
                reindex.set_input(
                    "space_group",
                    chosen.lattice.minimum_space_group().to_string(),
                );
                reindex.run()?;
                let outputs = tool.outputs();
                (
                    ctx.require_output(&*reindex, outputs[0])?,
                    ctx.require_output(&*reindex, outputs[1])?,
                )
            }
            _ => (chosen_experiments, reflections),
        };

        ctx.payload.insert("experiments_filename", experiments_out);
        ctx.payload.insert("indexed_filename", reflections_out);
        self.solution = Some(chosen.clone());
        Ok(chosen)
    }

    fn finish(&mut self, ctx: &mut StageContext<'_, '_>, _: &mut ()) -> PipelineResult<()> {
        self.low_resolution = self.d_max.map(|d| d * LOW_RESOLUTION_MARGIN);
        if let Some(limit) = self.low_resolution {
            tracing::debug!(
                sweep = %self.sweep.name,
                low_resolution = limit,
                "low resolution limit assigned"
            );
            ctx.payload.insert("low_resolution", limit);
        }
        Ok(())
    }
}

impl StageController<IndexerStage> {
    /// Force a lattice onto this sweep after indexing.
    ///
    /// `Possible` resets the stage fully so the next run indexes in the
    /// asserted lattice.
    pub fn assert_lattice(
        &mut self,
        env: StageEnv<'_>,
        lattice: BravaisLattice,
    ) -> PipelineResult<LatticeAssertion> {
        self.run(env, &mut ())?;
        let assertion = self.logic_mut().assert_lattice(lattice);
        if assertion == LatticeAssertion::Possible {
            self.reset(true);
        }
        tracing::info!(stage = %self.label(), %lattice, ?assertion, "lattice asserted");
        Ok(assertion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assertion_consensus_is_the_worst_answer() {
        let answers = [
            LatticeAssertion::Correct,
            LatticeAssertion::Impossible,
            LatticeAssertion::Possible,
        ];
        assert_eq!(answers.iter().max(), Some(&LatticeAssertion::Impossible));
    }

    #[test]
    fn cell_argument_is_comma_separated() {
        let cell = UnitCell::new(10.0, 20.5, 30.0, 90.0, 90.0, 120.0);
        assert_eq!(cell_argument(&cell), "10,20.5,30,90,90,120");
    }
}

//! Lazy stage construction across the hierarchy.
//!
//! The coordinator owns every stage controller. A sweep's indexer lives
//! inside the refiner that consumes it; with joint refinement one refiner
//! per crystal takes the indexers of all its sweeps. Integraters are kept
//! per sweep and scalers per crystal. Invalidation only ever flows
//! downwards: crystal → wavelength → sweep → indexer → refiner →
//! integrater → scaler.

use super::model::{Crystal, CrystalId, Hierarchy, NodeRef, Sweep, SweepId, SweepSpec, WavelengthId};
use crate::core::config::{Config, PreferencesConfig};
use crate::core::error::{PipelineError, PipelineResult};
use crate::lattice::{BravaisLattice, Candidate, SymmetryMath, UnitCell};
use crate::phase::PhaseState;
use crate::programs::{
    select, Implementation, IndexerKind, IntegraterKind, ProgramSuite, RefinerKind, Role,
    ScalerKind,
};
use crate::stage::{
    Epoch, IndexerStage, IntegraterStage, IntegrationResult, LatticeAssertion, RefinedPayloads,
    RefinerStage, ScalerStage, ScalingResult, StageController, StageEnv, StageSettings,
};
use crate::storage::{decode_stage, encode_stage, ProjectState};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Owner of one refiner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RefinerKey {
    /// Refines a single sweep.
    Sweep(SweepId),
    /// Refines every sweep of a crystal jointly.
    Crystal(CrystalId),
}

/// A stage controller addressed through the hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageRef {
    Indexer(SweepId),
    Refiner(SweepId),
    Integrater(SweepId),
    Scaler(CrystalId),
}

/// Role implementations resolved so far.
#[derive(Debug, Clone, Copy, Default)]
struct ResolvedRoles {
    indexer: Option<IndexerKind>,
    refiner: Option<RefinerKind>,
    integrater: Option<IntegraterKind>,
    scaler: Option<ScalerKind>,
}

/// Builds, caches and invalidates stage controllers.
pub struct HierarchyCoordinator {
    hierarchy: Hierarchy,
    suite: Box<dyn ProgramSuite>,
    symmetry: Box<dyn SymmetryMath>,
    settings: StageSettings,
    preferences: PreferencesConfig,
    joint_refinement: bool,
    roles: ResolvedRoles,
    refiners: BTreeMap<RefinerKey, StageController<RefinerStage>>,
    integraters: BTreeMap<SweepId, StageController<IntegraterStage>>,
    scalers: BTreeMap<CrystalId, StageController<ScalerStage>>,
}

impl HierarchyCoordinator {
    /// Create a coordinator over an empty hierarchy.
    pub fn new(
        suite: Box<dyn ProgramSuite>,
        symmetry: Box<dyn SymmetryMath>,
        settings: StageSettings,
        preferences: PreferencesConfig,
    ) -> Self {
        Self {
            hierarchy: Hierarchy::new(),
            suite,
            symmetry,
            settings,
            preferences,
            joint_refinement: false,
            roles: ResolvedRoles::default(),
            refiners: BTreeMap::new(),
            integraters: BTreeMap::new(),
            scalers: BTreeMap::new(),
        }
    }

    /// Refine all sweeps of a crystal together when the refiner allows it.
    pub fn with_joint_refinement(mut self, joint: bool) -> Self {
        self.joint_refinement = joint;
        self
    }

    /// Build the coordinator and hierarchy described by a configuration.
    pub fn from_config(
        config: &Config,
        suite: Box<dyn ProgramSuite>,
        symmetry: Box<dyn SymmetryMath>,
    ) -> PipelineResult<Self> {
        let mut coordinator = Self::new(
            suite,
            symmetry,
            config.stage_settings(),
            config.preferences.clone(),
        )
        .with_joint_refinement(config.pipeline.joint_refinement);

        for crystal in &config.crystals {
            let crystal_id = coordinator.add_crystal(&crystal.name, crystal.lattice, crystal.cell)?;
            for wavelength in &crystal.wavelengths {
                let wavelength_id =
                    coordinator.add_wavelength(
                        crystal_id,
                        &wavelength.name,
                        wavelength.wavelength,
                    )?;
                for sweep in &wavelength.sweeps {
                    coordinator.add_sweep(wavelength_id, SweepSpec::from(sweep))?;
                }
            }
        }

        tracing::info!(
            crystals = config.crystals.len(),
            joint_refinement = coordinator.joint_refinement,
            "hierarchy built"
        );
        Ok(coordinator)
    }

    pub fn hierarchy(&self) -> &Hierarchy {
        &self.hierarchy
    }

    pub fn settings(&self) -> &StageSettings {
        &self.settings
    }

    pub fn add_crystal(
        &mut self,
        name: &str,
        lattice: Option<BravaisLattice>,
        cell: Option<UnitCell>,
    ) -> PipelineResult<CrystalId> {
        self.hierarchy.add_crystal(name, lattice, cell)
    }

    pub fn add_wavelength(
        &mut self,
        crystal: CrystalId,
        name: &str,
        wavelength: f64,
    ) -> PipelineResult<WavelengthId> {
        self.hierarchy.add_wavelength(crystal, name, wavelength)
    }

    /// Add a sweep. A joint refiner that already exists for the crystal
    /// takes the new sweep's indexer, and the crystal's scaler is reset.
    pub fn add_sweep(
        &mut self,
        wavelength: WavelengthId,
        spec: SweepSpec,
    ) -> PipelineResult<SweepId> {
        let sweep = self.hierarchy.add_sweep(wavelength, spec)?;
        let crystal = self.hierarchy.crystal_of(sweep)?;

        if self.refiners.contains_key(&RefinerKey::Crystal(crystal)) {
            let indexer = self.build_indexer(sweep)?;
            let epoch = self.hierarchy.sweep(sweep)?.epoch();
            if let Some(refiner) = self.refiners.get_mut(&RefinerKey::Crystal(crystal)) {
                refiner.add_indexer(epoch, indexer);
            }
        }
        if let Some(scaler) = self.scalers.get_mut(&crystal) {
            scaler.reset(true);
        }
        Ok(sweep)
    }

    /// Indexer implementation, resolved on first use.
    pub fn indexer_kind(&mut self) -> PipelineResult<IndexerKind> {
        if let Some(kind) = self.roles.indexer {
            return Ok(kind);
        }
        let kind = select(
            IndexerKind::ORDER,
            self.preferences.get(Role::Indexer),
            &*self.suite,
        )?;
        self.roles.indexer = Some(kind);
        Ok(kind)
    }

    /// Integrater implementation, resolved on first use.
    pub fn integrater_kind(&mut self) -> PipelineResult<IntegraterKind> {
        if let Some(kind) = self.roles.integrater {
            return Ok(kind);
        }
        let kind = select(
            IntegraterKind::ORDER,
            self.preferences.get(Role::Integrater),
            &*self.suite,
        )?;
        self.roles.integrater = Some(kind);
        Ok(kind)
    }

    /// Refiner implementation. The flavour able to feed the selected
    /// integrater is tried first.
    pub fn refiner_kind(&mut self) -> PipelineResult<RefinerKind> {
        if let Some(kind) = self.roles.refiner {
            return Ok(kind);
        }
        let integrater = self.integrater_kind()?;
        let preferred = integrater.refiner();
        let order: Vec<RefinerKind> = std::iter::once(preferred)
            .chain(RefinerKind::ORDER.iter().copied().filter(|k| *k != preferred))
            .collect();
        let kind = select(&order, self.preferences.get(Role::Refiner), &*self.suite)?;
        self.roles.refiner = Some(kind);
        Ok(kind)
    }

    /// Scaler implementation, resolved on first use.
    pub fn scaler_kind(&mut self) -> PipelineResult<ScalerKind> {
        if let Some(kind) = self.roles.scaler {
            return Ok(kind);
        }
        let kind = select(
            ScalerKind::ORDER,
            self.preferences.get(Role::Scaler),
            &*self.suite,
        )?;
        self.roles.scaler = Some(kind);
        Ok(kind)
    }

    /// Refiner owning `sweep`, if one has been built.
    fn existing_refiner_key(&self, sweep: SweepId) -> Option<RefinerKey> {
        let crystal = self.hierarchy.crystal_of(sweep).ok()?;
        [RefinerKey::Sweep(sweep), RefinerKey::Crystal(crystal)]
            .into_iter()
            .find(|key| self.refiners.contains_key(key))
    }

    fn build_indexer(&mut self, sweep: SweepId) -> PipelineResult<StageController<IndexerStage>> {
        let kind = self.indexer_kind()?;
        let input = self.hierarchy.sweep_input(sweep)?;
        let crystal = self.hierarchy.crystal(self.hierarchy.crystal_of(sweep)?)?;

        let mut indexer = IndexerStage::new(kind, input);
        if crystal.lattice.is_some() {
            indexer.set_target(crystal.lattice, crystal.cell, true);
        }
        Ok(indexer.into_controller())
    }

    /// Build (or return) the refiner for a sweep.
    ///
    /// With joint refinement and a refiner that accepts several indexers,
    /// the refiner is shared by every sweep of the crystal.
    fn ensure_refiner(&mut self, sweep: SweepId) -> PipelineResult<RefinerKey> {
        if let Some(key) = self.existing_refiner_key(sweep) {
            return Ok(key);
        }

        let kind = self.refiner_kind()?;
        let crystal = self.hierarchy.crystal_of(sweep)?;
        let (key, label, sweeps) = if self.joint_refinement && kind.supports_multiple_indexers() {
            let name = &self.hierarchy.crystal(crystal)?.name;
            (
                RefinerKey::Crystal(crystal),
                format!("{}/refine", name),
                self.hierarchy.sweeps_of_crystal(crystal),
            )
        } else {
            let name = self.hierarchy.sweep(sweep)?.name();
            (RefinerKey::Sweep(sweep), format!("{}/refine", name), vec![sweep])
        };

        let mut stage = RefinerStage::new(kind);
        for id in sweeps {
            let epoch = self.hierarchy.sweep(id)?.epoch();
            let indexer = self.build_indexer(id)?;
            stage.indexers.insert(epoch, indexer);
        }
        tracing::debug!(
            stage = %label,
            refiner = kind.name(),
            sweeps = stage.indexers.len(),
            "refiner created"
        );
        self.refiners.insert(key, stage.into_controller(label));
        Ok(key)
    }

    /// Return the cached refiner (with its indexers) for `sweep`,
    /// constructing it on first use with the crystal's lattice hints.
    pub fn get_or_create_stage(
        &mut self,
        sweep: SweepId,
    ) -> PipelineResult<&mut StageController<RefinerStage>> {
        let key = self.ensure_refiner(sweep)?;
        self.refiners
            .get_mut(&key)
            .ok_or_else(|| {
                PipelineError::configuration(format!("no refiner for sweep {:?}", sweep))
            })
    }

    fn ensure_integrater(&mut self, sweep: SweepId) -> PipelineResult<()> {
        if self.integraters.contains_key(&sweep) {
            return Ok(());
        }
        let kind = self.integrater_kind()?;
        let node = self.hierarchy.sweep(sweep)?;
        let mut stage = IntegraterStage::new(kind, node.name(), node.epoch());
        stage.set_resolution(node.spec.resolution, None);
        self.integraters.insert(sweep, stage.into_controller());
        Ok(())
    }

    fn ensure_scaler(&mut self, crystal: CrystalId) -> PipelineResult<ScalerKind> {
        let kind = self.scaler_kind()?;
        if !self.scalers.contains_key(&crystal) {
            let name = self.hierarchy.crystal(crystal)?.name.clone();
            self.scalers
                .insert(crystal, ScalerStage::new(kind, name).into_controller());
        }
        Ok(kind)
    }

    /// Index one sweep and return the selected solution.
    pub fn index(&mut self, sweep: SweepId) -> PipelineResult<Candidate> {
        let key = self.ensure_refiner(sweep)?;
        let epoch = self.hierarchy.sweep(sweep)?.epoch();
        let env = StageEnv::new(&*self.suite, &*self.symmetry, &self.settings);
        let indexer = self
            .refiners
            .get_mut(&key)
            .and_then(|refiner| refiner.logic_mut().indexers.get_mut(&epoch))
            .ok_or_else(|| {
                PipelineError::configuration(format!("no indexer for sweep {:?}", sweep))
            })?;
        indexer.run(env, &mut ())
    }

    /// Refine the geometry of the refiner owning `sweep`.
    pub fn refine(&mut self, sweep: SweepId) -> PipelineResult<RefinedPayloads> {
        let key = self.ensure_refiner(sweep)?;
        let env = StageEnv::new(&*self.suite, &*self.symmetry, &self.settings);
        let refiner = self
            .refiners
            .get_mut(&key)
            .ok_or_else(|| {
                PipelineError::configuration(format!("no refiner for sweep {:?}", sweep))
            })?;
        refiner.run(env, &mut ())
    }

    /// Integrate one sweep, refining first when needed.
    pub fn integrate(&mut self, sweep: SweepId) -> PipelineResult<IntegrationResult> {
        let key = self.ensure_refiner(sweep)?;
        self.ensure_integrater(sweep)?;
        let env = StageEnv::new(&*self.suite, &*self.symmetry, &self.settings);
        let refiner = self
            .refiners
            .get_mut(&key)
            .ok_or_else(|| {
                PipelineError::configuration(format!("no refiner for sweep {:?}", sweep))
            })?;
        let integrater = self.integraters.get_mut(&sweep).ok_or_else(|| {
            PipelineError::configuration(format!("no integrater for sweep {:?}", sweep))
        })?;

        // Geometry copied during prepare is stale once the refiner reruns.
        refiner.run(env, &mut ())?;
        if integrater.state() != PhaseState::NotPrepared
            && !integrater.logic().is_current_with(refiner)
        {
            tracing::debug!(
                stage = %integrater.label(),
                refiner = %refiner.label(),
                "refiner re-executed; resetting integrater"
            );
            integrater.reset(true);
        }
        integrater.run(env, refiner)
    }

    /// Scale every sweep of a crystal.
    ///
    /// The null scaler takes each sweep's pre-reduced reflections; the
    /// others integrate every sweep first.
    pub fn scale(&mut self, crystal: CrystalId) -> PipelineResult<ScalingResult> {
        let kind = self.ensure_scaler(crystal)?;
        let sweeps = self.hierarchy.sweeps_of_crystal(crystal);
        if sweeps.is_empty() {
            return Err(PipelineError::configuration(format!(
                "crystal {} has no sweeps",
                self.hierarchy.crystal(crystal)?.name
            )));
        }

        let mut inputs: BTreeMap<Epoch, PathBuf> = BTreeMap::new();
        let mut sources: BTreeMap<Epoch, u64> = BTreeMap::new();
        for sweep in sweeps {
            let node = self.hierarchy.sweep(sweep)?;
            let epoch = node.epoch();
            if kind == ScalerKind::Null {
                let path = node.spec.reflections.clone().ok_or_else(|| {
                    PipelineError::configuration(format!(
                        "sweep {} has no reflections for the null scaler",
                        node.name()
                    ))
                })?;
                inputs.insert(epoch, path);
                continue;
            }
            let integrated = self.integrate(sweep)?.integrated;
            if let Some(integrater) = self.integraters.get(&sweep) {
                sources.insert(epoch, integrater.executions());
            }
            inputs.insert(epoch, integrated);
        }

        let env = StageEnv::new(&*self.suite, &*self.symmetry, &self.settings);
        let scaler = self.scalers.get_mut(&crystal).ok_or_else(|| {
            PipelineError::configuration(format!("no scaler for crystal {:?}", crystal))
        })?;
        // Re-integration may rewrite the same file, so compare execute counts too.
        if scaler.update(|stage| stage.set_integrated(inputs, sources)) {
            tracing::debug!(stage = %scaler.label(), "scaler inputs changed");
        }
        scaler.run(env, &mut ())
    }

    /// Scale every crystal. A failing crystal does not stop the others.
    pub fn run_all(&mut self) -> BTreeMap<String, PipelineResult<ScalingResult>> {
        let crystals: Vec<(CrystalId, String)> = self
            .hierarchy
            .crystals()
            .map(|(id, c)| (id, c.name.clone()))
            .collect();

        let mut outcomes = BTreeMap::new();
        for (id, name) in crystals {
            let outcome = self.scale(id);
            match &outcome {
                Ok(result) => {
                    tracing::info!(
                        crystal = %name,
                        files = result.reflections.len(),
                        "crystal reduced"
                    )
                }
                Err(e) => tracing::error!(crystal = %name, error = %e, "crystal reduction failed"),
            }
            outcomes.insert(name, outcome);
        }
        outcomes
    }

    /// Fully reset every stage controller transitively beneath `node`.
    ///
    /// Each sweep's indexer, the refiner holding it, the sweep's
    /// integrater and the crystal's scaler all return to `NotPrepared`.
    pub fn invalidate_downstream(&mut self, node: NodeRef) -> PipelineResult<()> {
        let crystal = self.hierarchy.crystal_under(node)?;
        let sweeps = self.hierarchy.sweeps_under(node);

        for sweep in &sweeps {
            let epoch = self.hierarchy.sweep(*sweep)?.epoch();
            if let Some(key) = self.existing_refiner_key(*sweep) {
                if let Some(refiner) = self.refiners.get_mut(&key) {
                    refiner.update_indexer(epoch, |indexer| {
                        indexer.reset(true);
                        true
                    });
                    refiner.reset(true);
                }
            }
            if let Some(integrater) = self.integraters.get_mut(sweep) {
                integrater.reset(true);
            }
        }
        if let Some(scaler) = self.scalers.get_mut(&crystal) {
            scaler.reset(true);
        }

        tracing::info!(?node, sweeps = sweeps.len(), "invalidated downstream stages");
        Ok(())
    }

    /// Change a crystal's asserted lattice and cell, push them into every
    /// existing indexer beneath it, and invalidate downstream.
    pub fn set_crystal_lattice(
        &mut self,
        crystal: CrystalId,
        lattice: Option<BravaisLattice>,
        cell: Option<UnitCell>,
    ) -> PipelineResult<()> {
        if cell.is_some() && lattice.is_none() {
            return Err(PipelineError::configuration("a cell requires a lattice"));
        }
        let node = self.hierarchy.crystal_mut(crystal)?;
        if node.lattice == lattice && node.cell == cell {
            return Ok(());
        }
        node.lattice = lattice;
        node.cell = cell;
        tracing::info!(crystal = %node.name, lattice = ?lattice, "crystal lattice changed");

        for sweep in self.hierarchy.sweeps_of_crystal(crystal) {
            let epoch = self.hierarchy.sweep(sweep)?.epoch();
            let Some(key) = self.existing_refiner_key(sweep) else {
                continue;
            };
            if let Some(refiner) = self.refiners.get_mut(&key) {
                refiner.update_indexer(epoch, |indexer| {
                    indexer.update(|stage| stage.set_target(lattice, cell, lattice.is_some()))
                });
            }
        }
        self.invalidate_downstream(NodeRef::Crystal(crystal))
    }

    /// Assert a lattice on the refiner owning `sweep`.
    ///
    /// Anything but `Correct` leaves the refiner reset; integraters fed by
    /// it and the crystal's scaler are reset with it.
    pub fn assert_lattice(
        &mut self,
        sweep: SweepId,
        lattice: BravaisLattice,
    ) -> PipelineResult<LatticeAssertion> {
        let key = self.ensure_refiner(sweep)?;
        let env = StageEnv::new(&*self.suite, &*self.symmetry, &self.settings);
        let refiner = self
            .refiners
            .get_mut(&key)
            .ok_or_else(|| {
                PipelineError::configuration(format!("no refiner for sweep {:?}", sweep))
            })?;
        let assertion = refiner.assert_lattice(env, lattice)?;

        if assertion != LatticeAssertion::Correct {
            let crystal = self.hierarchy.crystal_of(sweep)?;
            let fed = match key {
                RefinerKey::Sweep(s) => vec![s],
                RefinerKey::Crystal(c) => self.hierarchy.sweeps_of_crystal(c),
            };
            for s in fed {
                if let Some(integrater) = self.integraters.get_mut(&s) {
                    integrater.reset(true);
                }
            }
            if let Some(scaler) = self.scalers.get_mut(&crystal) {
                scaler.reset(true);
            }
        }
        Ok(assertion)
    }

    /// Phase reached by a stage; `None` if it has not been built.
    pub fn phase_of(&self, stage: StageRef) -> Option<PhaseState> {
        match stage {
            StageRef::Indexer(sweep) => {
                let epoch = self.hierarchy.sweep(sweep).ok()?.epoch();
                let refiner = self.refiners.get(&self.existing_refiner_key(sweep)?)?;
                refiner.logic().indexer(epoch).map(|ix| ix.state())
            }
            StageRef::Refiner(sweep) => self
                .refiners
                .get(&self.existing_refiner_key(sweep)?)
                .map(|r| r.state()),
            StageRef::Integrater(sweep) => self.integraters.get(&sweep).map(|i| i.state()),
            StageRef::Scaler(crystal) => self.scalers.get(&crystal).map(|s| s.state()),
        }
    }

    /// Refiner owning `sweep`, if built.
    pub fn refiner(&self, sweep: SweepId) -> Option<&StageController<RefinerStage>> {
        self.refiners.get(&self.existing_refiner_key(sweep)?)
    }

    /// Indexer of `sweep`, if built.
    pub fn indexer(&self, sweep: SweepId) -> Option<&StageController<IndexerStage>> {
        let epoch = self.hierarchy.sweep(sweep).ok()?.epoch();
        self.refiner(sweep)?.logic().indexer(epoch)
    }

    pub fn integrater(&self, sweep: SweepId) -> Option<&StageController<IntegraterStage>> {
        self.integraters.get(&sweep)
    }

    pub fn scaler(&self, crystal: CrystalId) -> Option<&StageController<ScalerStage>> {
        self.scalers.get(&crystal)
    }

    /// Number of refiners built so far.
    pub fn refiner_count(&self) -> usize {
        self.refiners.len()
    }

    /// Capture every stage controller.
    pub fn snapshot(&self) -> ProjectState {
        let mut state = ProjectState::new();
        for refiner in self.refiners.values() {
            state
                .refiners
                .insert(refiner.label().to_string(), encode_stage(refiner));
        }
        for integrater in self.integraters.values() {
            state
                .integraters
                .insert(integrater.label().to_string(), encode_stage(integrater));
        }
        for scaler in self.scalers.values() {
            state
                .scalers
                .insert(scaler.label().to_string(), encode_stage(scaler));
        }
        state
    }

    /// Replace the stage controllers with those of a snapshot taken over
    /// the same hierarchy.
    pub fn restore(&mut self, state: ProjectState) -> PipelineResult<()> {
        let mut refiners = BTreeMap::new();
        for (label, record) in state.refiners {
            let sweeps = record.stage.indexers.values().map(|ix| ix.stage.sweep.name.as_str());
            let key = self.refiner_key_for(&label, sweeps)?;
            refiners.insert(key, decode_stage::<RefinerStage>(record));
        }

        let mut integraters = BTreeMap::new();
        for (label, record) in state.integraters {
            let sweep = self.hierarchy.find_sweep(&record.stage.sweep).ok_or_else(|| {
                PipelineError::configuration(format!(
                    "{}: unknown sweep {}",
                    label, record.stage.sweep
                ))
            })?;
            integraters.insert(sweep, decode_stage::<IntegraterStage>(record));
        }

        let mut scalers = BTreeMap::new();
        for (label, record) in state.scalers {
            let crystal = self.hierarchy.find_crystal(&record.stage.crystal).ok_or_else(|| {
                PipelineError::configuration(format!(
                    "{}: unknown crystal {}",
                    label, record.stage.crystal
                ))
            })?;
            scalers.insert(crystal, decode_stage::<ScalerStage>(record));
        }

        tracing::info!(
            refiners = refiners.len(),
            integraters = integraters.len(),
            scalers = scalers.len(),
            saved_at = %state.saved_at,
            "stage state restored"
        );
        self.refiners = refiners;
        self.integraters = integraters;
        self.scalers = scalers;
        Ok(())
    }

    /// Key of a persisted refiner: joint refiners are labelled after their
    /// crystal, single-sweep refiners after their sweep.
    fn refiner_key_for<'a>(
        &self,
        label: &str,
        mut sweeps: impl Iterator<Item = &'a str>,
    ) -> PipelineResult<RefinerKey> {
        let first = sweeps.next().ok_or_else(|| {
            PipelineError::configuration(format!("{}: refiner has no indexers", label))
        })?;
        let sweep = self
            .hierarchy
            .find_sweep(first)
            .ok_or_else(|| {
                PipelineError::configuration(format!("{}: unknown sweep {}", label, first))
            })?;
        let crystal = self.hierarchy.crystal_of(sweep)?;
        if label == format!("{}/refine", self.hierarchy.crystal(crystal)?.name) {
            Ok(RefinerKey::Crystal(crystal))
        } else {
            Ok(RefinerKey::Sweep(sweep))
        }
    }

    /// Crystal by name.
    pub fn crystal_named(&self, name: &str) -> Option<(CrystalId, &Crystal)> {
        let id = self.hierarchy.find_crystal(name)?;
        self.hierarchy.crystal(id).ok().map(|c| (id, c))
    }

    /// Sweep by name.
    pub fn sweep_named(&self, name: &str) -> Option<(SweepId, &Sweep)> {
        let id = self.hierarchy.find_sweep(name)?;
        self.hierarchy.sweep(id).ok().map(|s| (id, s))
    }
}

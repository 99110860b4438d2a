//! Generic stage controller.
//!
//! A [`StageController`] couples a [`PhaseGate`] with the stage's payload
//! and its [`StageLogic`]. Stages that consume another stage's output name
//! it as their `Upstream` and receive it by mutable reference on every
//! `run()`, so reading an upstream payload transparently brings that stage
//! up to date first.

use crate::core::error::{PipelineError, PipelineResult};
use crate::lattice::{CellTolerance, SelectionThresholds, SymmetryMath};
use crate::phase::{PhaseControl, PhaseFlags, PhaseGate, PhaseHooks, PhaseState};
use crate::programs::{Program, ProgramSuite, Tool};
use std::path::{Path, PathBuf};

use super::payload::{Artifact, Payload};

/// Settings shared by every stage of a run.
#[derive(Debug, Clone)]
pub struct StageSettings {
    /// Root under which each stage gets its own directory.
    pub working_directory: PathBuf,
    /// Worker count handed to external programs.
    pub nproc: usize,
    /// Skip beam-centre discovery during indexing.
    pub trust_beam_centre: bool,
    pub thresholds: SelectionThresholds,
    pub tolerance: CellTolerance,
}

impl Default for StageSettings {
    fn default() -> Self {
        Self {
            working_directory: PathBuf::from("work"),
            nproc: 1,
            trust_beam_centre: false,
            thresholds: SelectionThresholds::default(),
            tolerance: CellTolerance::default(),
        }
    }
}

/// Collaborators available to stage logic.
#[derive(Clone, Copy)]
pub struct StageEnv<'a> {
    pub suite: &'a dyn ProgramSuite,
    pub symmetry: &'a dyn SymmetryMath,
    pub settings: &'a StageSettings,
}

impl<'a> StageEnv<'a> {
    pub fn new(
        suite: &'a dyn ProgramSuite,
        symmetry: &'a dyn SymmetryMath,
        settings: &'a StageSettings,
    ) -> Self {
        Self {
            suite,
            symmetry,
            settings,
        }
    }
}

/// Everything a phase hook may touch.
pub struct StageContext<'a, 'c> {
    /// Invalidation handle for the running stage.
    pub control: &'a mut PhaseControl<'c>,
    /// Payload of the running stage.
    pub payload: &'a mut Payload,
    pub env: StageEnv<'a>,
}

impl StageContext<'_, '_> {
    /// Label of the running stage.
    pub fn label(&self) -> &str {
        self.control.label()
    }

    /// Create (if needed) a working directory below the configured root.
    pub fn work_dir(&self, parts: &[&str]) -> PipelineResult<PathBuf> {
        let mut dir = self.env.settings.working_directory.clone();
        dir.extend(parts);
        std::fs::create_dir_all(&dir).map_err(|e| {
            PipelineError::io(format!("failed to create {}", dir.display()), e)
        })?;
        Ok(dir)
    }

    /// Create an invocation of `tool` running in `dir`.
    pub fn program(&self, tool: Tool, dir: &Path) -> PipelineResult<Box<dyn Program>> {
        let mut program = self.env.suite.create(tool)?;
        program.set_working_directory(dir);
        Ok(program)
    }

    /// Declared output of a finished program, or a missing-output failure.
    pub fn require_output(&self, program: &dyn Program, name: &str) -> PipelineResult<PathBuf> {
        program
            .output(name)
            .ok_or_else(|| PipelineError::missing_output(self.label(), name))
    }

    /// File entry of this stage's payload, or a missing-output failure.
    pub fn require_payload(&self, key: &str) -> PipelineResult<PathBuf> {
        self.payload
            .path(key)
            .map(Path::to_path_buf)
            .ok_or_else(|| PipelineError::missing_output(self.label(), key))
    }
}

/// Stage-specific behaviour plugged into the three phases.
pub trait StageLogic {
    /// Result returned by `execute` and cached by the gate.
    type Output: Clone;

    /// Stage consumed by this one, or `()`.
    type Upstream: ?Sized;

    /// Gather and validate inputs.
    fn prepare(
        &mut self,
        ctx: &mut StageContext<'_, '_>,
        upstream: &mut Self::Upstream,
    ) -> PipelineResult<()>;

    /// Do the work and write payload entries.
    fn execute(
        &mut self,
        ctx: &mut StageContext<'_, '_>,
        upstream: &mut Self::Upstream,
    ) -> PipelineResult<Self::Output>;

    /// Post-process results.
    fn finish(
        &mut self,
        _ctx: &mut StageContext<'_, '_>,
        _upstream: &mut Self::Upstream,
    ) -> PipelineResult<()> {
        Ok(())
    }
}

/// Logic bound to its payload, environment and upstream for one `run()`.
struct Bound<'a, L: StageLogic + ?Sized> {
    logic: &'a mut L,
    payload: &'a mut Payload,
    env: StageEnv<'a>,
    upstream: &'a mut L::Upstream,
}

impl<L: StageLogic + ?Sized> PhaseHooks for Bound<'_, L> {
    type Output = L::Output;

    fn prepare(&mut self, control: &mut PhaseControl<'_>) -> PipelineResult<()> {
        let mut ctx = StageContext {
            control,
            payload: &mut *self.payload,
            env: self.env,
        };
        self.logic.prepare(&mut ctx, &mut *self.upstream)
    }

    fn execute(&mut self, control: &mut PhaseControl<'_>) -> PipelineResult<L::Output> {
        let mut ctx = StageContext {
            control,
            payload: &mut *self.payload,
            env: self.env,
        };
        self.logic.execute(&mut ctx, &mut *self.upstream)
    }

    fn finish(&mut self, control: &mut PhaseControl<'_>) -> PipelineResult<()> {
        let mut ctx = StageContext {
            control,
            payload: &mut *self.payload,
            env: self.env,
        };
        self.logic.finish(&mut ctx, &mut *self.upstream)
    }
}

/// A pipeline stage: phase gate, payload and logic.
#[derive(Debug, Clone)]
pub struct StageController<L: StageLogic> {
    gate: PhaseGate<L::Output>,
    payload: Payload,
    logic: L,
}

impl<L: StageLogic> StageController<L> {
    /// Create a controller in the `NotPrepared` state.
    pub fn new(label: impl Into<String>, logic: L) -> Self {
        Self {
            gate: PhaseGate::new(label),
            payload: Payload::new(),
            logic,
        }
    }

    /// Rebuild a controller from persisted parts.
    pub fn restore(
        label: impl Into<String>,
        flags: PhaseFlags,
        result: Option<L::Output>,
        executions: u64,
        payload: Payload,
        logic: L,
    ) -> Self {
        Self {
            gate: PhaseGate::restore(label, flags, result).with_executions(executions),
            payload,
            logic,
        }
    }

    /// Bring the stage up to date and return its result.
    pub fn run(
        &mut self,
        env: StageEnv<'_>,
        upstream: &mut L::Upstream,
    ) -> PipelineResult<L::Output> {
        let mut bound = Bound {
            logic: &mut self.logic,
            payload: &mut self.payload,
            env,
            upstream,
        };
        self.gate.run(&mut bound)
    }

    /// Same as [`run`](Self::run).
    pub fn get_result(
        &mut self,
        env: StageEnv<'_>,
        upstream: &mut L::Upstream,
    ) -> PipelineResult<L::Output> {
        self.run(env, upstream)
    }

    /// Bring the stage up to date, then read one payload entry.
    pub fn get_payload(
        &mut self,
        env: StageEnv<'_>,
        upstream: &mut L::Upstream,
        key: &str,
    ) -> PipelineResult<Option<Artifact>> {
        self.run(env, upstream)?;
        Ok(self.payload.get(key).cloned())
    }

    /// Set a payload entry without invalidating the stage.
    pub fn set_payload(&mut self, key: impl Into<String>, value: impl Into<Artifact>) {
        self.payload.insert(key, value);
    }

    /// Payload as of the last run, without bringing the stage up to date.
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Invalidate after an input changed.
    pub fn reset(&mut self, full: bool) {
        self.gate.reset(full);
        if full {
            self.payload.clear();
        }
    }

    /// Invalidate `execute` and `finish` after a parameter changed.
    pub fn reset_executed(&mut self) {
        self.gate.reset_executed();
    }

    /// Change stage inputs; a change reported by `f` resets the stage fully.
    pub fn update<F>(&mut self, f: F) -> bool
    where
        F: FnOnce(&mut L) -> bool,
    {
        let changed = f(&mut self.logic);
        if changed {
            self.reset(true);
        }
        changed
    }

    /// Change stage parameters, replaying `execute` and `finish`.
    pub fn update_parameters<F>(&mut self, f: F)
    where
        F: FnOnce(&mut L),
    {
        f(&mut self.logic);
        self.reset_executed();
    }

    pub fn logic(&self) -> &L {
        &self.logic
    }

    pub(crate) fn logic_mut(&mut self) -> &mut L {
        &mut self.logic
    }

    pub fn label(&self) -> &str {
        self.gate.label()
    }

    pub fn flags(&self) -> PhaseFlags {
        self.gate.flags()
    }

    pub fn state(&self) -> PhaseState {
        self.gate.state()
    }

    /// Successful executes so far. Downstream stages record it to notice
    /// when this stage has produced a newer result.
    pub fn executions(&self) -> u64 {
        self.gate.executions()
    }

    /// Cached result, without validating currency.
    pub fn cached(&self) -> Option<&L::Output> {
        self.gate.cached()
    }
}

//! Three-phase gate with idempotent re-entry.
//!
//! `run()` drives `prepare → execute → finish` with nested loops so that a
//! hook may invalidate an earlier phase of its own stage (for example after
//! discovering mid-prepare that a sub-stage has to be rebuilt). The loops
//! then re-enter the earliest stale phase without replaying phases that are
//! still valid.
//!
//! Flag invariants: `EXECUTED ⇒ PREPARED` and `FINISHED ⇒ EXECUTED`. Every
//! reset clears the requested flag together with all later ones.

use crate::core::error::{PipelineError, PipelineResult};
use serde::{Deserialize, Serialize};

bitflags::bitflags! {
    /// Completion flags of the three phases.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct PhaseFlags: u8 {
        /// `prepare` has completed for the current inputs.
        const PREPARED = 0b0000_0001;
        /// `execute` has completed for the current inputs.
        const EXECUTED = 0b0000_0010;
        /// `finish` has completed for the current inputs.
        const FINISHED = 0b0000_0100;
    }
}

impl Default for PhaseFlags {
    fn default() -> Self {
        Self::empty()
    }
}

impl PhaseFlags {
    /// Most advanced phase reached.
    pub fn state(&self) -> PhaseState {
        if self.contains(Self::FINISHED) {
            PhaseState::Finished
        } else if self.contains(Self::EXECUTED) {
            PhaseState::Executed
        } else if self.contains(Self::PREPARED) {
            PhaseState::Prepared
        } else {
            PhaseState::NotPrepared
        }
    }

    /// Check the ordering invariants hold.
    pub fn is_consistent(&self) -> bool {
        (!self.contains(Self::EXECUTED) || self.contains(Self::PREPARED))
            && (!self.contains(Self::FINISHED) || self.contains(Self::EXECUTED))
    }
}

/// Position of a gate in its forward-only state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PhaseState {
    NotPrepared,
    Prepared,
    Executed,
    Finished,
}

/// Handle given to phase hooks for invalidating their own stage.
pub struct PhaseControl<'a> {
    flags: &'a mut PhaseFlags,
    label: &'a str,
}

impl<'a> PhaseControl<'a> {
    /// Create a control over a set of flags.
    pub fn new(flags: &'a mut PhaseFlags, label: &'a str) -> Self {
        Self { flags, label }
    }

    /// Label of the owning stage.
    pub fn label(&self) -> &str {
        self.label
    }

    /// Current flags.
    pub fn flags(&self) -> PhaseFlags {
        *self.flags
    }

    /// Force `prepare` (and everything after it) to run again.
    pub fn reset_prepared(&mut self) {
        tracing::debug!(stage = %self.label, "prepare invalidated");
        self.flags.remove(PhaseFlags::all());
    }

    /// Force `execute` and `finish` to run again.
    pub fn reset_executed(&mut self) {
        tracing::debug!(stage = %self.label, "execute invalidated");
        self.flags.remove(PhaseFlags::EXECUTED | PhaseFlags::FINISHED);
    }

    /// Force `finish` to run again.
    pub fn reset_finished(&mut self) {
        self.flags.remove(PhaseFlags::FINISHED);
    }
}

/// Stage logic plugged into a [`PhaseGate`].
pub trait PhaseHooks {
    /// Result produced by `execute`.
    type Output: Clone;

    /// Gather and validate inputs.
    fn prepare(&mut self, control: &mut PhaseControl<'_>) -> PipelineResult<()>;

    /// Perform the substantive work.
    fn execute(&mut self, control: &mut PhaseControl<'_>) -> PipelineResult<Self::Output>;

    /// Post-process results.
    fn finish(&mut self, control: &mut PhaseControl<'_>) -> PipelineResult<()>;
}

/// Phase state plus the cached result of the last `execute`.
#[derive(Debug, Clone)]
pub struct PhaseGate<R> {
    label: String,
    flags: PhaseFlags,
    result: Option<R>,
    /// Successful executes so far; consumers compare it to spot a rerun.
    executions: u64,
}

impl<R: Clone> PhaseGate<R> {
    /// Create a gate in the `NotPrepared` state.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            flags: PhaseFlags::empty(),
            result: None,
            executions: 0,
        }
    }

    /// Rebuild a gate from persisted flags and result.
    pub fn restore(label: impl Into<String>, flags: PhaseFlags, result: Option<R>) -> Self {
        let mut gate = Self {
            label: label.into(),
            flags,
            result,
            executions: 0,
        };
        if !gate.flags.is_consistent() {
            gate.flags = PhaseFlags::empty();
            gate.result = None;
        }
        gate
    }

    /// Carry over the execute count of a persisted gate.
    pub fn with_executions(mut self, executions: u64) -> Self {
        self.executions = executions;
        self
    }

    /// Label used in logs.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Number of successful executes. Never decreases, not even on reset.
    pub fn executions(&self) -> u64 {
        self.executions
    }

    /// Current flags.
    pub fn flags(&self) -> PhaseFlags {
        self.flags
    }

    /// Current state.
    pub fn state(&self) -> PhaseState {
        self.flags.state()
    }

    /// Check if all three phases are current.
    pub fn is_finished(&self) -> bool {
        self.flags.contains(PhaseFlags::FINISHED)
    }

    /// Cached result without validating currency.
    pub fn cached(&self) -> Option<&R> {
        self.result.as_ref()
    }

    /// Drive the phases until all three report complete.
    ///
    /// Returns the cached result without running any hook when the gate is
    /// already finished. A failing hook leaves its own flag clear, so a
    /// retried `run()` resumes at the failed phase.
    pub fn run<H>(&mut self, hooks: &mut H) -> PipelineResult<R>
    where
        H: PhaseHooks<Output = R> + ?Sized,
    {
        if self.result.is_none() && self.flags.contains(PhaseFlags::EXECUTED) {
            // Flags restored without a result cannot vouch for one.
            self.flags.remove(PhaseFlags::EXECUTED | PhaseFlags::FINISHED);
        }

        while !self.flags.contains(PhaseFlags::FINISHED) {
            while !self.flags.contains(PhaseFlags::EXECUTED) {
                while !self.flags.contains(PhaseFlags::PREPARED) {
                    tracing::debug!(stage = %self.label, phase = "prepare", "entering phase");
                    self.flags.insert(PhaseFlags::PREPARED);
                    let mut control = PhaseControl::new(&mut self.flags, &self.label);
                    if let Err(err) = hooks.prepare(&mut control) {
                        self.flags.remove(PhaseFlags::PREPARED);
                        tracing::warn!(
                            stage = %self.label,
                            phase = "prepare",
                            error = %err,
                            "phase failed"
                        );
                        return Err(err);
                    }
                }

                tracing::debug!(stage = %self.label, phase = "execute", "entering phase");
                self.flags.insert(PhaseFlags::EXECUTED);
                let mut control = PhaseControl::new(&mut self.flags, &self.label);
                match hooks.execute(&mut control) {
                    Ok(result) => {
                        self.result = Some(result);
                        self.executions += 1;
                    }
                    Err(err) => {
                        self.flags.remove(PhaseFlags::EXECUTED);
                        tracing::warn!(
                            stage = %self.label,
                            phase = "execute",
                            error = %err,
                            "phase failed"
                        );
                        return Err(err);
                    }
                }
            }

            tracing::debug!(stage = %self.label, phase = "finish", "entering phase");
            self.flags.insert(PhaseFlags::FINISHED);
            let mut control = PhaseControl::new(&mut self.flags, &self.label);
            if let Err(err) = hooks.finish(&mut control) {
                self.flags.remove(PhaseFlags::FINISHED);
                tracing::warn!(stage = %self.label, phase = "finish", error = %err, "phase failed");
                return Err(err);
            }
        }

        self.result.clone().ok_or_else(|| {
            PipelineError::stage(self.label.clone(), "execute produced no result")
        })
    }

    /// Validate phase currency, then return the result.
    pub fn get_result<H>(&mut self, hooks: &mut H) -> PipelineResult<R>
    where
        H: PhaseHooks<Output = R> + ?Sized,
    {
        self.run(hooks)
    }

    /// Invalidate after an upstream input changed.
    ///
    /// A partial reset replays only `finish` and keeps the execute result;
    /// a full reset replays everything and drops it.
    pub fn reset(&mut self, full: bool) {
        tracing::debug!(stage = %self.label, full, "phase gate reset");
        if full {
            self.flags = PhaseFlags::empty();
            self.result = None;
        } else {
            self.flags.remove(PhaseFlags::FINISHED);
        }
    }

    /// Invalidate `execute` and `finish`, keeping `prepare`.
    pub fn reset_executed(&mut self) {
        tracing::debug!(stage = %self.label, "phase gate execute reset");
        self.flags.remove(PhaseFlags::EXECUTED | PhaseFlags::FINISHED);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_follows_most_advanced_flag() {
        assert_eq!(PhaseFlags::empty().state(), PhaseState::NotPrepared);
        assert_eq!(PhaseFlags::PREPARED.state(), PhaseState::Prepared);
        assert_eq!(PhaseFlags::all().state(), PhaseState::Finished);
    }

    #[test]
    fn inconsistent_flags_are_detected() {
        assert!(PhaseFlags::all().is_consistent());
        assert!(!PhaseFlags::EXECUTED.is_consistent());
        assert!(!(PhaseFlags::PREPARED | PhaseFlags::FINISHED).is_consistent());
    }

    #[test]
    fn restore_discards_inconsistent_flags() {
        let gate: PhaseGate<u32> = PhaseGate::restore("x", PhaseFlags::FINISHED, Some(1));
        assert_eq!(gate.state(), PhaseState::NotPrepared);
        assert!(gate.cached().is_none());
    }

    #[test]
    fn restored_execute_count_is_kept() {
        let gate: PhaseGate<u32> =
            PhaseGate::restore("x", PhaseFlags::all(), Some(1)).with_executions(3);
        assert_eq!(gate.executions(), 3);
    }
}

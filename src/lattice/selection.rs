//! Lattice solution selection.
//!
//! A refinement pass produces one candidate per Bravais setting. Without a
//! user-asserted lattice the most specialised candidate that is still
//! geometrically and statistically supported relative to the P1 baseline
//! wins. With an asserted lattice (and optionally cell) the set is filtered
//! and mismatching candidates are discarded for good.
//!
//! Acceptance against the baseline RMSD `r1`, with strict comparisons:
//!
//! | angular deviation | rejected when |
//! |---|---|
//! | `< 0.5°` | `min_cc < 0.5` and `rmsd > 2.0 · r1` |
//! | otherwise | `min_cc < 0.7` and `rmsd > 1.5 · r1` |

use super::{BravaisLattice, Candidate, CellTolerance, UnitCell};
use crate::core::error::{NoSolutionReason, PipelineError, PipelineResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Thresholds of the acceptance rule.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SelectionThresholds {
    /// Angular deviation below which the tight branch applies.
    pub tight_angular_deviation: f64,
    pub tight_min_cc: f64,
    pub tight_rmsd_ratio: f64,
    pub loose_min_cc: f64,
    pub loose_rmsd_ratio: f64,
}

impl Default for SelectionThresholds {
    fn default() -> Self {
        Self {
            tight_angular_deviation: 0.5,
            tight_min_cc: 0.5,
            tight_rmsd_ratio: 2.0,
            loose_min_cc: 0.7,
            loose_rmsd_ratio: 1.5,
        }
    }
}

impl SelectionThresholds {
    /// Apply the acceptance rule to one candidate.
    pub fn accepts(&self, candidate: &Candidate, baseline_rmsd: f64) -> bool {
        if candidate.angular_deviation < self.tight_angular_deviation {
            !(candidate.min_correlation < self.tight_min_cc
                && candidate.rmsd > self.tight_rmsd_ratio * baseline_rmsd)
        } else {
            !(candidate.min_correlation < self.loose_min_cc
                && candidate.rmsd > self.loose_rmsd_ratio * baseline_rmsd)
        }
    }
}

/// Best-supported cell seen for a lattice other than (or including) the chosen one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlternativeLattice {
    pub lattice: BravaisLattice,
    pub rank: u32,
    pub angular_deviation: f64,
    pub unit_cell: UnitCell,
}

/// Working set of candidates from one refinement run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatticeSolutionSet {
    candidates: BTreeMap<u32, Candidate>,
    baseline_rmsd: Option<f64>,
    alternatives: BTreeMap<BravaisLattice, AlternativeLattice>,
    thresholds: SelectionThresholds,
    tolerance: CellTolerance,
}

impl LatticeSolutionSet {
    /// Create an empty set using the standard thresholds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty set with explicit thresholds and cell tolerance.
    pub fn with_thresholds(thresholds: SelectionThresholds, tolerance: CellTolerance) -> Self {
        Self {
            thresholds,
            tolerance,
            ..Self::default()
        }
    }

    /// Replace the working set with a fresh batch for unconstrained
    /// selection.
    ///
    /// Ranks must be unique and the batch must hold the P1 candidate, whose
    /// RMSD becomes the baseline for every later selection.
    pub fn ingest(&mut self, candidates: Vec<Candidate>) -> PipelineResult<()> {
        if !candidates.is_empty() && !candidates.iter().any(Candidate::is_baseline) {
            return Err(PipelineError::no_solution(NoSolutionReason::MissingBaseline));
        }
        self.replace(candidates)
    }

    /// Replace the working set with a batch that will only be checked
    /// against an asserted lattice, so no P1 baseline is needed.
    pub fn ingest_constrained(&mut self, candidates: Vec<Candidate>) -> PipelineResult<()> {
        self.replace(candidates)
    }

    fn replace(&mut self, candidates: Vec<Candidate>) -> PipelineResult<()> {
        if candidates.is_empty() {
            return Err(PipelineError::no_solution(NoSolutionReason::EmptySet));
        }

        let mut by_rank = BTreeMap::new();
        for candidate in candidates {
            let rank = candidate.rank;
            if by_rank.insert(rank, candidate).is_some() {
                return Err(PipelineError::malformed(
                    "candidate solutions",
                    format!("duplicate rank {}", rank),
                ));
            }
        }

        self.baseline_rmsd = by_rank
            .values()
            .find(|c| c.is_baseline())
            .map(|c| c.rmsd);
        self.candidates = by_rank;
        self.alternatives.clear();

        tracing::debug!(
            candidates = self.candidates.len(),
            baseline_rmsd = ?self.baseline_rmsd,
            "ingested lattice candidates"
        );
        Ok(())
    }

    /// Select the best-supported candidate.
    ///
    /// On success the working set is pruned to the winner, so repeated calls
    /// with the same arguments return the same candidate.
    pub fn select_best(
        &mut self,
        preferred_lattice: Option<BravaisLattice>,
        preferred_cell: Option<&UnitCell>,
    ) -> PipelineResult<Candidate> {
        if self.candidates.is_empty() {
            return Err(PipelineError::no_solution(NoSolutionReason::EmptySet));
        }

        let surviving = match preferred_lattice {
            Some(lattice) => self.filter_preferred(lattice, preferred_cell)?,
            None => self.filter_accepted()?,
        };

        // BTreeMap iteration is rank-ascending, so the last survivor wins.
        let winner = surviving
            .last()
            .and_then(|rank| self.candidates.get(rank))
            .cloned()
            .ok_or_else(|| PipelineError::no_solution(NoSolutionReason::NoneAccepted))?;

        for rank in &surviving {
            if let Some(candidate) = self.candidates.get(rank) {
                Self::record_alternative(&mut self.alternatives, candidate);
            }
        }

        self.candidates.retain(|rank, _| *rank == winner.rank);

        tracing::info!(
            lattice = %winner.lattice,
            rank = winner.rank,
            cell = %winner.unit_cell,
            angular_deviation = winner.angular_deviation,
            rmsd = winner.rmsd,
            "selected lattice solution"
        );
        Ok(winner)
    }

    fn filter_preferred(
        &mut self,
        lattice: BravaisLattice,
        cell: Option<&UnitCell>,
    ) -> PipelineResult<Vec<u32>> {
        let lattice_present = self.candidates.values().any(|c| c.lattice == lattice);
        let tolerance = self.tolerance;

        self.candidates.retain(|_, c| {
            c.lattice == lattice
                && cell.map_or(true, |target| {
                    target.equivalent_within(&c.unit_cell, &tolerance)
                })
        });

        if self.candidates.is_empty() {
            let reason = match (lattice_present, cell) {
                (true, Some(cell)) => NoSolutionReason::CellMismatch {
                    lattice,
                    cell: *cell,
                },
                _ => NoSolutionReason::LatticeNotFound { lattice },
            };
            tracing::warn!(%lattice, %reason, "asserted lattice rejected");
            return Err(PipelineError::no_solution(reason));
        }

        Ok(self.candidates.keys().copied().collect())
    }

    fn filter_accepted(&self) -> PipelineResult<Vec<u32>> {
        let baseline = self
            .baseline_rmsd
            .ok_or_else(|| PipelineError::no_solution(NoSolutionReason::MissingBaseline))?;

        let accepted: Vec<u32> = self
            .candidates
            .values()
            .filter(|c| {
                let ok = self.thresholds.accepts(c, baseline);
                if !ok {
                    tracing::debug!(
                        lattice = %c.lattice,
                        rank = c.rank,
                        min_cc = c.min_correlation,
                        rmsd = c.rmsd,
                        "candidate rejected"
                    );
                }
                ok
            })
            .map(|c| c.rank)
            .collect();

        if accepted.is_empty() {
            return Err(PipelineError::no_solution(NoSolutionReason::NoneAccepted));
        }
        Ok(accepted)
    }

    fn record_alternative(
        table: &mut BTreeMap<BravaisLattice, AlternativeLattice>,
        candidate: &Candidate,
    ) {
        if let Some(existing) = table.get(&candidate.lattice) {
            if existing.angular_deviation < candidate.angular_deviation {
                return;
            }
        }
        table.insert(
            candidate.lattice,
            AlternativeLattice {
                lattice: candidate.lattice,
                rank: candidate.rank,
                angular_deviation: candidate.angular_deviation,
                unit_cell: candidate.unit_cell,
            },
        );
    }

    /// Candidates currently in the working set, by rank.
    pub fn candidates(&self) -> impl Iterator<Item = &Candidate> {
        self.candidates.values()
    }

    /// Look up a candidate by rank.
    pub fn get(&self, rank: u32) -> Option<&Candidate> {
        self.candidates.get(&rank)
    }

    /// Number of candidates in the working set.
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    /// Check if the working set is empty.
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// RMSD of the P1 candidate captured at ingest.
    pub fn baseline_rmsd(&self) -> Option<f64> {
        self.baseline_rmsd
    }

    /// Alternative lattice table, one entry per lattice seen by a selection.
    pub fn alternatives(&self) -> impl Iterator<Item = &AlternativeLattice> {
        self.alternatives.values()
    }

    /// Alternative entry for one lattice.
    pub fn alternative(&self, lattice: BravaisLattice) -> Option<&AlternativeLattice> {
        self.alternatives.get(&lattice)
    }

    /// Thresholds in use.
    pub fn thresholds(&self) -> &SelectionThresholds {
        &self.thresholds
    }
}

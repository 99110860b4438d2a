//! Error types for the reduction pipeline.
//!
//! Four error kinds drive pipeline behaviour: configuration problems are
//! fatal, stage failures abort the enclosing `run()` but leave phase state
//! intact for a corrected retry, lattice selection failures carry a reason
//! the caller can branch on, and unavailable role implementations are only
//! recovered from while no explicit preference pins the role.

use crate::lattice::{BravaisLattice, UnitCell};
use thiserror::Error;

/// Common pipeline error conditions.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Required setting missing or an unrecognised program selected for a role.
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// A phase hook could not complete.
    #[error("stage {stage} failed: {message}")]
    StageFailure { stage: String, message: String },

    /// No candidate lattice satisfies the requested constraint.
    #[error("no solution: {reason}")]
    NoSolution { reason: NoSolutionReason },

    /// No implementation could be constructed for a role.
    #[error("no {role} implementation available (tried: {})", .attempted.join(", "))]
    NotAvailable {
        role: String,
        attempted: Vec<String>,
    },

    /// Filesystem access failed.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// An external artifact could not be parsed.
    #[error("malformed {context}: {message}")]
    Malformed { context: String, message: String },
}

/// Why lattice selection produced no solution.
#[derive(Debug, Clone, PartialEq)]
pub enum NoSolutionReason {
    /// No candidate carries the requested lattice symbol.
    LatticeNotFound { lattice: BravaisLattice },
    /// Candidates with the lattice exist but none matches the target cell.
    CellMismatch {
        lattice: BravaisLattice,
        cell: UnitCell,
    },
    /// Unconstrained selection needs the P1 candidate as RMSD reference.
    MissingBaseline,
    /// Every candidate failed the acceptance test against the baseline.
    NoneAccepted,
    /// The working set holds no candidates.
    EmptySet,
}

impl std::fmt::Display for NoSolutionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LatticeNotFound { lattice } => {
                write!(f, "lattice not found: no solution for lattice {}", lattice)
            }
            Self::CellMismatch { lattice, cell } => write!(
                f,
                "cell mismatch: no solution for lattice {} with cell {}",
                lattice, cell
            ),
            Self::MissingBaseline => write!(f, "no P1 baseline candidate"),
            Self::NoneAccepted => write!(f, "no candidate passed the acceptance test"),
            Self::EmptySet => write!(f, "no candidate solutions"),
        }
    }
}

impl PipelineError {
    /// Create a Configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a StageFailure error.
    pub fn stage(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StageFailure {
            stage: stage.into(),
            message: message.into(),
        }
    }

    /// Create the StageFailure raised when delegated work left no artifact behind.
    pub fn missing_output(stage: impl Into<String>, name: impl AsRef<str>) -> Self {
        Self::StageFailure {
            stage: stage.into(),
            message: format!("missing output: {}", name.as_ref()),
        }
    }

    /// Create a NoSolution error.
    pub fn no_solution(reason: NoSolutionReason) -> Self {
        Self::NoSolution { reason }
    }

    /// Create an Io error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a Malformed error.
    pub fn malformed(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Malformed {
            context: context.into(),
            message: message.into(),
        }
    }

    /// Check if this error came out of a failed phase hook.
    pub fn is_stage_failure(&self) -> bool {
        matches!(
            self,
            Self::StageFailure { .. } | Self::Io { .. } | Self::Malformed { .. }
        )
    }

    /// Check if re-invoking after correcting inputs can succeed.
    pub fn is_retriable(&self) -> bool {
        self.is_stage_failure()
    }

    /// Check if this error must abort the whole pipeline.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration { .. } | Self::NotAvailable { .. })
    }

    /// Lattice selection reason, if this is a NoSolution error.
    pub fn no_solution_reason(&self) -> Option<&NoSolutionReason> {
        match self {
            Self::NoSolution { reason } => Some(reason),
            _ => None,
        }
    }
}

/// Result type using PipelineError.
pub type PipelineResult<T> = Result<T, PipelineError>;

//! Role implementation selection.
//!
//! Every role has an ordered capability list. [`resolve`] walks it and
//! returns the first implementation whose tools are all available. An
//! explicit preference pins the list to that one entry, so its absence is
//! fatal instead of falling through.

use super::{ProgramSuite, Tool};
use crate::core::error::{PipelineError, PipelineResult};
use serde::{Deserialize, Serialize};

/// Pipeline roles that can be filled by different programs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Indexer,
    Refiner,
    Integrater,
    Scaler,
}

impl Role {
    /// Implementation names accepted for this role.
    pub fn implementations(&self) -> Vec<&'static str> {
        match self {
            Self::Indexer => IndexerKind::ORDER.iter().map(|k| k.name()).collect(),
            Self::Refiner => RefinerKind::ORDER.iter().map(|k| k.name()).collect(),
            Self::Integrater => IntegraterKind::ORDER.iter().map(|k| k.name()).collect(),
            Self::Scaler => ScalerKind::ORDER.iter().map(|k| k.name()).collect(),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Indexer => write!(f, "indexer"),
            Self::Refiner => write!(f, "refiner"),
            Self::Integrater => write!(f, "integrater"),
            Self::Scaler => write!(f, "scaler"),
        }
    }
}

/// An implementation that can fill a role.
pub trait Implementation: Copy + Eq + std::fmt::Debug + 'static {
    /// Role this implementation fills.
    const ROLE: Role;

    /// Default preference order.
    const ORDER: &'static [Self];

    /// Name used in preferences.
    fn name(&self) -> &'static str;

    /// Tools that must all be available.
    fn required_tools(&self) -> &'static [Tool];

    /// Look an implementation up by name.
    fn from_name(name: &str) -> Option<Self> {
        Self::ORDER.iter().copied().find(|k| k.name() == name)
    }
}

/// Indexing programs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexerKind {
    Dials,
    Labelit,
    Mosflm,
    Xds,
}

impl Implementation for IndexerKind {
    const ROLE: Role = Role::Indexer;
    const ORDER: &'static [Self] = &[Self::Dials, Self::Labelit, Self::Mosflm, Self::Xds];

    fn name(&self) -> &'static str {
        match self {
            Self::Dials => "dials",
            Self::Labelit => "labelit",
            Self::Mosflm => "mosflm",
            Self::Xds => "xds",
        }
    }

    fn required_tools(&self) -> &'static [Tool] {
        match self {
            Self::Dials => &[
                Tool::DialsImport,
                Tool::DialsFindSpots,
                Tool::DialsIndex,
                Tool::DialsRefineBravaisSettings,
                Tool::DialsReindex,
            ],
            Self::Labelit => &[
                Tool::DialsImport,
                Tool::DialsFindSpots,
                Tool::LabelitIndex,
                Tool::DialsRefineBravaisSettings,
                Tool::DialsReindex,
            ],
            Self::Mosflm => &[
                Tool::DialsImport,
                Tool::DialsFindSpots,
                Tool::MosflmIndex,
                Tool::DialsRefineBravaisSettings,
                Tool::DialsReindex,
            ],
            Self::Xds => &[
                Tool::DialsImport,
                Tool::XdsColspot,
                Tool::XdsIdxref,
                Tool::DialsRefineBravaisSettings,
            ],
        }
    }
}

/// Geometry refinement flavours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefinerKind {
    Dials,
    Xds,
}

impl RefinerKind {
    /// Check if one refiner can take indexers from several sweeps.
    pub fn supports_multiple_indexers(&self) -> bool {
        matches!(self, Self::Dials)
    }
}

impl Implementation for RefinerKind {
    const ROLE: Role = Role::Refiner;
    const ORDER: &'static [Self] = &[Self::Dials, Self::Xds];

    fn name(&self) -> &'static str {
        match self {
            Self::Dials => "dials",
            Self::Xds => "xds",
        }
    }

    fn required_tools(&self) -> &'static [Tool] {
        match self {
            Self::Dials => &[],
            Self::Xds => &[
                Tool::XdsXycorr,
                Tool::XdsInit,
                Tool::DialsExportXds,
                Tool::XdsColspot,
                Tool::XdsIdxref,
            ],
        }
    }
}

/// Integration programs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntegraterKind {
    Dials,
    Xds,
    Mosflm,
}

impl IntegraterKind {
    /// Refiner flavour able to feed this integrater.
    pub fn refiner(&self) -> RefinerKind {
        match self {
            Self::Xds => RefinerKind::Xds,
            Self::Dials | Self::Mosflm => RefinerKind::Dials,
        }
    }
}

impl Implementation for IntegraterKind {
    const ROLE: Role = Role::Integrater;
    const ORDER: &'static [Self] = &[Self::Dials, Self::Xds, Self::Mosflm];

    fn name(&self) -> &'static str {
        match self {
            Self::Dials => "dials",
            Self::Xds => "xds",
            Self::Mosflm => "mosflm",
        }
    }

    fn required_tools(&self) -> &'static [Tool] {
        match self {
            Self::Dials => &[Tool::DialsIntegrate],
            Self::Xds => &[Tool::XdsIntegrate],
            Self::Mosflm => &[Tool::MosflmIntegrate],
        }
    }
}

/// Scaling programs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalerKind {
    Aimless,
    Xscale,
    /// Pass pre-reduced reflection files through unchanged.
    Null,
}

impl Implementation for ScalerKind {
    const ROLE: Role = Role::Scaler;
    const ORDER: &'static [Self] = &[Self::Aimless, Self::Xscale, Self::Null];

    fn name(&self) -> &'static str {
        match self {
            Self::Aimless => "aimless",
            Self::Xscale => "xscale",
            Self::Null => "null",
        }
    }

    fn required_tools(&self) -> &'static [Tool] {
        match self {
            Self::Aimless => &[Tool::Aimless],
            Self::Xscale => &[Tool::Xscale],
            Self::Null => &[],
        }
    }
}

/// Outcome of walking a capability list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution<K> {
    /// First implementation with all tools available.
    Selected(K),
    /// Every implementation tried, in order, was missing a tool.
    Unavailable(Vec<K>),
}

/// Resolve a role using its default order.
pub fn resolve<K: Implementation>(
    preference: Option<&str>,
    suite: &dyn ProgramSuite,
) -> PipelineResult<Resolution<K>> {
    resolve_in(K::ORDER, preference, suite)
}

/// Resolve a role walking `order`.
///
/// An unknown preference is a configuration error. A known but
/// unavailable preference is a fatal `NotAvailable`.
pub fn resolve_in<K: Implementation>(
    order: &[K],
    preference: Option<&str>,
    suite: &dyn ProgramSuite,
) -> PipelineResult<Resolution<K>> {
    let pinned;
    let candidates = match preference {
        Some(name) => {
            let kind = K::from_name(name).ok_or_else(|| {
                PipelineError::configuration(format!(
                    "{} {} unknown (expected one of: {})",
                    K::ROLE,
                    name,
                    K::ROLE.implementations().join(", ")
                ))
            })?;
            pinned = [kind];
            &pinned[..]
        }
        None => order,
    };

    let mut attempted = Vec::new();
    for kind in candidates {
        let missing: Vec<Tool> = kind
            .required_tools()
            .iter()
            .copied()
            .filter(|tool| !suite.is_available(*tool))
            .collect();

        if missing.is_empty() {
            tracing::info!(
                role = %K::ROLE,
                implementation = kind.name(),
                "selected implementation"
            );
            return Ok(Resolution::Selected(*kind));
        }

        tracing::debug!(
            role = %K::ROLE,
            implementation = kind.name(),
            missing = ?missing,
            "implementation not available"
        );
        attempted.push(*kind);
    }

    if preference.is_some() {
        return Err(not_available::<K>(&attempted));
    }
    Ok(Resolution::Unavailable(attempted))
}

/// Resolve a role, turning exhaustion into `NotAvailable`.
pub fn select<K: Implementation>(
    order: &[K],
    preference: Option<&str>,
    suite: &dyn ProgramSuite,
) -> PipelineResult<K> {
    match resolve_in(order, preference, suite)? {
        Resolution::Selected(kind) => Ok(kind),
        Resolution::Unavailable(attempted) => Err(not_available::<K>(&attempted)),
    }
}

fn not_available<K: Implementation>(attempted: &[K]) -> PipelineError {
    PipelineError::NotAvailable {
        role: K::ROLE.to_string(),
        attempted: attempted.iter().map(|k| k.name().to_string()).collect(),
    }
}

//! Catalog of the external programs the pipeline drives.

use serde::{Deserialize, Serialize};

/// One external program (or one job of a multi-job program).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Tool {
    DialsImport,
    DialsFindSpots,
    DialsDiscoverBetterModel,
    DialsIndex,
    DialsRefineBravaisSettings,
    DialsReindex,
    DialsExportXds,
    DialsIntegrate,
    XdsXycorr,
    XdsInit,
    XdsColspot,
    XdsIdxref,
    XdsIntegrate,
    MosflmIndex,
    MosflmIntegrate,
    LabelitIndex,
    Aimless,
    Xscale,
}

impl Tool {
    /// Every known tool.
    pub const ALL: [Tool; 18] = [
        Self::DialsImport,
        Self::DialsFindSpots,
        Self::DialsDiscoverBetterModel,
        Self::DialsIndex,
        Self::DialsRefineBravaisSettings,
        Self::DialsReindex,
        Self::DialsExportXds,
        Self::DialsIntegrate,
        Self::XdsXycorr,
        Self::XdsInit,
        Self::XdsColspot,
        Self::XdsIdxref,
        Self::XdsIntegrate,
        Self::MosflmIndex,
        Self::MosflmIntegrate,
        Self::LabelitIndex,
        Self::Aimless,
        Self::Xscale,
    ];

    /// Stable name used in logs, config overrides and parameter maps.
    pub fn name(&self) -> &'static str {
        match self {
            Self::DialsImport => "dials.import",
            Self::DialsFindSpots => "dials.find_spots",
            Self::DialsDiscoverBetterModel => "dials.discover_better_experimental_model",
            Self::DialsIndex => "dials.index",
            Self::DialsRefineBravaisSettings => "dials.refine_bravais_settings",
            Self::DialsReindex => "dials.reindex",
            Self::DialsExportXds => "dials.export_xds",
            Self::DialsIntegrate => "dials.integrate",
            Self::XdsXycorr => "xds.xycorr",
            Self::XdsInit => "xds.init",
            Self::XdsColspot => "xds.colspot",
            Self::XdsIdxref => "xds.idxref",
            Self::XdsIntegrate => "xds.integrate",
            Self::MosflmIndex => "mosflm.index",
            Self::MosflmIntegrate => "mosflm.integrate",
            Self::LabelitIndex => "labelit.index",
            Self::Aimless => "aimless",
            Self::Xscale => "xscale",
        }
    }

    /// Executable looked up on the search path.
    pub fn executable(&self) -> &'static str {
        match self {
            Self::XdsXycorr
            | Self::XdsInit
            | Self::XdsColspot
            | Self::XdsIdxref
            | Self::XdsIntegrate => "xds_par",
            Self::MosflmIndex | Self::MosflmIntegrate => "ipmosflm",
            Self::LabelitIndex => "labelit.index",
            Self::Aimless => "aimless",
            Self::Xscale => "xscale_par",
            dials => dials.name(),
        }
    }

    /// Job selector passed to multi-job programs.
    pub fn job(&self) -> Option<&'static str> {
        match self {
            Self::XdsXycorr => Some("XYCORR"),
            Self::XdsInit => Some("INIT"),
            Self::XdsColspot => Some("COLSPOT"),
            Self::XdsIdxref => Some("IDXREF"),
            Self::XdsIntegrate => Some("DEFPIX INTEGRATE"),
            _ => None,
        }
    }

    /// Files a successful run must leave in its working directory.
    ///
    /// The first entry is the primary artifact of the tool.
    pub fn outputs(&self) -> &'static [&'static str] {
        match self {
            Self::DialsImport => &["imported.expt"],
            Self::DialsFindSpots => &["strong.refl"],
            Self::DialsDiscoverBetterModel => &["optimised.expt"],
            Self::DialsIndex | Self::MosflmIndex | Self::LabelitIndex => {
                &["indexed.expt", "indexed.refl"]
            }
            Self::DialsRefineBravaisSettings => &["bravais_summary.json"],
            Self::DialsReindex => &["reindexed.expt", "reindexed.refl"],
            Self::DialsExportXds => &["XPARM.XDS"],
            Self::DialsIntegrate => &["integrated.refl", "integrated.expt"],
            Self::XdsXycorr => &["X-CORRECTIONS.cbf", "Y-CORRECTIONS.cbf"],
            Self::XdsInit => &["BLANK.cbf", "BKGINIT.cbf", "GAIN.cbf"],
            Self::XdsColspot => &["SPOT.XDS"],
            Self::XdsIdxref => &["XPARM.XDS", "SPOT.XDS"],
            Self::XdsIntegrate => &["INTEGRATE.HKL"],
            Self::MosflmIntegrate => &["integrated.mtz"],
            Self::Aimless => &["scaled.mtz"],
            Self::Xscale => &["XSCALE.HKL"],
        }
    }

    /// Primary artifact name.
    pub fn primary_output(&self) -> &'static str {
        self.outputs()[0]
    }

    /// Look a tool up by its stable name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tool| tool.name() == name)
    }
}

impl std::fmt::Display for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

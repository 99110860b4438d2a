//! Image sweep description handed to the indexing stage.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Epoch distinguishing sweeps contributed to one refinement.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Epoch(pub u64);

impl std::fmt::Display for Epoch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Images and geometry hints of one sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepInput {
    pub name: String,
    pub epoch: Epoch,
    /// Image file template, e.g. `"lyso_1_####.cbf"`.
    pub template: String,
    pub directory: PathBuf,
    /// Inclusive image range used for processing.
    pub wedge: (u32, u32),
    #[serde(default)]
    pub beam: Option<[f64; 2]>,
    #[serde(default)]
    pub distance: Option<f64>,
    #[serde(default)]
    pub wavelength: Option<f64>,
}

impl SweepInput {
    /// Full path of the image template.
    pub fn template_path(&self) -> PathBuf {
        self.directory.join(&self.template)
    }

    /// Image range as `first-last`.
    pub fn image_range(&self) -> String {
        format!("{}-{}", self.wedge.0, self.wedge.1)
    }
}

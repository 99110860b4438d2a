//! Project state snapshots.
//!
//! A [`ProjectState`] captures every stage controller of a project keyed
//! by label. Snapshots are written as pretty JSON for inspection, or as
//! bincode when the file carries a `.bin` extension.

use super::records::{IntegraterState, RefinerState, ScalerState};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Current snapshot format version.
pub const FORMAT_VERSION: u32 = 1;

/// Every stage controller of one project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectState {
    /// Snapshot format version.
    pub format: u32,
    /// RFC 3339 time the snapshot was taken.
    pub saved_at: String,
    /// Refiners by label; each carries its indexers.
    pub refiners: BTreeMap<String, RefinerState>,
    pub integraters: BTreeMap<String, IntegraterState>,
    pub scalers: BTreeMap<String, ScalerState>,
}

impl Default for ProjectState {
    fn default() -> Self {
        Self::new()
    }
}

impl ProjectState {
    /// Create an empty snapshot stamped with the current time.
    pub fn new() -> Self {
        Self {
            format: FORMAT_VERSION,
            saved_at: chrono::Utc::now().to_rfc3339(),
            refiners: BTreeMap::new(),
            integraters: BTreeMap::new(),
            scalers: BTreeMap::new(),
        }
    }

    /// Total number of stage controllers, counting nested indexers.
    pub fn stage_count(&self) -> usize {
        let indexers: usize = self
            .refiners
            .values()
            .map(|r| r.stage.indexers.len())
            .sum();
        indexers + self.refiners.len() + self.integraters.len() + self.scalers.len()
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("failed to serialize project state")
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let state: Self =
            serde_json::from_str(text).context("failed to parse project state")?;
        state.check_format()?;
        Ok(state)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).context("failed to serialize project state")
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let state: Self =
            bincode::deserialize(bytes).context("failed to deserialize project state")?;
        state.check_format()?;
        Ok(state)
    }

    /// Write the snapshot; bincode for `.bin` paths, JSON otherwise.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }
        let bytes = if is_binary(path) {
            self.to_bytes()?
        } else {
            self.to_json()?.into_bytes()
        };
        let file = std::fs::File::create(path)
            .with_context(|| format!("failed to create state file {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        writer
            .write_all(&bytes)
            .context("failed to write project state")?;
        writer.flush().context("failed to flush project state")?;
        Ok(())
    }

    /// Read a snapshot written by [`ProjectState::write_to_file`].
    pub fn read_from_file(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("failed to open state file {}", path.display()))?;
        let mut reader = BufReader::new(file);
        let mut bytes = Vec::new();
        reader
            .read_to_end(&mut bytes)
            .context("failed to read project state")?;

        let looks_json = bytes
            .iter()
            .find(|b| !b.is_ascii_whitespace())
            .is_some_and(|b| *b == b'{');
        if looks_json && !is_binary(path) {
            let text = std::str::from_utf8(&bytes).context("state file is not UTF-8")?;
            Self::from_json(text)
        } else {
            Self::from_bytes(&bytes)
        }
    }

    fn check_format(&self) -> Result<()> {
        if self.format != FORMAT_VERSION {
            bail!(
                "unsupported state format {} (expected {})",
                self.format,
                FORMAT_VERSION
            );
        }
        Ok(())
    }
}

fn is_binary(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "bin")
}

//! Crystal → wavelength → sweep model.
//!
//! Nodes live in a flat arena and refer to each other through typed ids.
//! Each sweep belongs to exactly one wavelength, each wavelength to
//! exactly one crystal.

use crate::core::config::SweepConfig;
use crate::core::error::{PipelineError, PipelineResult};
use crate::lattice::{BravaisLattice, UnitCell};
use crate::stage::{Epoch, SweepInput};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Crystal identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CrystalId(pub usize);

/// Wavelength identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WavelengthId(pub usize);

/// Sweep identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SweepId(pub usize);

/// A node of the hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeRef {
    Crystal(CrystalId),
    Wavelength(WavelengthId),
    Sweep(SweepId),
}

/// One crystal with its asserted symmetry.
#[derive(Debug, Clone)]
pub struct Crystal {
    pub name: String,
    /// Lattice asserted for every sweep of this crystal.
    pub lattice: Option<BravaisLattice>,
    pub cell: Option<UnitCell>,
    pub wavelengths: Vec<WavelengthId>,
}

/// One wavelength of a crystal.
#[derive(Debug, Clone)]
pub struct Wavelength {
    pub name: String,
    /// Wavelength in Å.
    pub wavelength: f64,
    pub crystal: CrystalId,
    pub sweeps: Vec<SweepId>,
}

/// Fields of a sweep before it is attached to a wavelength.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepSpec {
    pub name: String,
    pub epoch: Epoch,
    pub template: String,
    pub directory: PathBuf,
    pub wedge: (u32, u32),
    pub beam: Option<[f64; 2]>,
    pub distance: Option<f64>,
    /// High-resolution limit (Å).
    pub resolution: Option<f64>,
    /// Pre-reduced reflections.
    pub reflections: Option<PathBuf>,
}

impl SweepSpec {
    pub fn new(
        name: impl Into<String>,
        epoch: u64,
        template: impl Into<String>,
        directory: impl Into<PathBuf>,
        wedge: (u32, u32),
    ) -> Self {
        Self {
            name: name.into(),
            epoch: Epoch(epoch),
            template: template.into(),
            directory: directory.into(),
            wedge,
            beam: None,
            distance: None,
            resolution: None,
            reflections: None,
        }
    }
}

impl From<&SweepConfig> for SweepSpec {
    fn from(config: &SweepConfig) -> Self {
        Self {
            name: config.name.clone(),
            epoch: Epoch(config.epoch),
            template: config.template.clone(),
            directory: config.directory.clone(),
            wedge: (config.first_image, config.last_image),
            beam: config.beam,
            distance: config.distance,
            resolution: config.resolution,
            reflections: config.reflections.clone(),
        }
    }
}

/// One sweep of images attached to a wavelength.
#[derive(Debug, Clone)]
pub struct Sweep {
    pub wavelength: WavelengthId,
    pub spec: SweepSpec,
}

impl Sweep {
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn epoch(&self) -> Epoch {
        self.spec.epoch
    }

    /// Input handed to an indexer of this sweep.
    pub fn input(&self, wavelength: f64) -> SweepInput {
        SweepInput {
            name: self.spec.name.clone(),
            epoch: self.spec.epoch,
            template: self.spec.template.clone(),
            directory: self.spec.directory.clone(),
            wedge: self.spec.wedge,
            beam: self.spec.beam,
            distance: self.spec.distance,
            wavelength: Some(wavelength),
        }
    }
}

/// Arena holding every node.
#[derive(Debug, Clone, Default)]
pub struct Hierarchy {
    crystals: Vec<Crystal>,
    wavelengths: Vec<Wavelength>,
    sweeps: Vec<Sweep>,
}

impl Hierarchy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a crystal. Names are unique.
    pub fn add_crystal(
        &mut self,
        name: impl Into<String>,
        lattice: Option<BravaisLattice>,
        cell: Option<UnitCell>,
    ) -> PipelineResult<CrystalId> {
        let name = name.into();
        if self.find_crystal(&name).is_some() {
            return Err(PipelineError::configuration(format!(
                "duplicate crystal name: {}",
                name
            )));
        }
        if cell.is_some() && lattice.is_none() {
            return Err(PipelineError::configuration(format!(
                "crystal {}: a cell requires a lattice",
                name
            )));
        }
        let id = CrystalId(self.crystals.len());
        self.crystals.push(Crystal {
            name,
            lattice,
            cell,
            wavelengths: Vec::new(),
        });
        Ok(id)
    }

    /// Add a wavelength under `crystal`.
    pub fn add_wavelength(
        &mut self,
        crystal: CrystalId,
        name: impl Into<String>,
        wavelength: f64,
    ) -> PipelineResult<WavelengthId> {
        let name = name.into();
        if !(wavelength > 0.0) {
            return Err(PipelineError::configuration(format!(
                "wavelength {} must be > 0, got: {}",
                name, wavelength
            )));
        }
        let id = WavelengthId(self.wavelengths.len());
        let owner = self.crystal_mut(crystal)?;
        owner.wavelengths.push(id);
        self.wavelengths.push(Wavelength {
            name,
            wavelength,
            crystal,
            sweeps: Vec::new(),
        });
        Ok(id)
    }

    /// Add a sweep under `wavelength`. Sweep names are unique and epochs
    /// are unique within a crystal.
    pub fn add_sweep(
        &mut self,
        wavelength: WavelengthId,
        spec: SweepSpec,
    ) -> PipelineResult<SweepId> {
        if self.find_sweep(&spec.name).is_some() {
            return Err(PipelineError::configuration(format!(
                "duplicate sweep name: {}",
                spec.name
            )));
        }
        if spec.wedge.0 > spec.wedge.1 {
            return Err(PipelineError::configuration(format!(
                "sweep {}: first image {} after last image {}",
                spec.name, spec.wedge.0, spec.wedge.1
            )));
        }
        let crystal = self.wavelength(wavelength)?.crystal;
        if self
            .sweeps_of_crystal(crystal)
            .iter()
            .any(|id| self.sweeps[id.0].spec.epoch == spec.epoch)
        {
            return Err(PipelineError::configuration(format!(
                "sweep {}: epoch {} already used in crystal {}",
                spec.name,
                spec.epoch,
                self.crystals[crystal.0].name
            )));
        }

        let id = SweepId(self.sweeps.len());
        self.wavelengths[wavelength.0].sweeps.push(id);
        self.sweeps.push(Sweep { wavelength, spec });
        Ok(id)
    }

    pub fn crystal(&self, id: CrystalId) -> PipelineResult<&Crystal> {
        self.crystals
            .get(id.0)
            .ok_or_else(|| PipelineError::configuration(format!("unknown crystal {:?}", id)))
    }

    pub(crate) fn crystal_mut(&mut self, id: CrystalId) -> PipelineResult<&mut Crystal> {
        self.crystals
            .get_mut(id.0)
            .ok_or_else(|| PipelineError::configuration(format!("unknown crystal {:?}", id)))
    }

    pub fn wavelength(&self, id: WavelengthId) -> PipelineResult<&Wavelength> {
        self.wavelengths
            .get(id.0)
            .ok_or_else(|| PipelineError::configuration(format!("unknown wavelength {:?}", id)))
    }

    pub fn sweep(&self, id: SweepId) -> PipelineResult<&Sweep> {
        self.sweeps
            .get(id.0)
            .ok_or_else(|| PipelineError::configuration(format!("unknown sweep {:?}", id)))
    }

    /// Crystal owning a sweep.
    pub fn crystal_of(&self, sweep: SweepId) -> PipelineResult<CrystalId> {
        let wavelength = self.sweep(sweep)?.wavelength;
        Ok(self.wavelength(wavelength)?.crystal)
    }

    /// Indexer input for a sweep, carrying its wavelength.
    pub fn sweep_input(&self, sweep: SweepId) -> PipelineResult<SweepInput> {
        let node = self.sweep(sweep)?;
        let wavelength = self.wavelength(node.wavelength)?.wavelength;
        Ok(node.input(wavelength))
    }

    /// Sweeps of a crystal ordered by epoch.
    pub fn sweeps_of_crystal(&self, crystal: CrystalId) -> Vec<SweepId> {
        let Some(owner) = self.crystals.get(crystal.0) else {
            return Vec::new();
        };
        let mut sweeps: Vec<SweepId> = owner
            .wavelengths
            .iter()
            .filter_map(|w| self.wavelengths.get(w.0))
            .flat_map(|w| w.sweeps.iter().copied())
            .collect();
        sweeps.sort_by_key(|id| self.sweeps[id.0].spec.epoch);
        sweeps
    }

    /// Every sweep transitively beneath `node`, a sweep included.
    pub fn sweeps_under(&self, node: NodeRef) -> Vec<SweepId> {
        match node {
            NodeRef::Crystal(crystal) => self.sweeps_of_crystal(crystal),
            NodeRef::Wavelength(wavelength) => self
                .wavelengths
                .get(wavelength.0)
                .map(|w| w.sweeps.clone())
                .unwrap_or_default(),
            NodeRef::Sweep(sweep) if sweep.0 < self.sweeps.len() => vec![sweep],
            NodeRef::Sweep(_) => Vec::new(),
        }
    }

    /// Crystal that `node` belongs to.
    pub fn crystal_under(&self, node: NodeRef) -> PipelineResult<CrystalId> {
        match node {
            NodeRef::Crystal(crystal) => self.crystal(crystal).map(|_| crystal),
            NodeRef::Wavelength(wavelength) => Ok(self.wavelength(wavelength)?.crystal),
            NodeRef::Sweep(sweep) => self.crystal_of(sweep),
        }
    }

    pub fn find_crystal(&self, name: &str) -> Option<CrystalId> {
        self.crystals
            .iter()
            .position(|c| c.name == name)
            .map(CrystalId)
    }

    pub fn find_sweep(&self, name: &str) -> Option<SweepId> {
        self.sweeps
            .iter()
            .position(|s| s.spec.name == name)
            .map(SweepId)
    }

    pub fn crystals(&self) -> impl Iterator<Item = (CrystalId, &Crystal)> {
        self.crystals
            .iter()
            .enumerate()
            .map(|(i, c)| (CrystalId(i), c))
    }

    pub fn sweeps(&self) -> impl Iterator<Item = (SweepId, &Sweep)> {
        self.sweeps.iter().enumerate().map(|(i, s)| (SweepId(i), s))
    }
}

//! Common test utilities.
//!
//! This module contains shared helpers for integration tests.
//! Import with `mod common;` in test files.

#![allow(dead_code)]

use diffred::core::error::{PipelineError, PipelineResult};
use diffred::lattice::{BravaisLattice, Candidate, ChangeOfBasis, TabulatedSymmetry, UnitCell};
use diffred::programs::{Program, ProgramSuite, Tool};
use diffred::stage::{Epoch, StageEnv, StageSettings, SweepInput};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tempfile::TempDir;

/// Bravais summary from the worked selection example: rank 2 (tP) wins.
pub const WORKED_SUMMARY: &str = r#"{
    "0": {"bravais": "aP", "max_angular_difference": 0.0, "min_cc": 0.99,
          "rmsd": 0.05, "nspots": 900, "cb_op": "a,b,c",
          "experiments_file": "bravais_setting_0.expt",
          "unit_cell": [78.0, 78.1, 37.2, 90.0, 90.0, 90.0]},
    "1": {"bravais": "oP", "max_angular_difference": 0.3, "min_cc": 0.6,
          "rmsd": 0.08, "nspots": 890, "cb_op": "a,b,c",
          "experiments_file": "bravais_setting_1.expt",
          "unit_cell": [78.0, 78.1, 37.2, 90.0, 90.0, 90.0]},
    "2": {"bravais": "tP", "max_angular_difference": 0.4, "min_cc": 0.55,
          "rmsd": 0.40, "nspots": 880, "cb_op": "b,c,a",
          "experiments_file": "bravais_setting_2.expt",
          "unit_cell": [78.05, 78.05, 37.2, 90.0, 90.0, 90.0]}
}"#;

/// Shared, inspectable script behind a [`ScriptedSuite`].
#[derive(Debug, Default)]
pub struct Script {
    /// Completed and failed runs per tool.
    pub calls: BTreeMap<Tool, usize>,
    /// Inputs of every run, in order.
    pub runs: Vec<(Tool, BTreeMap<String, String>)>,
    /// Tools whose run fails.
    pub fail: HashSet<Tool>,
    /// Tools that run but write no outputs.
    pub omit: HashSet<Tool>,
    /// Tools reported as not installed.
    pub unavailable: HashSet<Tool>,
    /// Values reported by each tool.
    pub reports: BTreeMap<Tool, BTreeMap<String, String>>,
    /// Body of the Bravais summary file.
    pub summary: String,
}

/// In-process program suite writing declared outputs as empty files.
#[derive(Clone)]
pub struct ScriptedSuite {
    script: Rc<RefCell<Script>>,
}

impl ScriptedSuite {
    pub fn new() -> Self {
        let mut script = Script {
            summary: WORKED_SUMMARY.to_string(),
            ..Script::default()
        };
        script
            .reports
            .insert(Tool::DialsIndex, report(&[("d_max", "40.0"), ("rmsd", "0.05")]));
        script.reports.insert(
            Tool::XdsIdxref,
            report(&[
                ("d_max", "38.0"),
                ("space_group_number", "75"),
                ("space_group", "P4"),
                ("unit_cell", "78.05,78.05,37.2,90,90,90"),
            ]),
        );
        script
            .reports
            .insert(Tool::DialsIntegrate, report(&[("Sigma_m", "0.12")]));
        Self {
            script: Rc::new(RefCell::new(script)),
        }
    }

    /// Number of runs of `tool` so far.
    pub fn calls(&self, tool: Tool) -> usize {
        self.script.borrow().calls.get(&tool).copied().unwrap_or(0)
    }

    /// Inputs of the last run of `tool`.
    pub fn last_inputs(&self, tool: Tool) -> Option<BTreeMap<String, String>> {
        self.script
            .borrow()
            .runs
            .iter()
            .rev()
            .find(|(t, _)| *t == tool)
            .map(|(_, inputs)| inputs.clone())
    }

    pub fn fail(&self, tool: Tool) {
        self.script.borrow_mut().fail.insert(tool);
    }

    pub fn heal(&self, tool: Tool) {
        let mut script = self.script.borrow_mut();
        script.fail.remove(&tool);
        script.omit.remove(&tool);
    }

    pub fn omit(&self, tool: Tool) {
        self.script.borrow_mut().omit.insert(tool);
    }

    pub fn uninstall(&self, tool: Tool) {
        self.script.borrow_mut().unavailable.insert(tool);
    }

    pub fn set_report(&self, tool: Tool, key: &str, value: &str) {
        self.script
            .borrow_mut()
            .reports
            .entry(tool)
            .or_default()
            .insert(key.to_string(), value.to_string());
    }

    pub fn set_summary(&self, summary: &str) {
        self.script.borrow_mut().summary = summary.to_string();
    }

    /// Total runs across all tools.
    pub fn total_calls(&self) -> usize {
        self.script.borrow().calls.values().sum()
    }
}

impl ProgramSuite for ScriptedSuite {
    fn create(&self, tool: Tool) -> PipelineResult<Box<dyn Program>> {
        if !self.is_available(tool) {
            return Err(PipelineError::NotAvailable {
                role: tool.name().to_string(),
                attempted: vec![tool.name().to_string()],
            });
        }
        Ok(Box::new(ScriptedProgram {
            tool,
            script: Rc::clone(&self.script),
            directory: PathBuf::from("."),
            inputs: BTreeMap::new(),
            completed: false,
        }))
    }

    fn is_available(&self, tool: Tool) -> bool {
        !self.script.borrow().unavailable.contains(&tool)
    }
}

struct ScriptedProgram {
    tool: Tool,
    script: Rc<RefCell<Script>>,
    directory: PathBuf,
    inputs: BTreeMap<String, String>,
    completed: bool,
}

impl Program for ScriptedProgram {
    fn tool(&self) -> Tool {
        self.tool
    }

    fn set_working_directory(&mut self, directory: &Path) {
        self.directory = directory.to_path_buf();
    }

    fn set_input(&mut self, key: &str, value: String) {
        self.inputs.insert(key.to_string(), value);
    }

    fn run(&mut self) -> PipelineResult<()> {
        let mut script = self.script.borrow_mut();
        *script.calls.entry(self.tool).or_insert(0) += 1;
        script.runs.push((self.tool, self.inputs.clone()));

        if script.fail.contains(&self.tool) {
            return Err(PipelineError::stage(self.tool.name(), "exited with status 1"));
        }
        if script.omit.contains(&self.tool) {
            self.completed = true;
            return Ok(());
        }

        std::fs::create_dir_all(&self.directory)
            .map_err(|e| PipelineError::io("creating program directory", e))?;
        for name in self.tool.outputs() {
            let path = self.directory.join(name);
            let body = if self.tool == Tool::DialsRefineBravaisSettings {
                script.summary.clone()
            } else {
                String::new()
            };
            std::fs::write(&path, body).map_err(|e| PipelineError::io("writing output", e))?;
        }
        if self.tool == Tool::DialsRefineBravaisSettings {
            for i in 0..8 {
                let path = self.directory.join(format!("bravais_setting_{}.expt", i));
                std::fs::write(&path, "").map_err(|e| PipelineError::io("writing output", e))?;
            }
        }
        self.completed = true;
        Ok(())
    }

    fn output(&self, name: &str) -> Option<PathBuf> {
        let path = self.directory.join(name);
        (self.completed && path.is_file()).then_some(path)
    }

    fn reported(&self, key: &str) -> Option<String> {
        self.script
            .borrow()
            .reports
            .get(&self.tool)
            .and_then(|r| r.get(key))
            .cloned()
    }
}

fn report(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Scripted suite, symmetry and settings rooted in a temp directory.
pub struct Fixture {
    pub dir: TempDir,
    pub suite: ScriptedSuite,
    pub symmetry: TabulatedSymmetry,
    pub settings: StageSettings,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let settings = StageSettings {
            working_directory: dir.path().join("work"),
            trust_beam_centre: true,
            ..StageSettings::default()
        };
        Self {
            dir,
            suite: ScriptedSuite::new(),
            symmetry: TabulatedSymmetry,
            settings,
        }
    }

    pub fn env(&self) -> StageEnv<'_> {
        StageEnv::new(&self.suite, &self.symmetry, &self.settings)
    }

    pub fn sweep(&self, name: &str, epoch: u64) -> SweepInput {
        SweepInput {
            name: name.to_string(),
            epoch: Epoch(epoch),
            template: format!("{}_####.cbf", name),
            directory: self.dir.path().join("images"),
            wedge: (1, 90),
            beam: None,
            distance: None,
            wavelength: Some(0.9795),
        }
    }
}

/// Candidate with identity change of basis.
pub fn candidate(
    rank: u32,
    lattice: &str,
    angular_deviation: f64,
    rmsd: f64,
    min_correlation: f64,
) -> Candidate {
    Candidate {
        rank,
        lattice: lattice.parse::<BravaisLattice>().expect("valid lattice"),
        unit_cell: UnitCell::new(78.0, 78.0, 37.0, 90.0, 90.0, 90.0),
        angular_deviation,
        rmsd,
        min_correlation,
        nspots: 0,
        change_of_basis: ChangeOfBasis::identity(),
        source: None,
    }
}

/// The three candidates of the worked selection example.
pub fn worked_candidates() -> Vec<Candidate> {
    vec![
        candidate(0, "aP", 0.0, 0.05, 0.99),
        candidate(1, "oP", 0.3, 0.08, 0.6),
        candidate(2, "tP", 0.4, 0.40, 0.55),
    ]
}

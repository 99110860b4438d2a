//! Process-backed programs.
//!
//! Each invocation becomes one child process started in the working
//! directory with its inputs as `key=value` arguments. Reported values are
//! read from `key: value` lines on standard output.

use super::{Program, ProgramSuite, Tool};
use crate::core::error::{PipelineError, PipelineResult};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Program run as a child process.
#[derive(Debug, Clone)]
pub struct CommandProgram {
    tool: Tool,
    executable: PathBuf,
    working_directory: PathBuf,
    inputs: BTreeMap<String, String>,
    reported: BTreeMap<String, String>,
    completed: bool,
}

impl CommandProgram {
    /// Create an invocation of `tool` using `executable`.
    pub fn new(tool: Tool, executable: PathBuf) -> Self {
        Self {
            tool,
            executable,
            working_directory: PathBuf::from("."),
            inputs: BTreeMap::new(),
            reported: BTreeMap::new(),
            completed: false,
        }
    }

    /// Arguments passed on the command line.
    pub fn arguments(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(self.inputs.len() + 1);
        if let Some(job) = self.tool.job() {
            args.push(format!("job={}", job));
        }
        args.extend(self.inputs.iter().map(|(k, v)| format!("{}={}", k, v)));
        args
    }
}

/// Parse `key: value` lines from program output.
pub fn parse_reported(stdout: &str) -> BTreeMap<String, String> {
    stdout
        .lines()
        .filter_map(|line| line.split_once(':'))
        .filter(|(key, _)| {
            !key.is_empty() && !key.contains(char::is_whitespace) && !key.contains('/')
        })
        .map(|(key, value)| (key.to_string(), value.trim().to_string()))
        .collect()
}

impl Program for CommandProgram {
    fn tool(&self) -> Tool {
        self.tool
    }

    fn set_working_directory(&mut self, directory: &Path) {
        self.working_directory = directory.to_path_buf();
    }

    fn set_input(&mut self, key: &str, value: String) {
        self.inputs.insert(key.to_string(), value);
    }

    fn run(&mut self) -> PipelineResult<()> {
        self.completed = false;
        let args = self.arguments();
        tracing::info!(
            tool = %self.tool,
            executable = %self.executable.display(),
            directory = %self.working_directory.display(),
            "launching program"
        );

        let output = Command::new(&self.executable)
            .args(&args)
            .current_dir(&self.working_directory)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| PipelineError::io(format!("failed to launch {}", self.tool), e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PipelineError::stage(
                self.tool.name(),
                format!(
                    "exited with {}: {}",
                    output.status,
                    stderr.lines().last().unwrap_or("")
                ),
            ));
        }

        self.reported = parse_reported(&String::from_utf8_lossy(&output.stdout));

        for name in self.tool.outputs() {
            if !self.working_directory.join(name).is_file() {
                return Err(PipelineError::missing_output(self.tool.name(), name));
            }
        }

        tracing::debug!(tool = %self.tool, reported = self.reported.len(), "program completed");
        self.completed = true;
        Ok(())
    }

    fn output(&self, name: &str) -> Option<PathBuf> {
        if !self.completed || !self.tool.outputs().contains(&name) {
            return None;
        }
        let path = self.working_directory.join(name);
        path.is_file().then_some(path)
    }

    fn reported(&self, key: &str) -> Option<String> {
        self.reported.get(key).cloned()
    }
}

/// Suite that resolves tools to executables on disk.
#[derive(Debug, Clone, Default)]
pub struct CommandSuite {
    search_path: Vec<PathBuf>,
    executables: BTreeMap<String, PathBuf>,
}

impl CommandSuite {
    /// Create a suite searching `search_path` before `PATH`.
    pub fn new(search_path: Vec<PathBuf>, executables: BTreeMap<String, PathBuf>) -> Self {
        Self {
            search_path,
            executables,
        }
    }

    /// Locate the executable for `tool`.
    pub fn locate(&self, tool: Tool) -> Option<PathBuf> {
        if let Some(path) = self.executables.get(tool.name()) {
            return path.is_file().then(|| path.clone());
        }

        let system = std::env::var_os("PATH")
            .map(|paths| std::env::split_paths(&paths).collect::<Vec<_>>())
            .unwrap_or_default();

        self.search_path
            .iter()
            .chain(system.iter())
            .map(|dir| dir.join(tool.executable()))
            .find(|candidate| candidate.is_file())
    }
}

impl ProgramSuite for CommandSuite {
    fn create(&self, tool: Tool) -> PipelineResult<Box<dyn Program>> {
        let executable = self.locate(tool).ok_or_else(|| PipelineError::NotAvailable {
            role: tool.name().to_string(),
            attempted: vec![tool.executable().to_string()],
        })?;
        Ok(Box::new(CommandProgram::new(tool, executable)))
    }

    fn is_available(&self, tool: Tool) -> bool {
        self.locate(tool).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reported_values_are_parsed_from_key_lines() {
        let out = "Indexing\nd_max: 34.5\nunit_cell: 10,10,20,90,90,90\nRun time: 3s\n";
        let reported = parse_reported(out);
        assert_eq!(reported.get("d_max").map(String::as_str), Some("34.5"));
        assert!(reported.contains_key("unit_cell"));
        assert!(!reported.contains_key("Run time"));
    }

    #[test]
    fn job_is_first_argument() {
        let mut program = CommandProgram::new(Tool::XdsIdxref, PathBuf::from("xds_par"));
        program.set_input("spot_list", "SPOT.XDS".into());
        assert_eq!(program.arguments(), vec!["job=IDXREF", "spot_list=SPOT.XDS"]);
    }

    #[test]
    fn explicit_executable_must_exist() {
        let mut executables = BTreeMap::new();
        executables.insert(
            "aimless".to_string(),
            PathBuf::from("/nonexistent/diffred/aimless"),
        );
        let suite = CommandSuite::new(Vec::new(), executables);
        assert!(!suite.is_available(Tool::Aimless));
        assert!(suite.create(Tool::Aimless).is_err());
    }
}

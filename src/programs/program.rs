//! Narrow interfaces the stages use to drive external programs.

use super::Tool;
use crate::core::error::PipelineResult;
use std::path::{Path, PathBuf};

/// One configured invocation of an external program.
///
/// Inputs are plain `key=value` settings. `run` blocks until the program
/// exits and fails on a nonzero exit status or when a declared output was
/// not written.
pub trait Program {
    /// Tool this invocation runs.
    fn tool(&self) -> Tool;

    /// Directory the program runs in and writes its outputs to.
    fn set_working_directory(&mut self, directory: &Path);

    /// Set one input.
    fn set_input(&mut self, key: &str, value: String);

    /// Run to completion.
    fn run(&mut self) -> PipelineResult<()>;

    /// Path of a declared output after a successful run.
    fn output(&self, name: &str) -> Option<PathBuf>;

    /// Value the program reported on its output, e.g. `d_max`.
    fn reported(&self, key: &str) -> Option<String>;
}

/// Factory for program invocations.
pub trait ProgramSuite {
    /// Create a fresh invocation of `tool`.
    fn create(&self, tool: Tool) -> PipelineResult<Box<dyn Program>>;

    /// Check if `tool` can be run in this environment.
    fn is_available(&self, tool: Tool) -> bool;
}

/// Helpers shared by every caller of a [`Program`].
pub trait ProgramExt: Program {
    /// Set an input from a path.
    fn set_path(&mut self, key: &str, path: &Path) {
        self.set_input(key, path.display().to_string());
    }

    /// Reported value parsed as a float.
    fn reported_f64(&self, key: &str) -> Option<f64> {
        self.reported(key).and_then(|v| v.trim().parse().ok())
    }
}

impl<P: Program + ?Sized> ProgramExt for P {}

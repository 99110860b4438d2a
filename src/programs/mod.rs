//! External program interfaces.
//!
//! - [`tool`] - Catalog of external programs and their declared outputs
//! - [`program`] - [`Program`] and [`ProgramSuite`] contracts
//! - [`command`] - Child-process implementation
//! - [`summary`] - Bravais-settings summary parsing
//! - [`selection`] - Role implementation selection

pub mod command;
pub mod program;
pub mod selection;
pub mod summary;
pub mod tool;

pub use command::{CommandProgram, CommandSuite};
pub use program::{Program, ProgramExt, ProgramSuite};
pub use selection::{
    resolve, resolve_in, select, Implementation, IndexerKind, IntegraterKind, RefinerKind,
    Resolution, Role, ScalerKind,
};
pub use summary::{BravaisSetting, BravaisSummary};
pub use tool::Tool;

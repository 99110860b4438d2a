//! CLI command implementations.

mod config;
mod inspect;
mod run;
mod select;

pub use config::{run_config, ConfigArgs};
pub use inspect::{run_inspect, InspectArgs};
pub use run::{run_pipeline, RunArgs};
pub use select::{run_select, SelectArgs};

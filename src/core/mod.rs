//! Core infrastructure.
//!
//! - [`config`] - Configuration parsing and validation
//! - [`error`] - Pipeline error kinds

pub mod config;
pub mod error;

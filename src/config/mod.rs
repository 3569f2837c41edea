// src/config/mod.rs

//! Submission file loading and validation for jobflow.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a submission file from disk (`loader.rs`).
//! - Validate jobs before anything is scheduled (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path};
pub use model::{ConfigFile, JobConfig, RawConfigFile, SchedulerSection, TaskConfig};

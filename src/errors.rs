// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

use crate::types::{JobId, TaskId};

#[derive(Error, Debug)]
pub enum JobflowError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Cycle detected in task graph: {0}")]
    DagCycle(String),

    /// A transition was requested for a task that is not in the partition
    /// the transition starts from. Nothing was mutated.
    #[error("Contract violation on {task}: expected {expected}, found {actual}")]
    ContractViolation {
        task: TaskId,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Recovery error: {0}")]
    Recovery(String),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl JobflowError {
    /// Contract violations point at a bug in the caller, not at bad input.
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, JobflowError::ContractViolation { .. })
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, JobflowError>;

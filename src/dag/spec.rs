// src/dag/spec.rs

//! Job submission model: what a client hands to the scheduler.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::dag::graph::JobGraph;
use crate::dag::task_node::TaskNode;
use crate::errors::{JobflowError, Result};
use crate::types::{JobId, JobKind, JobPriority, TaskId};

/// One task of a submitted job, with dependencies given by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub name: String,
    pub cmd: String,
    #[serde(default)]
    pub after: Vec<String>,
    #[serde(default = "default_one")]
    pub resources: u32,
    #[serde(default)]
    pub precious: bool,
    #[serde(default = "default_one")]
    pub max_executions: u32,
}

fn default_one() -> u32 {
    1
}

impl TaskSpec {
    pub fn new(name: impl Into<String>, cmd: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cmd: cmd.into(),
            after: Vec::new(),
            resources: 1,
            precious: false,
            max_executions: 1,
        }
    }
}

/// A submitted job: its tasks in declaration order plus job-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    pub name: String,
    #[serde(default)]
    pub priority: JobPriority,
    #[serde(default)]
    pub kind: JobKind,
    /// End the job as canceled as soon as a task fails for good.
    #[serde(default)]
    pub cancel_on_error: bool,
    /// Hold a task that fails for good in the paused partition and mark the
    /// job in error, instead of letting the rest of the job go on.
    #[serde(default)]
    pub pause_on_error: bool,
    pub tasks: Vec<TaskSpec>,
}

impl JobSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            priority: JobPriority::default(),
            kind: JobKind::default(),
            cancel_on_error: false,
            pause_on_error: false,
            tasks: Vec::new(),
        }
    }

    /// Check the submission and resolve it into id-based nodes for `job`.
    ///
    /// Task ids follow declaration order. The submission is rejected as a
    /// whole if any task is malformed, a dependency name is unknown, or the
    /// graph has a cycle.
    pub fn resolve(&self, job: JobId) -> Result<Vec<TaskNode>> {
        if self.tasks.is_empty() {
            return Err(JobflowError::ConfigError(format!(
                "job '{}' must contain at least one task",
                self.name
            )));
        }
        if self.cancel_on_error && self.pause_on_error {
            return Err(JobflowError::ConfigError(format!(
                "job '{}' sets both cancel_on_error and pause_on_error",
                self.name
            )));
        }

        let mut index: HashMap<&str, TaskId> = HashMap::with_capacity(self.tasks.len());
        for (i, task) in self.tasks.iter().enumerate() {
            if task.resources == 0 {
                return Err(JobflowError::ConfigError(format!(
                    "task '{}.{}' must need at least one resource (got 0)",
                    self.name, task.name
                )));
            }
            if task.max_executions == 0 {
                return Err(JobflowError::ConfigError(format!(
                    "task '{}.{}' must allow at least one execution (got 0)",
                    self.name, task.name
                )));
            }
            if self.kind == JobKind::SingleTask && !task.after.is_empty() {
                return Err(JobflowError::ConfigError(format!(
                    "task '{}.{}' declares `after` but job '{}' is single_task",
                    self.name, task.name, self.name
                )));
            }
            if index.insert(task.name.as_str(), TaskId::new(job, i as u32)).is_some() {
                return Err(JobflowError::ConfigError(format!(
                    "job '{}' declares task '{}' more than once",
                    self.name, task.name
                )));
            }
        }

        JobGraph::from_spec(self).check(&self.name)?;

        let nodes = self
            .tasks
            .iter()
            .enumerate()
            .map(|(i, task)| {
                let deps = task.after.iter().map(|dep| index[dep.as_str()]);
                TaskNode::new(TaskId::new(job, i as u32), task.name.clone())
                    .with_cmd(task.cmd.clone())
                    .with_resources(task.resources)
                    .precious(task.precious)
                    .with_max_executions(task.max_executions)
                    .with_dependencies(deps)
            })
            .collect();

        Ok(nodes)
    }

    /// Names of precious tasks.
    pub fn precious_tasks(&self) -> impl Iterator<Item = &str> {
        self.tasks
            .iter()
            .filter(|t| t.precious)
            .map(|t| t.name.as_str())
    }
}

// src/dag/task_node.rs

//! Immutable per-task attributes handed to the graph builder.

use crate::types::TaskId;

/// Scheduling-relevant attributes of one task, with dependencies already
/// resolved to ids.
///
/// A `TaskNode` never changes after submission; everything that moves while
/// the job runs lives in the owning [`TaskDescriptor`](super::TaskDescriptor).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskNode {
    pub id: TaskId,
    pub name: String,
    /// Shell command the executor runs for this task.
    pub cmd: String,
    /// Number of worker slots the task occupies while running (>= 1).
    pub resources_needed: u32,
    /// Whether the user asked for this task's result explicitly.
    pub precious: bool,
    /// How many times the task may be executed before a failure is final.
    pub max_executions: u32,
    /// Direct parents, in declaration order.
    pub dependencies: Vec<TaskId>,
}

impl TaskNode {
    pub fn new(id: TaskId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            cmd: String::new(),
            resources_needed: 1,
            precious: false,
            max_executions: 1,
            dependencies: Vec::new(),
        }
    }

    pub fn with_dependencies(mut self, deps: impl IntoIterator<Item = TaskId>) -> Self {
        self.dependencies = deps.into_iter().collect();
        self
    }

    pub fn with_resources(mut self, resources: u32) -> Self {
        self.resources_needed = resources.max(1);
        self
    }

    pub fn with_cmd(mut self, cmd: impl Into<String>) -> Self {
        self.cmd = cmd.into();
        self
    }

    pub fn precious(mut self, precious: bool) -> Self {
        self.precious = precious;
        self
    }

    pub fn with_max_executions(mut self, max: u32) -> Self {
        self.max_executions = max.max(1);
        self
    }
}

// src/types.rs

//! Identifiers and enumerations shared by the engine, config and executor.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Identifier of a submitted job.
///
/// Assigned by the core in submission order, so comparing two ids also
/// compares their submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// Identifier of a task, scoped within its job.
///
/// `index` is the task's position in the job's declaration order and doubles
/// as the index into the job's descriptor arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId {
    pub job: JobId,
    pub index: u32,
}

impl TaskId {
    pub fn new(job: JobId, index: u32) -> Self {
        Self { job, index }
    }

    pub(crate) fn slot(&self) -> usize {
        self.index as usize
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/task-{}", self.job, self.index)
    }
}

/// Priority of a job. Higher priorities are dispatched first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    Idle,
    Lowest,
    Low,
    #[default]
    Normal,
    High,
    Highest,
}

impl FromStr for JobPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "idle" => Ok(JobPriority::Idle),
            "lowest" => Ok(JobPriority::Lowest),
            "low" => Ok(JobPriority::Low),
            "normal" => Ok(JobPriority::Normal),
            "high" => Ok(JobPriority::High),
            "highest" => Ok(JobPriority::Highest),
            other => Err(format!(
                "invalid job priority: {other} (expected idle, lowest, low, normal, high or highest)"
            )),
        }
    }
}

/// Shape of a job.
///
/// - `TaskFlow`: tasks form a dependency DAG through `after = [...]`.
/// - `SingleTask`: independent tasks; every task is eligible immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    #[default]
    TaskFlow,
    SingleTask,
}

/// Coarse job lifecycle as seen by clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Paused,
    /// At least one task failed for good and waits for a restart or a
    /// manual finish.
    InError,
    Finished,
    Canceled,
    Killed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Finished | JobStatus::Canceled | JobStatus::Killed
        )
    }
}

/// Per-task status as tracked by the job (and persisted for recovery).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Declared, never offered to a worker yet.
    Submitted,
    /// Was paused and has been released again.
    Pending,
    Paused,
    Running,
    /// Failed with executions left; waiting to be started again.
    WaitingOnError,
    Finished,
    /// Terminated with an exception and no executions left.
    Faulty,
    /// Failed with no executions left in a `pause_on_error` job; held in the
    /// paused partition until restarted or finished.
    InError,
    /// Killed on its own while the rest of the job went on.
    Killed,
    /// Abandoned because its job was canceled or killed.
    Aborted,
}

impl TaskStatus {
    /// Whether this status records a completed `terminate` for the task.
    pub fn is_terminated(self) -> bool {
        matches!(
            self,
            TaskStatus::Finished | TaskStatus::Faulty | TaskStatus::Killed
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Submitted => "submitted",
            TaskStatus::Pending => "pending",
            TaskStatus::Paused => "paused",
            TaskStatus::Running => "running",
            TaskStatus::WaitingOnError => "waiting_on_error",
            TaskStatus::Finished => "finished",
            TaskStatus::Faulty => "faulty",
            TaskStatus::InError => "in_error",
            TaskStatus::Killed => "killed",
            TaskStatus::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

// src/engine/mod.rs

//! Scheduling loop for jobflow.
//!
//! This module ties together:
//! - the table of active jobs and their descriptors
//! - the ready queue (which jobs have eligible work, in priority order)
//! - the dispatch pass that hands eligible tasks to free worker slots
//! - the runtime event loop that reacts to:
//!   - job submissions
//!   - task completions and lost workers
//!   - pause / resume / kill / priority requests
//!   - per-task kill, restart and finish requests
//!   - shutdown signals
//!
//! Every event goes through one channel and is applied by one consumer, so
//! descriptors are never mutated concurrently. The pure state machine lives
//! in [`core`]; the async/IO shell is implemented in [`runtime`].

use crate::dag::JobSpec;
use crate::result::TaskResult;
use crate::types::{JobId, JobPriority, TaskId};

/// Runtime options used by both the core and the async shell.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeOptions {
    /// If true, exit the runtime once no job is active (used for batch
    /// runs of a submission file).
    pub exit_when_idle: bool,
}

/// Events flowing into the runtime from clients, executors, etc.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// A new job, already authenticated and parsed.
    JobSubmitted { spec: JobSpec },
    /// A worker finished a task and returned its result.
    TaskCompleted { task: TaskId, result: TaskResult },
    /// The worker running a task went away; run the task again.
    TaskLost { task: TaskId },
    PauseJob { job: JobId },
    ResumeJob { job: JobId },
    KillJob { job: JobId },
    /// Terminate one task; the rest of the job goes on.
    KillTask { task: TaskId },
    /// Run a task held in error again with a fresh execution budget.
    RestartInErrorTask { task: TaskId },
    /// Give up on a task held in error and release its children.
    FinishInErrorTask { task: TaskId },
    ChangePriority { job: JobId, priority: JobPriority },
    /// Graceful shutdown requested (e.g. Ctrl-C).
    ShutdownRequested,
}

pub mod core;
pub mod dispatch;
pub mod event_handlers;
pub mod jobs;
pub mod queue;
pub mod runtime;

pub use core::CoreRuntime;
pub use dispatch::{AcceptAll, Dispatcher, ScheduledTask, SelectionFilter};
pub use event_handlers::{CoreCommand, CoreStep};
pub use jobs::{ActiveJob, JobSummary, JobTable};
pub use queue::ReadyQueue;
pub use runtime::Runtime;

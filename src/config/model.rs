// src/config/model.rs

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::dag::{JobSpec, TaskSpec};
use crate::types::{JobKind, JobPriority};

/// Top-level submission file as read from TOML, before validation.
///
/// ```toml
/// [scheduler]
/// resources = 4
/// event_queue_length = 64
///
/// [job.build]
/// priority = "high"
/// cancel_on_error = true
///
/// [job.build.task.compile]
/// cmd = "make"
///
/// [job.build.task.test]
/// cmd = "make test"
/// after = ["compile"]
/// precious = true
/// ```
///
/// All sections except the jobs themselves are optional.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    /// Scheduler settings from `[scheduler]`.
    #[serde(default)]
    pub scheduler: SchedulerSection,

    /// All jobs from `[job.<name>]`, keyed by job name.
    #[serde(default)]
    pub job: BTreeMap<String, JobConfig>,
}

/// `[scheduler]` section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct SchedulerSection {
    /// Worker slots shared by every job.
    #[serde(default = "default_resources")]
    pub resources: u32,

    /// Capacity of the runtime event channel.
    #[serde(default = "default_event_queue_length")]
    pub event_queue_length: usize,
}

fn default_resources() -> u32 {
    4
}

fn default_event_queue_length() -> usize {
    64
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            resources: default_resources(),
            event_queue_length: default_event_queue_length(),
        }
    }
}

/// `[job.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct JobConfig {
    #[serde(default)]
    pub priority: JobPriority,

    /// `"task_flow"` (default) or `"single_task"`.
    #[serde(default)]
    pub kind: JobKind,

    /// End the job as canceled when a task fails with no executions left.
    #[serde(default)]
    pub cancel_on_error: bool,

    /// Hold a task that fails for good for a restart or a manual finish.
    #[serde(default)]
    pub pause_on_error: bool,

    /// Tasks from `[job.<name>.task.<task>]`, keyed by task name.
    #[serde(default)]
    pub task: BTreeMap<String, TaskConfig>,
}

/// `[job.<name>.task.<task>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskConfig {
    /// The command to execute.
    pub cmd: String,

    /// Dependency list: this task waits for all tasks listed here.
    #[serde(default)]
    pub after: Vec<String>,

    /// Worker slots the task occupies while running.
    #[serde(default = "default_one")]
    pub resources: u32,

    /// Whether the job's result must contain this task's value.
    #[serde(default)]
    pub precious: bool,

    /// How many times the task may run before a failure is final.
    #[serde(default = "default_one")]
    pub max_executions: u32,
}

fn default_one() -> u32 {
    1
}

impl JobConfig {
    /// Convert to a submission. Tasks are declared in name order.
    pub fn to_spec(&self, name: &str) -> JobSpec {
        let mut spec = JobSpec::new(name);
        spec.priority = self.priority;
        spec.kind = self.kind;
        spec.cancel_on_error = self.cancel_on_error;
        spec.pause_on_error = self.pause_on_error;
        spec.tasks = self
            .task
            .iter()
            .map(|(task_name, task)| TaskSpec {
                name: task_name.clone(),
                cmd: task.cmd.clone(),
                after: task.after.clone(),
                resources: task.resources,
                precious: task.precious,
                max_executions: task.max_executions,
            })
            .collect();
        spec
    }
}

/// A validated submission file.
///
/// Only produced through `TryFrom<RawConfigFile>`, so every job in here
/// resolves cleanly and fits on the scheduler.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    scheduler: SchedulerSection,
    jobs: Vec<JobSpec>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(scheduler: SchedulerSection, jobs: Vec<JobSpec>) -> Self {
        Self { scheduler, jobs }
    }

    pub fn scheduler(&self) -> &SchedulerSection {
        &self.scheduler
    }

    /// Jobs in name order.
    pub fn jobs(&self) -> &[JobSpec] {
        &self.jobs
    }

    pub fn into_jobs(self) -> Vec<JobSpec> {
        self.jobs
    }
}

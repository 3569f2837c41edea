// src/result.rs

//! Per-task results and their job-level aggregate.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{debug, warn};

use crate::types::{JobId, JobStatus, TaskId};

/// Message stored for tasks that never reported a result.
pub const NO_RESULT_RETURNED: &str = "no result returned";

/// Message stored for a task killed on its own.
pub const TASK_KILLED: &str = "task killed";

/// Outcome of one task execution as reported by a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskResult {
    pub task: TaskId,
    /// Value produced by the task (captured stdout for shell tasks).
    pub value: Option<String>,
    /// Unhandled error raised by the task, if any.
    pub exception: Option<String>,
    /// Whether the value is still being awaited.
    pub pending: bool,
}

impl TaskResult {
    pub fn success(task: TaskId, value: impl Into<String>) -> Self {
        Self {
            task,
            value: Some(value.into()),
            exception: None,
            pending: false,
        }
    }

    pub fn failure(task: TaskId, exception: impl Into<String>) -> Self {
        Self {
            task,
            value: None,
            exception: Some(exception.into()),
            pending: false,
        }
    }

    pub fn pending(task: TaskId) -> Self {
        Self {
            task,
            value: None,
            exception: None,
            pending: true,
        }
    }

    /// Synthetic entry for a task that was expected but never reported.
    pub fn no_result_returned(task: TaskId) -> Self {
        Self::failure(task, NO_RESULT_RETURNED)
    }

    pub fn had_exception(&self) -> bool {
        self.exception.is_some()
    }
}

/// Job-level result aggregate.
///
/// Keeps every task's latest result, plus the subsets for precious tasks and
/// for tasks that reported a settled exception. Entries are overwritten but
/// never dropped. A result is marked released once no task downstream still
/// waits on it.
#[derive(Debug, Clone, Serialize)]
pub struct JobResult {
    job_id: JobId,
    job_name: String,
    all_results: BTreeMap<String, TaskResult>,
    precious_results: BTreeMap<String, TaskResult>,
    exception_results: BTreeMap<String, TaskResult>,
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    released: BTreeSet<String>,
    #[serde(skip)]
    expected_precious: BTreeSet<String>,
    final_status: Option<JobStatus>,
}

impl JobResult {
    /// `expected_precious` lists the tasks the job cannot be complete
    /// without.
    pub fn new(
        job_id: JobId,
        job_name: impl Into<String>,
        expected_precious: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            job_id,
            job_name: job_name.into(),
            all_results: BTreeMap::new(),
            precious_results: BTreeMap::new(),
            exception_results: BTreeMap::new(),
            released: BTreeSet::new(),
            expected_precious: expected_precious.into_iter().collect(),
            final_status: None,
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    /// Record a task's result; a later result for the same task replaces the
    /// earlier one in every map it belongs to.
    pub fn add_task_result(&mut self, task_name: &str, result: TaskResult, is_precious: bool) {
        let name = task_name.to_string();

        if !result.pending && result.had_exception() {
            self.exception_results.insert(name.clone(), result.clone());
        }
        if is_precious {
            self.precious_results.insert(name.clone(), result.clone());
        }

        debug!(
            job = %self.job_id,
            task = %result.task,
            precious = is_precious,
            exception = result.had_exception(),
            "task result recorded"
        );
        self.all_results.insert(name, result);
    }

    pub fn all_results(&self) -> &BTreeMap<String, TaskResult> {
        &self.all_results
    }

    pub fn precious_results(&self) -> &BTreeMap<String, TaskResult> {
        &self.precious_results
    }

    pub fn exception_results(&self) -> &BTreeMap<String, TaskResult> {
        &self.exception_results
    }

    pub fn result(&self, task_name: &str) -> Option<&TaskResult> {
        self.all_results.get(task_name)
    }

    pub fn had_exception(&self) -> bool {
        !self.exception_results.is_empty()
    }

    /// Mark a task's result as no longer needed downstream. Returns `false`
    /// if it was released already.
    pub fn release(&mut self, task_name: &str) -> bool {
        self.released.insert(task_name.to_string())
    }

    pub fn is_released(&self, task_name: &str) -> bool {
        self.released.contains(task_name)
    }

    pub fn released_results(&self) -> impl Iterator<Item = &str> {
        self.released.iter().map(String::as_str)
    }

    /// Synthesize a "no result returned" failure for every declared task
    /// that has no result yet. Returns how many entries were added.
    pub fn reconcile_missing<'a>(
        &mut self,
        declared: impl IntoIterator<Item = (&'a str, TaskId, bool)>,
    ) -> usize {
        let mut added = 0;
        for (name, id, precious) in declared {
            if self.all_results.contains_key(name) {
                continue;
            }
            self.add_task_result(name, TaskResult::no_result_returned(id), precious);
            added += 1;
        }
        if added > 0 {
            warn!(
                job = %self.job_id,
                missing = added,
                "synthesized results for tasks that never reported"
            );
        }
        added
    }

    pub fn mark_terminal(&mut self, status: JobStatus) {
        self.final_status = Some(status);
    }

    pub fn final_status(&self) -> Option<JobStatus> {
        self.final_status
    }

    /// Every precious task has a result.
    pub fn precious_collected(&self) -> bool {
        self.expected_precious
            .iter()
            .all(|name| self.all_results.contains_key(name))
    }

    /// Nothing more to wait for: precious results are in and the job has
    /// reached a terminal status.
    pub fn is_complete(&self) -> bool {
        self.precious_collected()
            && self.final_status.is_some_and(JobStatus::is_terminal)
    }
}

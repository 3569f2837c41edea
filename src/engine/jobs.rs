// src/engine/jobs.rs

//! Bookkeeping for submitted jobs: descriptors, task statuses, retry budget
//! and results while a job is active, summaries once it has ended.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use tracing::debug;

use crate::dag::{JobDescriptor, JobSpec};
use crate::errors::{JobflowError, Result};
use crate::result::JobResult;
use crate::types::{JobId, JobStatus, TaskId, TaskStatus};

/// Everything the core tracks about a job that has not ended yet.
#[derive(Debug)]
pub struct ActiveJob {
    pub spec: JobSpec,
    pub descriptor: JobDescriptor,
    pub status: JobStatus,
    pub result: JobResult,
    task_status: Vec<TaskStatus>,
    /// Executions consumed per task slot.
    executions: Vec<u32>,
}

impl ActiveJob {
    /// Resolve and build a freshly submitted job.
    pub fn new(id: JobId, spec: JobSpec) -> Result<Self> {
        let nodes = spec.resolve(id)?;
        let descriptor = JobDescriptor::build(id, spec.priority, spec.kind, nodes)?;
        Ok(Self::from_descriptor(spec, descriptor))
    }

    /// Wrap an already built descriptor (used by recovery).
    pub fn from_descriptor(spec: JobSpec, descriptor: JobDescriptor) -> Self {
        let count = descriptor.total_task_count();
        let result = JobResult::new(
            descriptor.id(),
            spec.name.clone(),
            spec.precious_tasks().map(String::from),
        );
        Self {
            spec,
            descriptor,
            status: JobStatus::Pending,
            result,
            task_status: vec![TaskStatus::Submitted; count],
            executions: vec![0; count],
        }
    }

    pub fn id(&self) -> JobId {
        self.descriptor.id()
    }

    pub fn task_status(&self, task: TaskId) -> Option<TaskStatus> {
        self.task_status.get(task.slot()).copied()
    }

    pub fn set_task_status(&mut self, task: TaskId, status: TaskStatus) {
        if let Some(slot) = self.task_status.get_mut(task.slot()) {
            *slot = status;
        }
    }

    /// Task ids with their current status, in id order.
    pub fn task_statuses(&self) -> impl Iterator<Item = (TaskId, TaskStatus)> + '_ {
        let job = self.id();
        self.task_status
            .iter()
            .enumerate()
            .map(move |(slot, status)| (TaskId::new(job, slot as u32), *status))
    }

    pub fn executions_used(&self, task: TaskId) -> u32 {
        self.executions.get(task.slot()).copied().unwrap_or(0)
    }

    pub fn set_executions_used(&mut self, task: TaskId, used: u32) {
        if let Some(slot) = self.executions.get_mut(task.slot()) {
            *slot = used;
        }
    }

    /// Count one finished execution of `task`; returns the new total.
    pub fn consume_execution(&mut self, task: TaskId) -> u32 {
        match self.executions.get_mut(task.slot()) {
            Some(used) => {
                *used += 1;
                *used
            }
            None => 0,
        }
    }

    /// Pause every task that has not started: eligible ones leave the
    /// eligible partition, blocked ones are marked so they stay paused once
    /// promoted. Running and in-error tasks are left alone. Returns how many
    /// tasks left the eligible partition.
    pub fn pause_pending_tasks(&mut self) -> usize {
        let changes: HashMap<TaskId, TaskStatus> = self
            .task_statuses()
            .filter(|(_, status)| {
                matches!(
                    status,
                    TaskStatus::Submitted | TaskStatus::Pending | TaskStatus::WaitingOnError
                )
            })
            .map(|(task, _)| (task, TaskStatus::Paused))
            .collect();

        let moved = self.descriptor.apply_task_state_changes(&changes);
        for task in changes.keys() {
            self.set_task_status(*task, TaskStatus::Paused);
        }
        moved
    }

    pub fn has_tasks_in_error(&self) -> bool {
        self.task_status.contains(&TaskStatus::InError)
    }

    /// Mark every task that did not terminate as aborted.
    pub fn abort_unfinished(&mut self) {
        for status in self.task_status.iter_mut() {
            if !status.is_terminated() {
                *status = TaskStatus::Aborted;
            }
        }
    }

    /// Close the job: reconcile missing results and record the final status.
    pub fn into_summary(mut self, status: JobStatus) -> JobSummary {
        let declared: Vec<(String, TaskId, bool)> = self
            .descriptor
            .tasks()
            .map(|t| (t.name().to_string(), t.id(), t.node().precious))
            .collect();
        self.result
            .reconcile_missing(declared.iter().map(|(name, id, precious)| (name.as_str(), *id, *precious)));
        self.result.mark_terminal(status);

        let tasks = self
            .descriptor
            .tasks()
            .map(|t| (t.name().to_string(), self.task_status[t.id().slot()]))
            .collect();

        JobSummary {
            id: self.id(),
            name: self.spec.name,
            status,
            tasks,
            result: self.result,
        }
    }
}

/// Final record of a job that reached a terminal status.
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub id: JobId,
    pub name: String,
    pub status: JobStatus,
    pub tasks: BTreeMap<String, TaskStatus>,
    pub result: JobResult,
}

/// Active jobs by id plus the summaries of the ones that ended.
#[derive(Debug, Default)]
pub struct JobTable {
    active: BTreeMap<JobId, ActiveJob>,
    finished: BTreeMap<JobId, JobSummary>,
    next_id: u64,
}

impl JobTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign the next id to `spec` and build it. A rejected submission does
    /// not consume an id.
    pub fn submit(&mut self, spec: JobSpec) -> Result<JobId> {
        let id = JobId(self.next_id);
        let job = ActiveJob::new(id, spec)?;
        self.next_id += 1;
        debug!(job = %id, tasks = job.descriptor.total_task_count(), "job registered");
        self.active.insert(id, job);
        Ok(id)
    }

    /// Re-insert a recovered job under its persisted id.
    pub fn insert_recovered(&mut self, job: ActiveJob) -> Result<()> {
        let id = job.id();
        if self.active.contains_key(&id) || self.finished.contains_key(&id) {
            return Err(JobflowError::Recovery(format!("job id {id} is already in use")));
        }
        self.next_id = self.next_id.max(id.0 + 1);
        self.active.insert(id, job);
        Ok(())
    }

    pub fn get(&self, id: JobId) -> Option<&ActiveJob> {
        self.active.get(&id)
    }

    pub fn get_mut(&mut self, id: JobId) -> Option<&mut ActiveJob> {
        self.active.get_mut(&id)
    }

    pub fn remove(&mut self, id: JobId) -> Option<ActiveJob> {
        self.active.remove(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ActiveJob> {
        self.active.values()
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    pub fn record_finished(&mut self, summary: JobSummary) {
        self.finished.insert(summary.id, summary);
    }

    pub fn finished(&self, id: JobId) -> Option<&JobSummary> {
        self.finished.get(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::TaskSpec;
    use crate::result::{TaskResult, NO_RESULT_RETURNED};

    fn two_step() -> JobSpec {
        let mut spec = JobSpec::new("pipeline");
        let mut fetch = TaskSpec::new("fetch", "true");
        fetch.precious = true;
        let mut report = TaskSpec::new("report", "true");
        report.after = vec!["fetch".into()];
        report.precious = true;
        spec.tasks = vec![fetch, report];
        spec
    }

    #[test]
    fn ids_are_assigned_in_submission_order() {
        let mut table = JobTable::new();
        let a = table.submit(two_step()).unwrap();
        let b = table.submit(two_step()).unwrap();
        assert!(a < b);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn rejected_submissions_keep_the_id_free() {
        let mut table = JobTable::new();
        assert!(table.submit(JobSpec::new("empty")).is_err());
        assert_eq!(table.submit(two_step()).unwrap(), JobId(0));
    }

    #[test]
    fn summary_aborts_and_reconciles_unfinished_tasks() {
        let mut table = JobTable::new();
        let id = table.submit(two_step()).unwrap();
        let mut job = table.remove(id).unwrap();

        let fetch = TaskId::new(id, 0);
        job.descriptor.start(fetch).unwrap();
        job.descriptor.terminate(fetch).unwrap();
        job.set_task_status(fetch, TaskStatus::Finished);
        job.result
            .add_task_result("fetch", TaskResult::success(fetch, "data"), true);

        job.descriptor.teardown();
        job.abort_unfinished();
        let summary = job.into_summary(JobStatus::Killed);

        assert_eq!(summary.tasks["fetch"], TaskStatus::Finished);
        assert_eq!(summary.tasks["report"], TaskStatus::Aborted);
        assert_eq!(
            summary.result.result("report").and_then(|r| r.exception.as_deref()),
            Some(NO_RESULT_RETURNED)
        );
        assert!(summary.result.is_complete());
    }

    #[test]
    fn pausing_pending_tasks_spares_running_and_in_error_ones() {
        let mut spec = two_step();
        spec.tasks.push(TaskSpec::new("lint", "true"));
        spec.tasks.push(TaskSpec::new("audit", "true"));
        let mut table = JobTable::new();
        let id = table.submit(spec).unwrap();
        let job = table.get_mut(id).unwrap();

        let (fetch, lint, audit) = (TaskId::new(id, 0), TaskId::new(id, 2), TaskId::new(id, 3));
        job.descriptor.start(fetch).unwrap();
        job.set_task_status(fetch, TaskStatus::Running);
        job.descriptor.start(audit).unwrap();
        job.descriptor.pause_on_error(audit).unwrap();
        job.set_task_status(audit, TaskStatus::InError);

        assert_eq!(job.pause_pending_tasks(), 1);
        assert_eq!(job.task_status(fetch), Some(TaskStatus::Running));
        assert_eq!(job.task_status(TaskId::new(id, 1)), Some(TaskStatus::Paused));
        assert_eq!(job.task_status(lint), Some(TaskStatus::Paused));
        assert_eq!(job.task_status(audit), Some(TaskStatus::InError));
        assert!(job.has_tasks_in_error());
        assert!(!job.descriptor.has_eligible());
    }

    #[test]
    fn recovered_ids_advance_the_counter() {
        let mut table = JobTable::new();
        let spec = two_step();
        let nodes = spec.resolve(JobId(7)).unwrap();
        let descriptor =
            JobDescriptor::build(JobId(7), spec.priority, spec.kind, nodes).unwrap();
        table
            .insert_recovered(ActiveJob::from_descriptor(spec, descriptor))
            .unwrap();

        assert_eq!(table.submit(two_step()).unwrap(), JobId(8));
    }
}

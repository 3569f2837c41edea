// src/engine/core.rs

//! Pure core runtime state machine.
//!
//! This module contains a synchronous, deterministic "core runtime" that
//! consumes [`RuntimeEvent`]s and produces:
//! - an updated core state
//! - a list of "commands" describing what the IO shell should do next
//!
//! The async/IO-heavy shell (`engine::runtime::Runtime`) is responsible for:
//! - reading events from channels
//! - sending `ScheduledTask`s to the executor and cancelling tasks
//! - handling Ctrl+C / shutdown
//!
//! The core is intended to be extensively unit tested without any Tokio,
//! channels, filesystem, or processes.

use tracing::{error, info, warn};

use crate::dag::{rebuild_from_persisted_tasks, JobSpec, PersistedJob, RecoverySource};
use crate::engine::dispatch::{Dispatcher, SelectionFilter};
use crate::engine::event_handlers::{
    end_job, handle_change_priority, handle_finish_in_error_task, handle_job_submitted,
    handle_kill_job, handle_kill_task, handle_pause_job, handle_restart_in_error_task,
    handle_resume_job, handle_task_completed, handle_task_lost, CoreCommand, CoreStep,
};
use crate::engine::jobs::{ActiveJob, JobSummary, JobTable};
use crate::engine::queue::ReadyQueue;
use crate::engine::{RuntimeEvent, RuntimeOptions};
use crate::errors::Result;
use crate::result::JobResult;
use crate::types::{JobId, JobStatus, TaskId, TaskStatus};

/// Pure core runtime state.
///
/// This owns:
/// - the table of active and finished jobs
/// - the ready queue
/// - the dispatcher and its worker slots
/// - commands produced outside an event (recovery) and not yet handed out
/// - runtime options (e.g. `exit_when_idle`)
///
/// It has **no** channels, no Tokio types, and does not perform any IO.
#[derive(Debug)]
pub struct CoreRuntime {
    jobs: JobTable,
    ready: ReadyQueue,
    dispatcher: Dispatcher,
    pending: Vec<CoreCommand>,
    options: RuntimeOptions,
}

impl CoreRuntime {
    pub fn new(resources: u32, options: RuntimeOptions) -> Self {
        Self::with_dispatcher(Dispatcher::new(resources), options)
    }

    pub fn with_filter(
        resources: u32,
        filter: Box<dyn SelectionFilter>,
        options: RuntimeOptions,
    ) -> Self {
        Self::with_dispatcher(Dispatcher::with_filter(resources, filter), options)
    }

    fn with_dispatcher(dispatcher: Dispatcher, options: RuntimeOptions) -> Self {
        Self {
            jobs: JobTable::new(),
            ready: ReadyQueue::new(),
            dispatcher,
            pending: Vec::new(),
            options,
        }
    }

    /// Register a job before the event loop starts. Unlike
    /// `RuntimeEvent::JobSubmitted`, a rejected submission is returned to the
    /// caller.
    pub fn submit(&mut self, spec: JobSpec) -> Result<JobId> {
        let id = self.jobs.submit(spec)?;
        if let Some(job) = self.jobs.get(id) {
            self.ready.refresh(&job.descriptor);
        }
        Ok(id)
    }

    /// Reinstall the active jobs of a previous run.
    ///
    /// Tasks that were running are put back in the eligible set since their
    /// workers did not survive. A job whose tasks had all terminated is
    /// ended right away; its summary comes out of the next `kickoff` or
    /// `step`. A job that cannot be rebuilt is logged and skipped. Returns
    /// how many jobs were recovered.
    pub fn recover(&mut self, source: &dyn RecoverySource) -> Result<usize> {
        let mut recovered = 0;
        for persisted in source.load_active_jobs()? {
            let id = persisted.id;
            if persisted.status.is_terminal() {
                warn!(job = %id, status = ?persisted.status, "skipping terminal job during recovery");
                continue;
            }
            match self.recover_job(persisted) {
                Ok(()) => recovered += 1,
                Err(err) => error!(job = %id, error = %err, "failed to recover job"),
            }
        }
        info!(recovered, "recovery finished");
        Ok(recovered)
    }

    fn recover_job(&mut self, persisted: PersistedJob) -> Result<()> {
        let PersistedJob {
            id,
            spec,
            status,
            statuses,
            results,
            executions,
        } = persisted;

        let mut descriptor = rebuild_from_persisted_tasks(id, &spec, &statuses)?;
        let running: Vec<TaskId> = descriptor.running_ids().iter().copied().collect();
        for task in &running {
            descriptor.restart(*task)?;
            if status == JobStatus::Paused {
                descriptor.pause(*task)?;
            }
        }

        let mut job = ActiveJob::from_descriptor(spec, descriptor);
        job.status = status;

        let tasks: Vec<(TaskId, String, bool)> = job
            .descriptor
            .tasks()
            .map(|t| (t.id(), t.name().to_string(), t.node().precious))
            .collect();
        for (task, name, precious) in tasks {
            let mut task_status = statuses.get(&name).copied().unwrap_or(TaskStatus::Submitted);
            if task_status == TaskStatus::Running {
                task_status = if status == JobStatus::Paused {
                    TaskStatus::Paused
                } else {
                    TaskStatus::Pending
                };
            }
            job.set_task_status(task, task_status);
            job.set_executions_used(task, executions.get(&name).copied().unwrap_or(0));
            if let Some(result) = results.get(&name) {
                job.result.add_task_result(&name, result.clone(), precious);
            }
        }
        if status == JobStatus::Paused {
            job.pause_pending_tasks();
        }

        let complete = job.descriptor.is_complete();
        let faulty = job
            .task_statuses()
            .any(|(_, status)| status == TaskStatus::Faulty);
        let cancel = job.spec.cancel_on_error && faulty;

        self.jobs.insert_recovered(job)?;
        info!(job = %id, restarted = running.len(), "job recovered");

        if complete {
            let status = if cancel {
                JobStatus::Canceled
            } else {
                JobStatus::Finished
            };
            let commands = end_job(&mut self.jobs, &mut self.ready, &mut self.dispatcher, id, status);
            self.pending.extend(commands);
        } else if let Some(job) = self.jobs.get(id) {
            self.ready.refresh(&job.descriptor);
        }
        Ok(())
    }

    /// Dispatch whatever can run before the first event arrives.
    pub fn kickoff(&mut self) -> CoreStep {
        self.finish_step(Vec::new())
    }

    /// Handle a single runtime event, updating core state and returning the
    /// resulting commands for the IO shell.
    pub fn step(&mut self, event: RuntimeEvent) -> CoreStep {
        let handled = match event {
            RuntimeEvent::JobSubmitted { spec } => {
                handle_job_submitted(&mut self.jobs, &mut self.ready, spec)
            }
            RuntimeEvent::TaskCompleted { task, result } => handle_task_completed(
                &mut self.jobs,
                &mut self.ready,
                &mut self.dispatcher,
                task,
                result,
            ),
            RuntimeEvent::TaskLost { task } => {
                handle_task_lost(&mut self.jobs, &mut self.ready, &mut self.dispatcher, task)
            }
            RuntimeEvent::PauseJob { job } => {
                handle_pause_job(&mut self.jobs, &mut self.ready, job)
            }
            RuntimeEvent::ResumeJob { job } => {
                handle_resume_job(&mut self.jobs, &mut self.ready, job)
            }
            RuntimeEvent::KillJob { job } => {
                handle_kill_job(&mut self.jobs, &mut self.ready, &mut self.dispatcher, job)
            }
            RuntimeEvent::KillTask { task } => {
                handle_kill_task(&mut self.jobs, &mut self.ready, &mut self.dispatcher, task)
            }
            RuntimeEvent::RestartInErrorTask { task } => {
                handle_restart_in_error_task(&mut self.jobs, &mut self.ready, task)
            }
            RuntimeEvent::FinishInErrorTask { task } => handle_finish_in_error_task(
                &mut self.jobs,
                &mut self.ready,
                &mut self.dispatcher,
                task,
            ),
            RuntimeEvent::ChangePriority { job, priority } => {
                handle_change_priority(&mut self.jobs, &mut self.ready, job, priority)
            }
            RuntimeEvent::ShutdownRequested => {
                return CoreStep {
                    commands: std::mem::take(&mut self.pending),
                    keep_running: false,
                };
            }
        };

        let commands = match handled {
            Ok(commands) => commands,
            Err(err) if err.is_contract_violation() => {
                error!(error = %err, "contract violation; event aborted");
                Vec::new()
            }
            Err(err) => {
                warn!(error = %err, "event rejected");
                Vec::new()
            }
        };

        self.finish_step(commands)
    }

    /// Run the dispatch pass and the idle check after an event.
    fn finish_step(&mut self, handled: Vec<CoreCommand>) -> CoreStep {
        let mut commands = std::mem::take(&mut self.pending);
        commands.extend(handled);
        match self.dispatcher.dispatch(&mut self.jobs, &mut self.ready) {
            Ok(tasks) if !tasks.is_empty() => commands.push(CoreCommand::DispatchTasks(tasks)),
            Ok(_) => {}
            Err(err) => error!(error = %err, "dispatch pass aborted"),
        }

        let mut keep_running = true;
        if self.options.exit_when_idle && self.jobs.is_empty() {
            keep_running = false;
            commands.push(CoreCommand::RequestExit);
        }

        CoreStep {
            commands,
            keep_running,
        }
    }

    /// Result of a job, active or finished.
    pub fn job_result(&self, id: JobId) -> Option<&JobResult> {
        self.jobs
            .get(id)
            .map(|job| &job.result)
            .or_else(|| self.jobs.finished(id).map(|summary| &summary.result))
    }

    pub fn job_status(&self, id: JobId) -> Option<JobStatus> {
        self.jobs
            .get(id)
            .map(|job| job.status)
            .or_else(|| self.jobs.finished(id).map(|summary| summary.status))
    }

    /// Status of one task while its job is active.
    pub fn task_status(&self, task: TaskId) -> Option<TaskStatus> {
        self.jobs.get(task.job).and_then(|job| job.task_status(task))
    }

    pub fn active_job(&self, id: JobId) -> Option<&ActiveJob> {
        self.jobs.get(id)
    }

    pub fn finished_job(&self, id: JobId) -> Option<&JobSummary> {
        self.jobs.finished(id)
    }

    pub fn active_job_count(&self) -> usize {
        self.jobs.len()
    }

    pub fn free_resources(&self) -> u32 {
        self.dispatcher.free()
    }

    /// Expose the ready queue (for tests).
    pub fn ready_queue(&self) -> &ReadyQueue {
        &self.ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::TaskSpec;
    use crate::engine::ScheduledTask;
    use crate::result::TaskResult;

    fn core(resources: u32) -> CoreRuntime {
        CoreRuntime::new(resources, RuntimeOptions { exit_when_idle: true })
    }

    fn chain() -> JobSpec {
        let mut spec = JobSpec::new("chain");
        let a = TaskSpec::new("a", "true");
        let mut b = TaskSpec::new("b", "true");
        b.after = vec!["a".into()];
        spec.tasks = vec![a, b];
        spec
    }

    fn dispatched(step: &CoreStep) -> Vec<ScheduledTask> {
        step.commands
            .iter()
            .filter_map(|c| match c {
                CoreCommand::DispatchTasks(tasks) => Some(tasks.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    #[test]
    fn chain_runs_to_completion_and_exits() {
        let mut core = core(2);
        let id = core.submit(chain()).unwrap();

        let step = core.kickoff();
        let first = dispatched(&step);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].name, "a");
        assert_eq!(core.job_status(id), Some(JobStatus::Running));

        let step = core.step(RuntimeEvent::TaskCompleted {
            task: first[0].id,
            result: TaskResult::success(first[0].id, "out-a"),
        });
        let second = dispatched(&step);
        assert_eq!(second[0].name, "b");
        assert!(step.keep_running);

        let step = core.step(RuntimeEvent::TaskCompleted {
            task: second[0].id,
            result: TaskResult::success(second[0].id, "out-b"),
        });
        assert!(!step.keep_running);
        assert!(matches!(step.commands.last(), Some(CoreCommand::RequestExit)));
        assert_eq!(core.job_status(id), Some(JobStatus::Finished));
        assert_eq!(
            core.job_result(id).unwrap().result("b").unwrap().value.as_deref(),
            Some("out-b")
        );
        assert_eq!(core.free_resources(), 2);
    }

    #[test]
    fn completion_of_a_task_that_is_not_running_is_ignored() {
        let mut core = core(1);
        let id = core.submit(chain()).unwrap();
        core.kickoff();

        let b = TaskId::new(id, 1);
        let step = core.step(RuntimeEvent::TaskCompleted {
            task: b,
            result: TaskResult::success(b, "early"),
        });
        assert!(dispatched(&step).is_empty());
        assert!(core.job_result(id).unwrap().result("b").is_none());
        assert_eq!(core.task_status(b), Some(TaskStatus::Submitted));
    }

    #[test]
    fn shutdown_stops_the_loop() {
        let mut core = core(1);
        core.submit(chain()).unwrap();
        let step = core.step(RuntimeEvent::ShutdownRequested);
        assert!(!step.keep_running);
        assert!(step.commands.is_empty());
    }

    #[test]
    fn unknown_jobs_are_rejected_without_side_effects() {
        let mut core = core(1);
        core.submit(chain()).unwrap();
        core.kickoff();
        let step = core.step(RuntimeEvent::KillJob { job: JobId(42) });
        assert!(step.commands.is_empty());
        assert_eq!(core.active_job_count(), 1);
    }
}

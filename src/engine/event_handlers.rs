// src/engine/event_handlers.rs

//! Event handling logic for the core runtime.
//!
//! Handlers mutate the job table and the ready queue and return the
//! commands the IO shell has to carry out. They never start tasks
//! themselves; the core runs a dispatch pass after every event.

use std::collections::HashMap;

use tracing::{debug, info, trace, warn};

use crate::dag::{JobSpec, Membership};
use crate::engine::dispatch::{Dispatcher, ScheduledTask};
use crate::engine::jobs::{ActiveJob, JobSummary, JobTable};
use crate::engine::queue::ReadyQueue;
use crate::errors::{JobflowError, Result};
use crate::result::{TaskResult, TASK_KILLED};
use crate::types::{JobId, JobPriority, JobStatus, TaskId, TaskStatus};

/// Command produced by the pure core, to be executed by the outer IO shell.
#[derive(Debug, Clone)]
pub enum CoreCommand {
    /// Send these tasks to the executor.
    DispatchTasks(Vec<ScheduledTask>),
    /// Stop these tasks; their completion is no longer expected.
    CancelTasks(Vec<TaskId>),
    /// A job reached a terminal status.
    JobEnded(JobSummary),
    /// Request that the process exits (no active job left in batch mode).
    RequestExit,
}

/// Decision returned by the core after handling a single `RuntimeEvent`.
#[derive(Debug, Clone)]
pub struct CoreStep {
    /// Commands the IO shell should execute, in order.
    pub commands: Vec<CoreCommand>,
    /// Whether the outer runtime loop should keep running.
    pub keep_running: bool,
}

/// Register a new job and queue it if it has eligible work.
///
/// A malformed submission is rejected as a whole and nothing is registered.
pub fn handle_job_submitted(
    jobs: &mut JobTable,
    ready: &mut ReadyQueue,
    spec: JobSpec,
) -> Result<Vec<CoreCommand>> {
    let name = spec.name.clone();
    let id = jobs.submit(spec)?;

    if let Some(job) = jobs.get(id) {
        ready.refresh(&job.descriptor);
        info!(
            job = %id,
            name = %name,
            priority = ?job.descriptor.priority(),
            tasks = job.descriptor.total_task_count(),
            "job submitted"
        );
    }
    Ok(Vec::new())
}

/// Handle a task completion event.
///
/// - A failed task with executions left is restarted and waits on error;
///   only the result of its last execution reaches the job result.
/// - A final failure in a `pause_on_error` job holds the task in error and
///   marks the job in error.
/// - Otherwise the task terminates and its children may become eligible
///   (paused right away if the job is paused).
/// - A final failure ends a `cancel_on_error` job as canceled.
/// - The job finishes once every task is done.
pub fn handle_task_completed(
    jobs: &mut JobTable,
    ready: &mut ReadyQueue,
    dispatcher: &mut Dispatcher,
    task: TaskId,
    result: TaskResult,
) -> Result<Vec<CoreCommand>> {
    let Some(job) = jobs.get_mut(task.job) else {
        warn!(task = %task, "completion for a job that is no longer active; ignoring");
        return Ok(Vec::new());
    };

    let membership = job.descriptor.membership_of(task)?;
    if membership != Membership::Running {
        warn!(
            task = %task,
            membership = membership.as_str(),
            "completion for a task that is not running; ignoring"
        );
        return Ok(Vec::new());
    }

    let node = job.descriptor.task(task)?.node();
    let (name, precious, resources, max_executions) = (
        node.name.clone(),
        node.precious,
        node.resources_needed,
        node.max_executions,
    );

    let used = job.consume_execution(task);
    dispatcher.release(resources);
    let failed = result.had_exception();
    let paused = job.status == JobStatus::Paused;

    if failed && used < max_executions {
        job.descriptor.restart(task)?;
        if paused {
            job.descriptor.pause(task)?;
            job.set_task_status(task, TaskStatus::Paused);
        } else {
            job.set_task_status(task, TaskStatus::WaitingOnError);
        }
        warn!(
            task = %task,
            name = %name,
            executions = used,
            max_executions,
            exception = result.exception.as_deref().unwrap_or_default(),
            "task failed; it will be executed again"
        );
        ready.refresh(&job.descriptor);
        return Ok(Vec::new());
    }

    if failed && job.spec.pause_on_error {
        job.descriptor.pause_on_error(task)?;
        job.result.add_task_result(&name, result, precious);
        job.set_task_status(task, TaskStatus::InError);
        if !paused {
            job.status = JobStatus::InError;
        }
        warn!(task = %task, name = %name, executions = used, "task failed for good; held in error");
        ready.refresh(&job.descriptor);
        return Ok(Vec::new());
    }

    let promoted = job.descriptor.terminate(task)?;
    job.result.add_task_result(&name, result, precious);
    job.set_task_status(
        task,
        if failed {
            TaskStatus::Faulty
        } else {
            TaskStatus::Finished
        },
    );
    settle_terminated(job, task, &promoted)?;

    if failed {
        warn!(task = %task, name = %name, executions = used, "task failed for good");
    } else {
        debug!(task = %task, name = %name, promoted = promoted.len(), "task finished");
    }

    let job_id = task.job;
    if failed && job.spec.cancel_on_error {
        return Ok(end_job(jobs, ready, dispatcher, job_id, JobStatus::Canceled));
    }
    if job.descriptor.is_complete() {
        return Ok(end_job(jobs, ready, dispatcher, job_id, JobStatus::Finished));
    }

    ready.refresh(&job.descriptor);
    Ok(Vec::new())
}

/// The worker running `task` went away: put the task back without charging
/// an execution.
pub fn handle_task_lost(
    jobs: &mut JobTable,
    ready: &mut ReadyQueue,
    dispatcher: &mut Dispatcher,
    task: TaskId,
) -> Result<Vec<CoreCommand>> {
    let Some(job) = jobs.get_mut(task.job) else {
        warn!(task = %task, "lost worker for a job that is no longer active; ignoring");
        return Ok(Vec::new());
    };

    let membership = job.descriptor.membership_of(task)?;
    if membership != Membership::Running {
        warn!(
            task = %task,
            membership = membership.as_str(),
            "lost worker for a task that is not running; ignoring"
        );
        return Ok(Vec::new());
    }

    let resources = job.descriptor.task(task)?.resources_needed();
    job.descriptor.restart(task)?;
    dispatcher.release(resources);

    if job.status == JobStatus::Paused {
        job.descriptor.pause(task)?;
        job.set_task_status(task, TaskStatus::Paused);
    } else {
        job.set_task_status(task, TaskStatus::Pending);
    }
    warn!(task = %task, "worker lost; task will be executed again");

    ready.refresh(&job.descriptor);
    Ok(Vec::new())
}

/// Pause every task that has not started; running tasks are left to finish.
pub fn handle_pause_job(
    jobs: &mut JobTable,
    ready: &mut ReadyQueue,
    id: JobId,
) -> Result<Vec<CoreCommand>> {
    let job = jobs.get_mut(id).ok_or(JobflowError::JobNotFound(id))?;
    if job.status == JobStatus::Paused {
        debug!(job = %id, "job already paused");
        return Ok(Vec::new());
    }

    let moved = job.pause_pending_tasks();
    job.status = JobStatus::Paused;
    info!(job = %id, paused = moved, "job paused");

    ready.refresh(&job.descriptor);
    Ok(Vec::new())
}

/// Release every paused task of a paused job. Tasks held in error stay
/// where they are.
pub fn handle_resume_job(
    jobs: &mut JobTable,
    ready: &mut ReadyQueue,
    id: JobId,
) -> Result<Vec<CoreCommand>> {
    let job = jobs.get_mut(id).ok_or(JobflowError::JobNotFound(id))?;
    if job.status != JobStatus::Paused {
        warn!(job = %id, status = ?job.status, "resume requested for a job that is not paused; ignoring");
        return Ok(Vec::new());
    }

    let changes: HashMap<TaskId, TaskStatus> = job
        .task_statuses()
        .filter(|(_, status)| *status == TaskStatus::Paused)
        .map(|(task, _)| (task, TaskStatus::Pending))
        .collect();

    let moved = job.descriptor.apply_task_state_changes(&changes);
    for task in changes.keys() {
        job.set_task_status(*task, TaskStatus::Pending);
    }

    let counts = job.descriptor.counts();
    job.status = if job.has_tasks_in_error() {
        JobStatus::InError
    } else if counts.running > 0 || counts.done > 0 {
        JobStatus::Running
    } else {
        JobStatus::Pending
    };
    info!(job = %id, resumed = moved, "job resumed");

    ready.refresh(&job.descriptor);
    Ok(Vec::new())
}

/// Terminate a single task while the rest of the job goes on.
///
/// The task may be eligible, running or paused (in error included). A
/// running task's worker is told to stop and its slots are released. The
/// task is recorded as a failure and its children are released as if it had
/// terminated.
pub fn handle_kill_task(
    jobs: &mut JobTable,
    ready: &mut ReadyQueue,
    dispatcher: &mut Dispatcher,
    task: TaskId,
) -> Result<Vec<CoreCommand>> {
    let job = jobs.get_mut(task.job).ok_or(JobflowError::JobNotFound(task.job))?;

    let membership = job.descriptor.membership_of(task)?;
    if matches!(membership, Membership::Blocked | Membership::Done) {
        warn!(
            task = %task,
            membership = membership.as_str(),
            "kill requested for a task that is not waiting or running; ignoring"
        );
        return Ok(Vec::new());
    }

    let node = job.descriptor.task(task)?.node();
    let (name, precious, resources) = (node.name.clone(), node.precious, node.resources_needed);

    let promoted = job.descriptor.kill(task)?;
    let mut commands = Vec::new();
    if membership == Membership::Running {
        dispatcher.release(resources);
        commands.push(CoreCommand::CancelTasks(vec![task]));
    }
    job.result
        .add_task_result(&name, TaskResult::failure(task, TASK_KILLED), precious);
    job.set_task_status(task, TaskStatus::Killed);
    settle_terminated(job, task, &promoted)?;
    clear_error_status(job);
    info!(task = %task, name = %name, from = membership.as_str(), "task killed");

    let job_id = task.job;
    if job.descriptor.is_complete() {
        commands.extend(end_job(jobs, ready, dispatcher, job_id, JobStatus::Finished));
        return Ok(commands);
    }

    ready.refresh(&job.descriptor);
    Ok(commands)
}

/// Give a task held in error a fresh execution budget and queue it again.
///
/// In a paused job the task stays paused until the job is resumed.
pub fn handle_restart_in_error_task(
    jobs: &mut JobTable,
    ready: &mut ReadyQueue,
    task: TaskId,
) -> Result<Vec<CoreCommand>> {
    let job = jobs.get_mut(task.job).ok_or(JobflowError::JobNotFound(task.job))?;
    if !in_error(job, task) {
        return Ok(Vec::new());
    }

    job.set_executions_used(task, 0);
    if job.status == JobStatus::Paused {
        job.set_task_status(task, TaskStatus::Paused);
    } else {
        job.descriptor.resume(task)?;
        job.set_task_status(task, TaskStatus::Pending);
    }
    clear_error_status(job);
    info!(task = %task, "task in error restarted");

    ready.refresh(&job.descriptor);
    Ok(Vec::new())
}

/// Give up on a task held in error: it ends faulty and its children are
/// released.
pub fn handle_finish_in_error_task(
    jobs: &mut JobTable,
    ready: &mut ReadyQueue,
    dispatcher: &mut Dispatcher,
    task: TaskId,
) -> Result<Vec<CoreCommand>> {
    let job = jobs.get_mut(task.job).ok_or(JobflowError::JobNotFound(task.job))?;
    if !in_error(job, task) {
        return Ok(Vec::new());
    }

    let promoted = job.descriptor.terminate_in_error(task)?;
    job.set_task_status(task, TaskStatus::Faulty);
    settle_terminated(job, task, &promoted)?;
    clear_error_status(job);
    info!(task = %task, promoted = promoted.len(), "task in error finished");

    let job_id = task.job;
    if job.descriptor.is_complete() {
        return Ok(end_job(jobs, ready, dispatcher, job_id, JobStatus::Finished));
    }

    ready.refresh(&job.descriptor);
    Ok(Vec::new())
}

fn in_error(job: &ActiveJob, task: TaskId) -> bool {
    let status = job.task_status(task);
    if status != Some(TaskStatus::InError) {
        warn!(task = %task, status = ?status, "task is not in error; ignoring");
        return false;
    }
    true
}

/// Put a job in error back to running once no task is held in error.
fn clear_error_status(job: &mut ActiveJob) {
    if job.status == JobStatus::InError && !job.has_tasks_in_error() {
        job.status = JobStatus::Running;
        info!(job = %job.id(), "job no longer in error");
    }
}

/// Bookkeeping shared by every path that moves a task to done: children
/// promoted into a paused job are paused at once, and results nobody
/// downstream waits on any more are released.
fn settle_terminated(job: &mut ActiveJob, task: TaskId, promoted: &[TaskId]) -> Result<()> {
    if job.status == JobStatus::Paused {
        for child in promoted {
            job.descriptor.pause(*child)?;
            job.set_task_status(*child, TaskStatus::Paused);
        }
    }

    let parents = job.descriptor.task(task)?.parents().to_vec();
    for id in std::iter::once(task).chain(parents) {
        if !job.descriptor.result_releasable(id)? {
            continue;
        }
        let name = job.descriptor.task(id)?.name().to_string();
        if job.result.release(&name) {
            trace!(
                task = %id,
                name = %name,
                had_children = job.descriptor.has_children(id)?,
                "task result released"
            );
        }
    }
    Ok(())
}

pub fn handle_kill_job(
    jobs: &mut JobTable,
    ready: &mut ReadyQueue,
    dispatcher: &mut Dispatcher,
    id: JobId,
) -> Result<Vec<CoreCommand>> {
    if jobs.get(id).is_none() {
        return Err(JobflowError::JobNotFound(id));
    }
    Ok(end_job(jobs, ready, dispatcher, id, JobStatus::Killed))
}

pub fn handle_change_priority(
    jobs: &mut JobTable,
    ready: &mut ReadyQueue,
    id: JobId,
    priority: JobPriority,
) -> Result<Vec<CoreCommand>> {
    let job = jobs.get_mut(id).ok_or(JobflowError::JobNotFound(id))?;
    let previous = job.descriptor.priority();
    job.descriptor.set_priority(priority);
    job.spec.priority = priority;
    ready.refresh(&job.descriptor);
    info!(job = %id, from = ?previous, to = ?priority, "job priority changed");
    Ok(Vec::new())
}

/// Move a job to a terminal status.
///
/// The descriptor is torn down (every partition emptied), the slots of its
/// running tasks are released, unreported tasks get a synthetic result and
/// the summary is kept in the finished table.
pub fn end_job(
    jobs: &mut JobTable,
    ready: &mut ReadyQueue,
    dispatcher: &mut Dispatcher,
    id: JobId,
    status: JobStatus,
) -> Vec<CoreCommand> {
    let Some(mut job) = jobs.remove(id) else {
        return Vec::new();
    };
    ready.remove(id);

    let running = job.descriptor.teardown();
    for task in &running {
        if let Ok(desc) = job.descriptor.task(*task) {
            dispatcher.release(desc.resources_needed());
        }
    }
    job.abort_unfinished();

    let summary = job.into_summary(status);
    info!(
        job = %id,
        name = %summary.name,
        status = ?status,
        exceptions = summary.result.exception_results().len(),
        cancelled = running.len(),
        "job ended"
    );
    jobs.record_finished(summary.clone());

    let mut commands = Vec::new();
    if !running.is_empty() {
        commands.push(CoreCommand::CancelTasks(running));
    }
    commands.push(CoreCommand::JobEnded(summary));
    commands
}

// tests/recovery.rs

use jobflow::dag::{InMemoryRecoverySource, PersistedJob, RecoverySource};
use jobflow::engine::{CoreCommand, CoreRuntime, RuntimeEvent, RuntimeOptions, ScheduledTask};
use jobflow::errors::{JobflowError, Result};
use jobflow::result::TaskResult;
use jobflow::types::{JobId, JobStatus, TaskId, TaskStatus};
use jobflow_test_utils::builders::{JobSpecBuilder, TaskSpecBuilder};
use jobflow_test_utils::init_tracing;

fn pipeline() -> jobflow::dag::JobSpec {
    JobSpecBuilder::new("pipeline")
        .with_task(TaskSpecBuilder::new("fetch").build())
        .with_task(TaskSpecBuilder::new("parse").after("fetch").max_executions(3).build())
        .with_task(TaskSpecBuilder::new("report").after("parse").precious(true).build())
        .build()
}

fn dispatched(commands: &[CoreCommand]) -> Vec<ScheduledTask> {
    commands
        .iter()
        .filter_map(|c| match c {
            CoreCommand::DispatchTasks(tasks) => Some(tasks.clone()),
            _ => None,
        })
        .flatten()
        .collect()
}

fn core() -> CoreRuntime {
    init_tracing();
    CoreRuntime::new(2, RuntimeOptions { exit_when_idle: true })
}

#[test]
fn running_tasks_are_dispatched_again_after_recovery() {
    let id = JobId(5);
    let fetch = TaskId::new(id, 0);
    let mut persisted = PersistedJob::new(id, pipeline())
        .with_status("fetch", TaskStatus::Finished)
        .with_status("parse", TaskStatus::Running);
    persisted.status = JobStatus::Running;
    persisted
        .results
        .insert("fetch".into(), TaskResult::success(fetch, "payload"));
    persisted.executions.insert("fetch".into(), 1);
    persisted.executions.insert("parse".into(), 2);

    let mut core = core();
    let recovered = core
        .recover(&InMemoryRecoverySource::new(vec![persisted]))
        .unwrap();
    assert_eq!(recovered, 1);
    assert_eq!(core.job_status(id), Some(JobStatus::Running));

    let parse = TaskId::new(id, 1);
    assert_eq!(core.task_status(parse), Some(TaskStatus::Pending));
    assert_eq!(core.active_job(id).unwrap().executions_used(parse), 2);

    let step = core.kickoff();
    let started = dispatched(&step.commands);
    assert_eq!(started.len(), 1);
    assert_eq!(started[0].id, parse);

    // One execution left: a failure now is final.
    core.step(RuntimeEvent::TaskCompleted {
        task: parse,
        result: TaskResult::failure(parse, "bad input"),
    });
    assert_eq!(core.task_status(parse), Some(TaskStatus::Faulty));

    assert_eq!(
        core.job_result(id).unwrap().result("fetch").unwrap().value.as_deref(),
        Some("payload")
    );
}

#[test]
fn new_submissions_do_not_reuse_recovered_ids() {
    let mut core = core();
    core.recover(&InMemoryRecoverySource::new(vec![PersistedJob::new(
        JobId(9),
        pipeline(),
    )]))
    .unwrap();

    let fresh = core.submit(pipeline()).unwrap();
    assert_eq!(fresh, JobId(10));
}

#[test]
fn paused_jobs_stay_paused() {
    let id = JobId(1);
    let mut persisted = PersistedJob::new(id, pipeline())
        .with_status("fetch", TaskStatus::Running);
    persisted.status = JobStatus::Paused;

    let mut core = core();
    core.recover(&InMemoryRecoverySource::new(vec![persisted]))
        .unwrap();

    let fetch = TaskId::new(id, 0);
    assert_eq!(core.task_status(fetch), Some(TaskStatus::Paused));
    assert!(dispatched(&core.kickoff().commands).is_empty());

    let resumed = dispatched(&core.step(RuntimeEvent::ResumeJob { job: id }).commands);
    assert_eq!(resumed[0].id, fetch);
}

#[test]
fn paused_jobs_hold_back_tasks_that_never_started() {
    let id = JobId(2);
    let mut persisted = PersistedJob::new(id, pipeline());
    persisted.status = JobStatus::Paused;

    let mut core = core();
    core.recover(&InMemoryRecoverySource::new(vec![persisted]))
        .unwrap();

    let fetch = TaskId::new(id, 0);
    assert_eq!(core.task_status(fetch), Some(TaskStatus::Paused));
    assert_eq!(core.task_status(TaskId::new(id, 2)), Some(TaskStatus::Paused));
    assert!(dispatched(&core.kickoff().commands).is_empty());
    assert!(core.ready_queue().is_empty());

    let resumed = dispatched(&core.step(RuntimeEvent::ResumeJob { job: id }).commands);
    assert_eq!(resumed.len(), 1);
    assert_eq!(resumed[0].id, fetch);
    assert_eq!(core.job_status(id), Some(JobStatus::Running));
}

#[test]
fn jobs_with_every_task_terminated_end_at_kickoff() {
    let id = JobId(3);
    let mut persisted = PersistedJob::new(id, pipeline())
        .with_status("fetch", TaskStatus::Finished)
        .with_status("parse", TaskStatus::Finished)
        .with_status("report", TaskStatus::Finished);
    persisted.status = JobStatus::Running;
    persisted.results.insert(
        "report".into(),
        TaskResult::success(TaskId::new(id, 2), "done"),
    );

    let mut core = core();
    let recovered = core
        .recover(&InMemoryRecoverySource::new(vec![persisted]))
        .unwrap();
    assert_eq!(recovered, 1);
    assert_eq!(core.active_job_count(), 0);

    let step = core.kickoff();
    assert!(!step.keep_running);
    assert!(matches!(
        step.commands.as_slice(),
        [CoreCommand::JobEnded(summary), CoreCommand::RequestExit]
            if summary.id == id && summary.status == JobStatus::Finished
    ));
    assert_eq!(core.job_status(id), Some(JobStatus::Finished));
    assert!(core.job_result(id).unwrap().precious_collected());

    // Handed out once.
    assert!(core.kickoff().commands.iter().all(|c| !matches!(c, CoreCommand::JobEnded(_))));
}

#[test]
fn terminated_cancel_on_error_job_with_a_faulty_task_ends_canceled() {
    let id = JobId(4);
    let spec = JobSpecBuilder::new("strict")
        .cancel_on_error(true)
        .with_task(TaskSpecBuilder::new("only").build())
        .build();
    let mut persisted = PersistedJob::new(id, spec).with_status("only", TaskStatus::Faulty);
    persisted.status = JobStatus::Running;

    let mut core = core();
    core.recover(&InMemoryRecoverySource::new(vec![persisted]))
        .unwrap();

    let step = core.kickoff();
    assert!(step
        .commands
        .iter()
        .any(|c| matches!(c, CoreCommand::JobEnded(s) if s.status == JobStatus::Canceled)));
    assert_eq!(core.job_status(id), Some(JobStatus::Canceled));
}

#[test]
fn tasks_in_error_are_held_until_restarted() {
    let id = JobId(6);
    let spec = JobSpecBuilder::new("held")
        .pause_on_error(true)
        .with_task(TaskSpecBuilder::new("fetch").build())
        .with_task(TaskSpecBuilder::new("parse").after("fetch").build())
        .build();
    let mut persisted = PersistedJob::new(id, spec)
        .with_status("fetch", TaskStatus::InError);
    persisted.status = JobStatus::InError;
    persisted.executions.insert("fetch".into(), 1);

    let mut core = core();
    core.recover(&InMemoryRecoverySource::new(vec![persisted]))
        .unwrap();

    let fetch = TaskId::new(id, 0);
    assert_eq!(core.task_status(fetch), Some(TaskStatus::InError));
    assert_eq!(core.job_status(id), Some(JobStatus::InError));
    assert!(dispatched(&core.kickoff().commands).is_empty());

    let step = core.step(RuntimeEvent::RestartInErrorTask { task: fetch });
    let started = dispatched(&step.commands);
    assert_eq!(started.len(), 1);
    assert_eq!(started[0].id, fetch);
    assert_eq!(core.job_status(id), Some(JobStatus::Running));
    assert_eq!(core.active_job(id).unwrap().executions_used(fetch), 0);
}

#[test]
fn inconsistent_and_terminal_jobs_are_skipped() {
    let broken = PersistedJob::new(JobId(1), pipeline())
        .with_status("report", TaskStatus::Finished);
    let mut ended = PersistedJob::new(JobId(2), pipeline());
    ended.status = JobStatus::Finished;
    let healthy = PersistedJob::new(JobId(3), pipeline());

    let mut core = core();
    let recovered = core
        .recover(&InMemoryRecoverySource::new(vec![broken, ended, healthy]))
        .unwrap();

    assert_eq!(recovered, 1);
    assert!(core.active_job(JobId(1)).is_none());
    assert!(core.active_job(JobId(2)).is_none());
    assert!(core.active_job(JobId(3)).is_some());
}

#[test]
fn source_errors_are_propagated() {
    struct Unreachable;
    impl RecoverySource for Unreachable {
        fn load_active_jobs(&self) -> Result<Vec<PersistedJob>> {
            Err(JobflowError::Recovery("database offline".into()))
        }
    }

    let mut core = core();
    assert!(matches!(
        core.recover(&Unreachable),
        Err(JobflowError::Recovery(msg)) if msg.contains("offline")
    ));
}

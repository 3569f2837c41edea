// tests/runtime_fake_executor.rs

use std::error::Error;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use jobflow::engine::{CoreRuntime, Runtime, RuntimeEvent, RuntimeOptions};
use jobflow::types::{JobId, JobPriority, JobStatus, TaskId, TaskStatus};
use jobflow_test_utils::builders::{JobSpecBuilder, TaskSpecBuilder};
use jobflow_test_utils::fake_executor::{FakeExecutor, FakeOutcome};
use jobflow_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

fn batch_core(resources: u32) -> CoreRuntime {
    CoreRuntime::new(resources, RuntimeOptions { exit_when_idle: true })
}

#[tokio::test]
async fn runtime_with_fake_executor_runs_simple_chain() -> TestResult {
    init_tracing();

    let mut core = batch_core(2);
    core.submit(
        JobSpecBuilder::new("chain")
            .with_task(TaskSpecBuilder::new("A").build())
            .with_task(TaskSpecBuilder::new("B").after("A").build())
            .build(),
    )?;

    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(64);
    let executed = Arc::new(Mutex::new(Vec::new()));
    let executor = FakeExecutor::new(rt_tx.clone(), executed.clone());

    let runtime = Runtime::new(core, rt_rx, executor);
    let summaries = with_timeout(runtime.run()).await?;

    assert_eq!(*executed.lock().unwrap(), vec!["chain/A", "chain/B"]);
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].status, JobStatus::Finished);
    assert_eq!(
        summaries[0].result.result("B").and_then(|r| r.value.as_deref()),
        Some("B")
    );
    Ok(())
}

#[tokio::test]
async fn jobs_end_in_priority_order_on_a_single_slot() -> TestResult {
    init_tracing();

    let mut core = batch_core(1);
    for (name, priority) in [
        ("idle", JobPriority::Idle),
        ("urgent", JobPriority::Highest),
        ("normal", JobPriority::Normal),
    ] {
        core.submit(
            JobSpecBuilder::new(name)
                .priority(priority)
                .with_task(TaskSpecBuilder::new("only").build())
                .build(),
        )?;
    }

    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(64);
    let executed = Arc::new(Mutex::new(Vec::new()));
    let executor = FakeExecutor::new(rt_tx.clone(), executed.clone());

    let summaries = with_timeout(Runtime::new(core, rt_rx, executor).run()).await?;

    let ended: Vec<&str> = summaries.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(ended, vec!["urgent", "normal", "idle"]);
    assert_eq!(
        *executed.lock().unwrap(),
        vec!["urgent/only", "normal/only", "idle/only"]
    );
    Ok(())
}

#[tokio::test]
async fn flaky_task_is_retried_until_it_succeeds() -> TestResult {
    init_tracing();

    let mut core = batch_core(1);
    core.submit(
        JobSpecBuilder::new("flaky")
            .with_task(TaskSpecBuilder::new("fetch").max_executions(3).build())
            .with_task(TaskSpecBuilder::new("report").after("fetch").precious(true).build())
            .build(),
    )?;

    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(64);
    let executed = Arc::new(Mutex::new(Vec::new()));
    let executor = FakeExecutor::new(rt_tx.clone(), executed.clone())
        .with_outcome("fetch", FakeOutcome::FailTimes(2));

    let summaries = with_timeout(Runtime::new(core, rt_rx, executor).run()).await?;

    assert_eq!(
        *executed.lock().unwrap(),
        vec!["flaky/fetch", "flaky/fetch", "flaky/fetch", "flaky/report"]
    );
    let summary = &summaries[0];
    assert_eq!(summary.status, JobStatus::Finished);
    assert_eq!(summary.tasks["fetch"], TaskStatus::Finished);
    assert!(!summary.result.had_exception());
    assert!(summary.result.is_complete());
    Ok(())
}

#[tokio::test]
async fn cancel_on_error_stops_the_hanging_sibling() -> TestResult {
    init_tracing();

    let mut core = batch_core(2);
    let id = core.submit(
        JobSpecBuilder::new("strict")
            .cancel_on_error(true)
            .with_task(TaskSpecBuilder::new("slow").build())
            .with_task(TaskSpecBuilder::new("broken").build())
            .build(),
    )?;

    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(64);
    let executed = Arc::new(Mutex::new(Vec::new()));
    let executor = FakeExecutor::new(rt_tx.clone(), executed.clone())
        .with_outcome("slow", FakeOutcome::Hang)
        .with_outcome("broken", FakeOutcome::Fail("segfault".into()));
    let cancelled = executor.cancelled();

    let summaries = with_timeout(Runtime::new(core, rt_rx, executor).run()).await?;

    assert_eq!(*cancelled.lock().unwrap(), vec![TaskId::new(id, 0)]);
    let summary = &summaries[0];
    assert_eq!(summary.status, JobStatus::Canceled);
    assert_eq!(summary.tasks["slow"], TaskStatus::Aborted);
    assert_eq!(summary.tasks["broken"], TaskStatus::Faulty);
    assert_eq!(
        summary.result.exception_results()["broken"].exception.as_deref(),
        Some("segfault")
    );
    Ok(())
}

#[tokio::test]
async fn kill_event_ends_a_job_that_never_reports() -> TestResult {
    init_tracing();

    let mut core = batch_core(1);
    let id = core.submit(
        JobSpecBuilder::new("stuck")
            .with_task(TaskSpecBuilder::new("wait").build())
            .build(),
    )?;
    assert_eq!(id, JobId(0));

    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(64);
    let executed = Arc::new(Mutex::new(Vec::new()));
    let executor = FakeExecutor::new(rt_tx.clone(), executed.clone())
        .with_outcome("wait", FakeOutcome::Hang);
    let cancelled = executor.cancelled();

    rt_tx.send(RuntimeEvent::KillJob { job: id }).await?;
    let summaries = with_timeout(Runtime::new(core, rt_rx, executor).run()).await?;

    assert_eq!(*executed.lock().unwrap(), vec!["stuck/wait"]);
    assert_eq!(*cancelled.lock().unwrap(), vec![TaskId::new(id, 0)]);
    assert_eq!(summaries[0].status, JobStatus::Killed);
    Ok(())
}

#[tokio::test]
async fn submissions_arriving_as_events_are_scheduled() -> TestResult {
    init_tracing();

    let core = CoreRuntime::new(2, RuntimeOptions { exit_when_idle: false });

    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(64);
    let executed = Arc::new(Mutex::new(Vec::new()));
    let executor = FakeExecutor::new(rt_tx.clone(), executed.clone());

    rt_tx
        .send(RuntimeEvent::JobSubmitted {
            spec: JobSpecBuilder::new("late")
                .with_task(TaskSpecBuilder::new("x").build())
                .build(),
        })
        .await?;

    let handle = tokio::spawn(Runtime::new(core, rt_rx, executor).run());

    // Wait until the job has run, then stop the runtime.
    with_timeout(async {
        loop {
            if executed.lock().unwrap().len() == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    })
    .await;
    rt_tx.send(RuntimeEvent::ShutdownRequested).await?;

    let summaries = with_timeout(handle).await??;
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].name, "late");
    assert_eq!(summaries[0].status, JobStatus::Finished);
    Ok(())
}

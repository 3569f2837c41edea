use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use jobflow::engine::{RuntimeEvent, ScheduledTask};
use jobflow::errors::Result;
use jobflow::exec::ExecutorBackend;
use jobflow::result::TaskResult;
use jobflow::types::TaskId;
use tokio::sync::mpsc;

/// What the fake executor does with a task, by task name.
#[derive(Debug, Clone)]
pub enum FakeOutcome {
    /// Report success with this value.
    Succeed(String),
    /// Report an exception with this message.
    Fail(String),
    /// Fail this many times, then succeed.
    FailTimes(u32),
    /// Never report anything (the task keeps its slot until cancelled).
    Hang,
}

/// A fake executor that:
/// - records which tasks were "run" (`job/task` names, in dispatch order)
/// - records which tasks were cancelled
/// - immediately reports `TaskCompleted` for each scheduled task according to
///   its scripted outcome (success with the task name by default).
pub struct FakeExecutor {
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    executed: Arc<Mutex<Vec<String>>>,
    cancelled: Arc<Mutex<Vec<TaskId>>>,
    outcomes: HashMap<String, FakeOutcome>,
    failures_left: HashMap<String, u32>,
}

impl FakeExecutor {
    pub fn new(
        runtime_tx: mpsc::Sender<RuntimeEvent>,
        executed: Arc<Mutex<Vec<String>>>,
    ) -> Self {
        Self {
            runtime_tx,
            executed,
            cancelled: Arc::new(Mutex::new(Vec::new())),
            outcomes: HashMap::new(),
            failures_left: HashMap::new(),
        }
    }

    /// Script the outcome of task `name` (matched on the task name only).
    pub fn with_outcome(mut self, name: &str, outcome: FakeOutcome) -> Self {
        if let FakeOutcome::FailTimes(n) = outcome {
            self.failures_left.insert(name.to_string(), n);
        }
        self.outcomes.insert(name.to_string(), outcome);
        self
    }

    /// Shared list of cancelled task ids.
    pub fn cancelled(&self) -> Arc<Mutex<Vec<TaskId>>> {
        Arc::clone(&self.cancelled)
    }

    fn result_for(&mut self, task: &ScheduledTask) -> Option<TaskResult> {
        match self.outcomes.get(&task.name) {
            None => Some(TaskResult::success(task.id, task.name.clone())),
            Some(FakeOutcome::Succeed(value)) => Some(TaskResult::success(task.id, value.clone())),
            Some(FakeOutcome::Fail(message)) => Some(TaskResult::failure(task.id, message.clone())),
            Some(FakeOutcome::FailTimes(_)) => {
                let left = self.failures_left.entry(task.name.clone()).or_insert(0);
                if *left > 0 {
                    *left -= 1;
                    Some(TaskResult::failure(task.id, "scripted failure"))
                } else {
                    Some(TaskResult::success(task.id, task.name.clone()))
                }
            }
            Some(FakeOutcome::Hang) => None,
        }
    }
}

impl ExecutorBackend for FakeExecutor {
    fn spawn_ready_tasks(
        &mut self,
        tasks: Vec<ScheduledTask>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let tx = self.runtime_tx.clone();
        let executed = Arc::clone(&self.executed);

        let mut reports = Vec::new();
        for t in &tasks {
            executed
                .lock()
                .unwrap()
                .push(format!("{}/{}", t.job_name, t.name));
            if let Some(result) = self.result_for(t) {
                reports.push((t.id, result));
            }
        }

        Box::pin(async move {
            for (task, result) in reports {
                tx.send(RuntimeEvent::TaskCompleted { task, result })
                    .await
                    .map_err(anyhow::Error::from)?;
            }
            Ok(())
        })
    }

    fn cancel_tasks(
        &mut self,
        tasks: Vec<TaskId>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        self.cancelled.lock().unwrap().extend(tasks);
        Box::pin(async { Ok(()) })
    }
}

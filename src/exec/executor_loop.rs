// src/exec/executor_loop.rs

//! Main executor loop that manages running task processes.

use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::engine::{RuntimeEvent, ScheduledTask};
use crate::exec::task_runner::run_task;
use crate::types::TaskId;

/// Request sent from the runtime to the executor loop.
#[derive(Debug)]
pub enum ExecutorRequest {
    Run(ScheduledTask),
    Cancel(Vec<TaskId>),
}

/// Internal handle for a currently-running task process.
///
/// - `cancel` is used by the executor to request that the process be stopped
///   (when its job is killed or canceled).
/// - `handle` is the Tokio task that is actually running the command.
struct ActiveTask {
    cancel: Option<oneshot::Sender<()>>,
    handle: tokio::task::JoinHandle<()>,
}

/// Spawn the background executor loop.
///
/// The returned sender is what [`RealExecutorBackend`](super::RealExecutorBackend)
/// forwards requests to. Each scheduled task is executed in its own Tokio
/// task; the dispatcher never hands out the same task twice while it runs.
pub fn spawn_executor(runtime_tx: mpsc::Sender<RuntimeEvent>) -> mpsc::Sender<ExecutorRequest> {
    let (tx, mut rx) = mpsc::channel::<ExecutorRequest>(32);

    tokio::spawn(async move {
        info!("executor loop started");

        let mut active: HashMap<TaskId, ActiveTask> = HashMap::new();

        while let Some(request) = rx.recv().await {
            active.retain(|_, t| !t.handle.is_finished());
            match request {
                ExecutorRequest::Run(task) => {
                    handle_scheduled_task(task, &mut active, &runtime_tx);
                }
                ExecutorRequest::Cancel(tasks) => {
                    for id in tasks {
                        cancel_task(id, &mut active);
                    }
                }
            }
        }

        info!("executor loop finished (channel closed)");
    });

    tx
}

/// Handle a newly scheduled task.
fn handle_scheduled_task(
    task: ScheduledTask,
    active: &mut HashMap<TaskId, ActiveTask>,
    runtime_tx: &mpsc::Sender<RuntimeEvent>,
) {
    let id = task.id;

    if active.contains_key(&id) {
        warn!(task = %id, name = %task.name, "task is already running; ignoring duplicate dispatch");
        return;
    }

    let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
    let rt_tx = runtime_tx.clone();

    let handle = tokio::spawn(async move {
        run_task(task, rt_tx, cancel_rx).await;
        debug!(task = %id, "task runner future finished");
    });

    active.insert(
        id,
        ActiveTask {
            cancel: Some(cancel_tx),
            handle,
        },
    );
}

/// Cancel a running task.
fn cancel_task(id: TaskId, active: &mut HashMap<TaskId, ActiveTask>) {
    let Some(mut existing) = active.remove(&id) else {
        debug!(task = %id, "cancel requested for a task that is not running");
        return;
    };

    info!(task = %id, "cancelling task process");
    if let Some(cancel) = existing.cancel.take() {
        if cancel.send(()).is_err() {
            debug!(task = %id, "process already finished while cancelling");
        }
    }
}

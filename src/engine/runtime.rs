// src/engine/runtime.rs

use std::fmt;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::errors::Result;
use crate::exec::ExecutorBackend;
use crate::types::TaskId;

use super::core::CoreRuntime;
use super::dispatch::ScheduledTask;
use super::jobs::JobSummary;
use super::{CoreCommand, RuntimeEvent};

/// Drives the scheduling core in response to `RuntimeEvent`s,
/// and delegates actual command execution to an `ExecutorBackend`.
///
/// This is a pure IO shell around `CoreRuntime`, which contains all the
/// scheduling semantics. This struct handles async IO: reading events from
/// the channel, dispatching and cancelling tasks in the executor, and
/// collecting the summaries of jobs that ended.
pub struct Runtime<E: ExecutorBackend> {
    core: CoreRuntime,
    event_rx: mpsc::Receiver<RuntimeEvent>,
    executor: E,
    ended: Vec<JobSummary>,
}

impl<E: ExecutorBackend> fmt::Debug for Runtime<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("core", &self.core)
            .field("ended", &self.ended.len())
            .finish_non_exhaustive()
    }
}

impl<E: ExecutorBackend> Runtime<E> {
    pub fn new(
        core: CoreRuntime,
        event_rx: mpsc::Receiver<RuntimeEvent>,
        executor: E,
    ) -> Self {
        Self {
            core,
            event_rx,
            executor,
            ended: Vec::new(),
        }
    }

    /// Main event loop.
    ///
    /// - Dispatches whatever the core can start before any event arrives.
    /// - Consumes `RuntimeEvent`s from `event_rx`.
    /// - Feeds them into the core runtime.
    /// - Executes commands returned by the core (spawn, cancel, exit).
    ///
    /// Returns the summaries of the jobs that ended, in the order they ended.
    pub async fn run(mut self) -> Result<Vec<JobSummary>> {
        info!(active_jobs = self.core.active_job_count(), "jobflow runtime started");

        let step = self.core.kickoff();
        for command in step.commands {
            self.execute_command(command).await?;
        }

        if step.keep_running {
            loop {
                let event = match self.event_rx.recv().await {
                    Some(e) => e,
                    None => {
                        info!("runtime event channel closed; exiting");
                        break;
                    }
                };

                debug!(?event, "runtime received event");

                // Feed the event into the pure core and get commands back.
                let step = self.core.step(event);

                for command in step.commands {
                    self.execute_command(command).await?;
                }

                if !step.keep_running {
                    info!("core requested exit; stopping runtime");
                    break;
                }
            }
        }

        info!(ended = self.ended.len(), "runtime exiting");
        Ok(self.ended)
    }

    /// Execute a single command from the core.
    async fn execute_command(&mut self, command: CoreCommand) -> Result<()> {
        match command {
            CoreCommand::DispatchTasks(tasks) => {
                self.spawn_ready(tasks).await?;
            }
            CoreCommand::CancelTasks(tasks) => {
                self.cancel(tasks).await?;
            }
            CoreCommand::JobEnded(summary) => {
                info!(
                    job = %summary.id,
                    name = %summary.name,
                    status = ?summary.status,
                    "job summary available"
                );
                self.ended.push(summary);
            }
            CoreCommand::RequestExit => {
                // The core already returns keep_running=false in this case;
                // just log it.
                info!("core issued RequestExit command");
            }
        }
        Ok(())
    }

    async fn spawn_ready(&mut self, tasks: Vec<ScheduledTask>) -> Result<()> {
        if tasks.is_empty() {
            return Ok(());
        }

        let ids: Vec<String> = tasks.iter().map(|t| t.id.to_string()).collect();
        debug!(?ids, "spawning ready tasks");

        self.executor.spawn_ready_tasks(tasks).await
    }

    async fn cancel(&mut self, tasks: Vec<TaskId>) -> Result<()> {
        if tasks.is_empty() {
            return Ok(());
        }

        debug!(count = tasks.len(), "cancelling tasks");
        self.executor.cancel_tasks(tasks).await
    }
}

// src/exec/task_runner.rs

//! Individual task process runner.

use std::process::Stdio;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::engine::{RuntimeEvent, ScheduledTask};
use crate::result::TaskResult;

/// Run a single task process and report its result.
///
/// - stdout (trimmed) becomes the task's value.
/// - A non-zero exit becomes an exception carrying the exit code and the
///   last stderr line.
/// - If the cancel channel fires, the child process is killed and **no**
///   `TaskCompleted` event is sent; the core already gave up on it.
pub async fn run_task(
    task: ScheduledTask,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    cancel_rx: oneshot::Receiver<()>,
) {
    let id = task.id;
    if let Err(err) = run_task_inner(&task, &runtime_tx, cancel_rx).await {
        error!(task = %id, name = %task.name, error = %err, "task execution error");
        let _ = runtime_tx
            .send(RuntimeEvent::TaskCompleted {
                task: id,
                result: TaskResult::failure(id, format!("{err:#}")),
            })
            .await;
    }
}

async fn run_task_inner(
    task: &ScheduledTask,
    runtime_tx: &mpsc::Sender<RuntimeEvent>,
    mut cancel_rx: oneshot::Receiver<()>,
) -> Result<()> {
    info!(
        task = %task.id,
        job = %task.job_name,
        name = %task.name,
        attempt = task.attempt,
        cmd = %task.cmd,
        "starting task process"
    );

    // Build a shell command appropriate for the platform.
    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(&task.cmd);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(&task.cmd);
        c
    };

    cmd.stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning process for task '{}.{}'", task.job_name, task.name))?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let stdout_reader = tokio::spawn(async move {
        let mut out = String::new();
        if let Some(mut stdout) = stdout {
            stdout.read_to_string(&mut out).await?;
        }
        Ok::<_, std::io::Error>(out)
    });

    // Consume stderr so buffers don't fill; keep the last line for errors.
    let stderr_reader = {
        let id = task.id;
        tokio::spawn(async move {
            let mut last = None;
            if let Some(stderr) = stderr {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(task = %id, "stderr: {}", line);
                    if !line.trim().is_empty() {
                        last = Some(line);
                    }
                }
            }
            last
        })
    };

    tokio::select! {
        status_res = child.wait() => {
            let status = status_res.with_context(|| {
                format!("waiting for process of task '{}.{}'", task.job_name, task.name)
            })?;

            let code = status.code().unwrap_or(-1);
            let stdout = stdout_reader
                .await
                .context("joining stdout reader")?
                .context("reading task stdout")?;
            let last_stderr = stderr_reader.await.unwrap_or(None);

            let result = if status.success() {
                TaskResult::success(task.id, stdout.trim_end())
            } else {
                let message = match last_stderr {
                    Some(line) => format!("exit code {code}: {line}"),
                    None => format!("exit code {code}"),
                };
                TaskResult::failure(task.id, message)
            };

            info!(
                task = %task.id,
                exit_code = code,
                success = status.success(),
                "task process exited"
            );

            runtime_tx
                .send(RuntimeEvent::TaskCompleted { task: task.id, result })
                .await
                .with_context(|| {
                    format!("sending TaskCompleted event for task '{}' to runtime", task.id)
                })?;
        }

        cancel = &mut cancel_rx => {
            match cancel {
                Ok(()) => {
                    info!(task = %task.id, "cancellation requested; killing process");
                    if let Err(e) = child.kill().await {
                        warn!(
                            task = %task.id,
                            error = %e,
                            "failed to kill child process on cancellation"
                        );
                    }
                }
                Err(e) => {
                    debug!(
                        task = %task.id,
                        error = %e,
                        "cancel channel closed without explicit cancellation"
                    );
                    // Child will be killed on drop due to kill_on_drop(true).
                }
            }
        }
    }

    Ok(())
}

// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod result;
pub mod types;

use std::path::PathBuf;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::config::model::ConfigFile;
use crate::dag::JobGraph;
use crate::engine::{CoreRuntime, JobSummary, Runtime, RuntimeEvent, RuntimeOptions};
use crate::exec::RealExecutorBackend;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - submission file loading
/// - the scheduling core and its async shell
/// - executor
/// - Ctrl-C handling
///
/// Every job summary is printed to stdout as one JSON line once its job
/// ended.
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = PathBuf::from(&args.config);
    let cfg = load_and_validate(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    if args.dry_run {
        print_dry_run(&cfg);
        return Ok(());
    }

    let scheduler = *cfg.scheduler();
    let summaries = run_jobs(cfg, !args.keep_running).await?;

    for summary in &summaries {
        println!("{}", serde_json::to_string(summary)?);
    }
    info!(
        jobs = summaries.len(),
        resources = scheduler.resources,
        "all jobs ended"
    );
    Ok(())
}

/// Submit every job of `cfg` and drive them with the real executor.
pub async fn run_jobs(cfg: ConfigFile, exit_when_idle: bool) -> Result<Vec<JobSummary>> {
    let scheduler = *cfg.scheduler();

    // Runtime event channel.
    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(scheduler.event_queue_length);

    // Process executor backend (real implementation in production).
    let executor = RealExecutorBackend::new(rt_tx.clone());

    // Ctrl-C → graceful shutdown.
    {
        let tx = rt_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            let _ = tx.send(RuntimeEvent::ShutdownRequested).await;
        });
    }

    let options = RuntimeOptions { exit_when_idle };

    // Construct the pure core runtime (single source of truth for semantics).
    let mut core = CoreRuntime::new(scheduler.resources, options);
    for spec in cfg.into_jobs() {
        let name = spec.name.clone();
        let id = core
            .submit(spec)
            .with_context(|| format!("submitting job '{name}'"))?;
        info!(job = %id, name = %name, "job submitted");
    }

    // Construct the async IO shell around the core.
    let runtime = Runtime::new(core, rt_rx, executor);
    Ok(runtime.run().await?)
}

/// Simple dry-run output: print jobs, tasks, deps and commands.
fn print_dry_run(cfg: &ConfigFile) {
    let scheduler = cfg.scheduler();
    println!("jobflow dry-run");
    println!("  scheduler.resources = {}", scheduler.resources);
    println!(
        "  scheduler.event_queue_length = {}",
        scheduler.event_queue_length
    );
    println!();

    println!("jobs ({}):", cfg.jobs().len());
    for job in cfg.jobs() {
        println!(
            "  - {} (priority: {:?}, kind: {:?}, cancel_on_error: {}, pause_on_error: {})",
            job.name, job.priority, job.kind, job.cancel_on_error, job.pause_on_error
        );
        let graph = JobGraph::from_spec(job);
        let roots: Vec<&str> = graph.roots().collect();
        println!("      roots: {roots:?}");
        for task in job.tasks.iter() {
            println!("      - {}", task.name);
            println!("          cmd: {}", task.cmd);
            if !task.after.is_empty() {
                println!("          after: {:?}", task.after);
            }
            if task.resources != 1 {
                println!("          resources: {}", task.resources);
            }
            if task.precious {
                println!("          precious: true");
            }
            if task.max_executions != 1 {
                println!("          max_executions: {}", task.max_executions);
            }
        }
    }

    debug!("dry-run complete (no execution)");
}

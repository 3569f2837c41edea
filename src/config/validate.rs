// src/config/validate.rs

use crate::config::model::{ConfigFile, RawConfigFile, SchedulerSection};
use crate::dag::JobSpec;
use crate::errors::{JobflowError, Result};
use crate::types::JobId;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = crate::errors::JobflowError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        let jobs = validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw.scheduler, jobs))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<Vec<JobSpec>> {
    ensure_has_jobs(cfg)?;
    validate_scheduler(&cfg.scheduler)?;

    let mut jobs = Vec::with_capacity(cfg.job.len());
    for (name, job) in cfg.job.iter() {
        let spec = job.to_spec(name);
        validate_job(&spec, &cfg.scheduler)?;
        jobs.push(spec);
    }
    Ok(jobs)
}

fn ensure_has_jobs(cfg: &RawConfigFile) -> Result<()> {
    if cfg.job.is_empty() {
        return Err(JobflowError::ConfigError(
            "config must contain at least one [job.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_scheduler(scheduler: &SchedulerSection) -> Result<()> {
    if scheduler.resources == 0 {
        return Err(JobflowError::ConfigError(
            "[scheduler].resources must be >= 1 (got 0)".to_string(),
        ));
    }
    if scheduler.event_queue_length == 0 {
        return Err(JobflowError::ConfigError(
            "[scheduler].event_queue_length must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn validate_job(spec: &JobSpec, scheduler: &SchedulerSection) -> Result<()> {
    for task in spec.tasks.iter() {
        if task.resources > scheduler.resources {
            return Err(JobflowError::ConfigError(format!(
                "task '{}.{}' needs {} resources but the scheduler only has {}",
                spec.name, task.name, task.resources, scheduler.resources
            )));
        }
    }

    // Dependency names, self references and cycles are checked while
    // resolving; the id is a placeholder.
    spec.resolve(JobId(0))?;
    Ok(())
}

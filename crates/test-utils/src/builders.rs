#![allow(dead_code)]

use std::collections::BTreeMap;

use jobflow::config::{ConfigFile, JobConfig, RawConfigFile, SchedulerSection, TaskConfig};
use jobflow::dag::{JobSpec, TaskSpec};
use jobflow::types::{JobKind, JobPriority};

/// Builder for `JobSpec` to simplify test setup.
pub struct JobSpecBuilder {
    spec: JobSpec,
}

impl JobSpecBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            spec: JobSpec::new(name),
        }
    }

    pub fn priority(mut self, priority: JobPriority) -> Self {
        self.spec.priority = priority;
        self
    }

    pub fn single_task(mut self) -> Self {
        self.spec.kind = JobKind::SingleTask;
        self
    }

    pub fn cancel_on_error(mut self, val: bool) -> Self {
        self.spec.cancel_on_error = val;
        self
    }

    pub fn pause_on_error(mut self, val: bool) -> Self {
        self.spec.pause_on_error = val;
        self
    }

    pub fn with_task(mut self, task: TaskSpec) -> Self {
        self.spec.tasks.push(task);
        self
    }

    pub fn build(self) -> JobSpec {
        self.spec
    }
}

/// Builder for `TaskSpec`.
pub struct TaskSpecBuilder {
    task: TaskSpec,
}

impl TaskSpecBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            task: TaskSpec::new(name, format!("echo {name}")),
        }
    }

    pub fn cmd(mut self, cmd: &str) -> Self {
        self.task.cmd = cmd.to_string();
        self
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.task.after.push(dep.to_string());
        self
    }

    pub fn resources(mut self, val: u32) -> Self {
        self.task.resources = val;
        self
    }

    pub fn precious(mut self, val: bool) -> Self {
        self.task.precious = val;
        self
    }

    pub fn max_executions(mut self, val: u32) -> Self {
        self.task.max_executions = val;
        self
    }

    pub fn build(self) -> TaskSpec {
        self.task
    }
}

/// Builder for a validated `ConfigFile`.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                scheduler: SchedulerSection::default(),
                job: BTreeMap::new(),
            },
        }
    }

    pub fn resources(mut self, val: u32) -> Self {
        self.config.scheduler.resources = val;
        self
    }

    /// Add a job; tasks are taken from `spec` and keyed by name.
    pub fn with_job(mut self, spec: JobSpec) -> Self {
        let task = spec
            .tasks
            .into_iter()
            .map(|t| {
                (
                    t.name,
                    TaskConfig {
                        cmd: t.cmd,
                        after: t.after,
                        resources: t.resources,
                        precious: t.precious,
                        max_executions: t.max_executions,
                    },
                )
            })
            .collect();
        self.config.job.insert(
            spec.name,
            JobConfig {
                priority: spec.priority,
                kind: spec.kind,
                cancel_on_error: spec.cancel_on_error,
                pause_on_error: spec.pause_on_error,
                task,
            },
        );
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

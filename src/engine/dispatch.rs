// src/engine/dispatch.rs

//! Resource-aware dispatch pass across jobs.

use tracing::{debug, info, trace};

use crate::dag::{EligibleTask, TaskDescriptor};
use crate::engine::jobs::JobTable;
use crate::engine::queue::ReadyQueue;
use crate::errors::Result;
use crate::types::{JobStatus, TaskId, TaskStatus};

/// A task handed to the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledTask {
    pub id: TaskId,
    pub job_name: String,
    pub name: String,
    pub cmd: String,
    pub resources: u32,
    /// How many times the dispatcher has considered this task, this start
    /// included.
    pub attempt: u32,
}

impl ScheduledTask {
    fn from_descriptor(job_name: &str, task: &TaskDescriptor) -> Self {
        let node = task.node();
        Self {
            id: node.id,
            job_name: job_name.to_string(),
            name: node.name.clone(),
            cmd: node.cmd.clone(),
            resources: node.resources_needed,
            attempt: task.attempts(),
        }
    }
}

/// Extra predicate on eligible tasks, consulted before a task is started.
///
/// The view borrows the job's live arena entry, so parents, children and
/// attempt counts seen here are current.
pub trait SelectionFilter: Send {
    fn accepts(&self, task: EligibleTask<'_>) -> bool;
}

/// Filter that lets every task through.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl SelectionFilter for AcceptAll {
    fn accepts(&self, _task: EligibleTask<'_>) -> bool {
        true
    }
}

/// Tracks the worker slots and starts eligible tasks that fit in them.
pub struct Dispatcher {
    total: u32,
    free: u32,
    filter: Box<dyn SelectionFilter>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("total", &self.total)
            .field("free", &self.free)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(resources: u32) -> Self {
        Self::with_filter(resources, Box::new(AcceptAll))
    }

    pub fn with_filter(resources: u32, filter: Box<dyn SelectionFilter>) -> Self {
        Self {
            total: resources,
            free: resources,
            filter,
        }
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn free(&self) -> u32 {
        self.free
    }

    /// Give back the slots of a task that stopped running.
    pub fn release(&mut self, resources: u32) {
        self.free = (self.free + resources).min(self.total);
        trace!(released = resources, free = self.free, "worker slots released");
    }

    /// Start as many eligible tasks as the free slots allow.
    ///
    /// Jobs are visited in ready-queue order and each job's eligible tasks
    /// in id order. A task that needs more slots than are free is skipped
    /// for this pass so smaller tasks behind it can still start.
    pub fn dispatch(
        &mut self,
        jobs: &mut JobTable,
        ready: &mut ReadyQueue,
    ) -> Result<Vec<ScheduledTask>> {
        let mut scheduled = Vec::new();
        let order: Vec<_> = ready.iter().collect();

        for job_id in order {
            if self.free == 0 {
                break;
            }
            let Some(job) = jobs.get_mut(job_id) else {
                ready.remove(job_id);
                continue;
            };

            // Select against a local budget first, then apply the moves.
            let mut budget = self.free;
            let mut considered = Vec::new();
            let mut selected = Vec::new();
            for task in job.descriptor.eligible_tasks() {
                if budget == 0 {
                    break;
                }
                considered.push(task.id());
                let needed = task.resources_needed();
                if needed > budget {
                    trace!(task = %task.id(), needed, free = budget, "task does not fit; skipped");
                    continue;
                }
                if !self.filter.accepts(task) {
                    trace!(task = %task.id(), "task rejected by selection filter");
                    continue;
                }
                budget -= needed;
                selected.push((task.id(), needed));
            }

            for task in considered {
                job.descriptor.record_attempt(task)?;
            }

            for (task, needed) in selected {
                job.descriptor.start(task)?;
                self.free -= needed;
                job.set_task_status(task, TaskStatus::Running);
                if job.status == JobStatus::Pending {
                    job.status = JobStatus::Running;
                    info!(job = %job_id, name = %job.spec.name, "job started");
                }

                let scheduled_task =
                    ScheduledTask::from_descriptor(&job.spec.name, job.descriptor.task(task)?);
                debug!(
                    task = %task,
                    name = %scheduled_task.name,
                    resources = needed,
                    attempt = scheduled_task.attempt,
                    "task dispatched"
                );
                scheduled.push(scheduled_task);
            }

            ready.refresh(&job.descriptor);
        }

        Ok(scheduled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::{JobSpec, TaskSpec};
    use crate::types::{JobId, JobPriority};

    fn spec(name: &str, priority: JobPriority, tasks: &[(&str, u32)]) -> JobSpec {
        let mut spec = JobSpec::new(name);
        spec.priority = priority;
        for (task, resources) in tasks {
            let mut t = TaskSpec::new(*task, "true");
            t.resources = *resources;
            spec.tasks.push(t);
        }
        spec
    }

    fn submit(jobs: &mut JobTable, ready: &mut ReadyQueue, spec: JobSpec) {
        let id = jobs.submit(spec).unwrap();
        ready.refresh(&jobs.get(id).unwrap().descriptor);
    }

    #[test]
    fn higher_priority_jobs_are_served_first() {
        let mut jobs = JobTable::new();
        let mut ready = ReadyQueue::new();
        submit(&mut jobs, &mut ready, spec("low", JobPriority::Low, &[("a", 1)]));
        submit(&mut jobs, &mut ready, spec("high", JobPriority::High, &[("b", 1)]));

        let mut dispatcher = Dispatcher::new(1);
        let started = dispatcher.dispatch(&mut jobs, &mut ready).unwrap();

        assert_eq!(started.len(), 1);
        assert_eq!(started[0].job_name, "high");
        assert_eq!(dispatcher.free(), 0);
        assert_eq!(ready.iter().count(), 1);
    }

    #[test]
    fn oversized_tasks_do_not_block_smaller_ones() {
        let mut jobs = JobTable::new();
        let mut ready = ReadyQueue::new();
        submit(&mut jobs, &mut ready, spec("j", JobPriority::Normal, &[("big", 3), ("small", 1)]));

        let mut dispatcher = Dispatcher::new(2);
        let started = dispatcher.dispatch(&mut jobs, &mut ready).unwrap();

        assert_eq!(started.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(), vec!["small"]);
        assert_eq!(dispatcher.free(), 1);

        // The skipped task was still considered.
        let job = jobs.iter().next().unwrap();
        let big = job.descriptor.tasks().find(|t| t.name() == "big").unwrap();
        assert_eq!(big.attempts(), 1);
    }

    #[test]
    fn filters_can_hold_tasks_back() {
        struct OnlyNamed(&'static str);
        impl SelectionFilter for OnlyNamed {
            fn accepts(&self, task: EligibleTask<'_>) -> bool {
                task.name() == self.0
            }
        }

        let mut jobs = JobTable::new();
        let mut ready = ReadyQueue::new();
        submit(&mut jobs, &mut ready, spec("j", JobPriority::Normal, &[("a", 1), ("b", 1)]));

        let mut dispatcher = Dispatcher::with_filter(4, Box::new(OnlyNamed("b")));
        let started = dispatcher.dispatch(&mut jobs, &mut ready).unwrap();
        assert_eq!(started.len(), 1);
        assert_eq!(started[0].name, "b");
        assert!(!ready.is_empty());
    }

    #[test]
    fn filters_see_live_links_of_promoted_tasks() {
        struct JoinsOnly;
        impl SelectionFilter for JoinsOnly {
            fn accepts(&self, task: EligibleTask<'_>) -> bool {
                task.parents().len() > 1 && task.unmet_parent_count() == 0
            }
        }

        let mut spec = spec("j", JobPriority::Normal, &[("a", 1), ("b", 1), ("join", 1)]);
        spec.tasks[2].after = vec!["a".into(), "b".into()];
        let mut jobs = JobTable::new();
        let mut ready = ReadyQueue::new();
        submit(&mut jobs, &mut ready, spec);

        let mut dispatcher = Dispatcher::with_filter(4, Box::new(JoinsOnly));
        assert!(dispatcher.dispatch(&mut jobs, &mut ready).unwrap().is_empty());

        let job = jobs.get_mut(JobId(0)).unwrap();
        for index in 0..2 {
            let id = TaskId::new(job.id(), index);
            job.descriptor.start(id).unwrap();
            job.descriptor.terminate(id).unwrap();
        }
        ready.refresh(&job.descriptor);

        let started = dispatcher.dispatch(&mut jobs, &mut ready).unwrap();
        assert_eq!(started.len(), 1);
        assert_eq!(started[0].name, "join");
        assert_eq!(started[0].attempt, 1);
    }

    #[test]
    fn released_slots_never_exceed_the_total() {
        let mut dispatcher = Dispatcher::new(2);
        dispatcher.release(5);
        assert_eq!(dispatcher.free(), 2);
        assert_eq!(dispatcher.total(), 2);
    }
}

// src/engine/queue.rs

use std::collections::{BTreeSet, HashMap};

use tracing::trace;

use crate::dag::{DispatchKey, JobDescriptor};
use crate::types::JobId;

/// Index of the jobs that currently have at least one eligible task.
///
/// Semantics:
/// - Jobs are ordered by priority (highest first), then by submission order,
///   so [`first`](Self::first) is the job the dispatcher should serve next.
/// - The queue only mirrors descriptors; the core calls
///   [`refresh`](Self::refresh) after every mutation of a job so that the
///   entry appears when eligible work shows up and disappears when it runs
///   out. Insert, remove and `first` are O(log N) over the active jobs.
/// - A job without eligible work is skipped rather than blocking the ones
///   behind it, so lower priorities are served whenever higher ones have
///   nothing to offer.
#[derive(Debug, Default)]
pub struct ReadyQueue {
    ordered: BTreeSet<DispatchKey>,
    /// Key each queued job was inserted under, to find it again after its
    /// priority changed.
    keys: HashMap<JobId, DispatchKey>,
}

impl ReadyQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if no job has eligible work.
    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn contains(&self, job: JobId) -> bool {
        self.keys.contains_key(&job)
    }

    /// Re-synchronise the entry of `job` with its descriptor.
    pub fn refresh(&mut self, job: &JobDescriptor) {
        let id = job.id();
        self.remove(id);

        if job.has_eligible() {
            let key = job.dispatch_key();
            self.ordered.insert(key);
            self.keys.insert(id, key);
            trace!(job = %id, priority = ?job.priority(), "job queued for dispatch");
        }
    }

    /// Drop `job` from the queue (no-op if absent).
    pub fn remove(&mut self, job: JobId) {
        if let Some(key) = self.keys.remove(&job) {
            self.ordered.remove(&key);
        }
    }

    /// Highest-priority job with eligible work.
    pub fn first(&self) -> Option<JobId> {
        self.ordered.first().map(|(_, id)| *id)
    }

    /// Jobs with eligible work in dispatch order.
    pub fn iter(&self) -> impl Iterator<Item = JobId> + '_ {
        self.ordered.iter().map(|(_, id)| *id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::TaskNode;
    use crate::types::{JobKind, JobPriority, TaskId};

    fn job(id: u64, priority: JobPriority) -> JobDescriptor {
        JobDescriptor::build(
            JobId(id),
            priority,
            JobKind::SingleTask,
            vec![TaskNode::new(TaskId::new(JobId(id), 0), "t")],
        )
        .unwrap()
    }

    #[test]
    fn serves_highest_priority_then_oldest() {
        let mut q = ReadyQueue::new();
        q.refresh(&job(1, JobPriority::Normal));
        q.refresh(&job(2, JobPriority::Highest));
        q.refresh(&job(3, JobPriority::Normal));

        assert_eq!(q.first(), Some(JobId(2)));
        assert_eq!(q.iter().collect::<Vec<_>>(), vec![JobId(2), JobId(1), JobId(3)]);
    }

    #[test]
    fn jobs_without_eligible_work_leave_the_queue() {
        let mut q = ReadyQueue::new();
        let mut j = job(1, JobPriority::High);
        q.refresh(&j);
        assert!(q.contains(JobId(1)));

        j.start(TaskId::new(JobId(1), 0)).unwrap();
        q.refresh(&j);
        assert!(q.is_empty());
        assert_eq!(q.first(), None);
    }

    #[test]
    fn priority_change_moves_the_job() {
        let mut q = ReadyQueue::new();
        let mut low = job(1, JobPriority::Low);
        q.refresh(&low);
        q.refresh(&job(2, JobPriority::Normal));
        assert_eq!(q.first(), Some(JobId(2)));

        low.set_priority(JobPriority::Highest);
        q.refresh(&low);
        assert_eq!(q.first(), Some(JobId(1)));
        assert_eq!(q.len(), 2);
    }
}

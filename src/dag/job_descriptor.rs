// src/dag/job_descriptor.rs

//! Live scheduling state of one job.
//!
//! A [`JobDescriptor`] owns an arena of [`TaskDescriptor`]s indexed by
//! [`TaskId`] and three partitions (eligible, running, paused) holding ids
//! into that arena. Tasks outside every partition are either blocked on a
//! parent or done.
//!
//! Every transition checks its precondition first and then performs a single
//! partition move, so a rejected call leaves the descriptor untouched.

use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeSet, HashMap};

use tracing::{debug, trace, warn};

use crate::dag::task_descriptor::{EligibleTask, Membership, TaskDescriptor};
use crate::dag::task_node::TaskNode;
use crate::errors::{JobflowError, Result};
use crate::types::{JobId, JobKind, JobPriority, TaskId, TaskStatus};

/// Sort key used to order jobs for dispatch: higher priority first, then
/// submission order.
pub type DispatchKey = (Reverse<JobPriority>, JobId);

/// Number of tasks in each partition (plus the two "outside" states).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PartitionCounts {
    pub blocked: usize,
    pub eligible: usize,
    pub running: usize,
    pub paused: usize,
    pub done: usize,
}

impl PartitionCounts {
    pub fn total(&self) -> usize {
        self.blocked + self.eligible + self.running + self.paused + self.done
    }
}

/// Comparable picture of a descriptor's membership and counters.
///
/// Two descriptors with equal snapshots offer the same tasks now and will
/// promote the same children on every future `terminate`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionSnapshot {
    pub eligible: Vec<TaskId>,
    pub running: Vec<TaskId>,
    pub paused: Vec<TaskId>,
    pub unmet_parent_counts: Vec<u32>,
    pub children_remaining: Vec<u32>,
}

#[derive(Debug, Clone)]
pub struct JobDescriptor {
    id: JobId,
    priority: JobPriority,
    kind: JobKind,
    tasks: Vec<TaskDescriptor>,
    eligible: BTreeSet<TaskId>,
    running: BTreeSet<TaskId>,
    paused: BTreeSet<TaskId>,
    done: usize,
    failed: bool,
}

impl JobDescriptor {
    /// Materialise the dependency tree of a job.
    ///
    /// `nodes` must be in id order (`nodes[i].id.index == i`) and belong to
    /// `id`. For task-flow jobs every declared dependency becomes a
    /// parent/child link and tasks without parents start eligible. For
    /// single-task jobs every task starts eligible and no links are made.
    ///
    /// No cycle detection happens here; tasks on a cycle simply never
    /// become eligible.
    pub fn build(
        id: JobId,
        priority: JobPriority,
        kind: JobKind,
        nodes: Vec<TaskNode>,
    ) -> Result<Self> {
        for (pos, node) in nodes.iter().enumerate() {
            if node.id.job != id || node.id.slot() != pos {
                return Err(JobflowError::ConfigError(format!(
                    "task '{}' has id {} but is declared at position {} of {}",
                    node.name, node.id, pos, id
                )));
            }
            if kind == JobKind::TaskFlow {
                for dep in &node.dependencies {
                    if dep.job != id || dep.slot() >= nodes.len() {
                        return Err(JobflowError::TaskNotFound(*dep));
                    }
                }
            }
        }

        let mut tasks: Vec<TaskDescriptor> = nodes.into_iter().map(TaskDescriptor::new).collect();

        if kind == JobKind::TaskFlow {
            for slot in 0..tasks.len() {
                let child = tasks[slot].id();
                let deps = tasks[slot].node().dependencies.clone();
                for parent in deps {
                    tasks[slot].add_parent(parent);
                    tasks[parent.slot()].add_child(child);
                }
            }
        }

        let mut eligible = BTreeSet::new();
        for task in tasks.iter_mut() {
            if task.unmet_parent_count == 0 {
                task.membership = Membership::Eligible;
                eligible.insert(task.id());
            }
        }

        debug!(
            job = %id,
            ?kind,
            tasks = tasks.len(),
            eligible = eligible.len(),
            "job descriptor built"
        );

        Ok(Self {
            id,
            priority,
            kind,
            tasks,
            eligible,
            running: BTreeSet::new(),
            paused: BTreeSet::new(),
            done: 0,
            failed: false,
        })
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn priority(&self) -> JobPriority {
        self.priority
    }

    pub fn set_priority(&mut self, priority: JobPriority) {
        self.priority = priority;
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    pub fn total_task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn dispatch_key(&self) -> DispatchKey {
        (Reverse(self.priority), self.id)
    }

    /// Whether `fail` (or `teardown`) has been applied.
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// All tasks in id order.
    pub fn tasks(&self) -> impl Iterator<Item = &TaskDescriptor> {
        self.tasks.iter()
    }

    pub fn task(&self, id: TaskId) -> Result<&TaskDescriptor> {
        if id.job != self.id {
            return Err(JobflowError::TaskNotFound(id));
        }
        self.tasks
            .get(id.slot())
            .ok_or(JobflowError::TaskNotFound(id))
    }

    fn task_mut(&mut self, id: TaskId) -> Result<&mut TaskDescriptor> {
        if id.job != self.id {
            return Err(JobflowError::TaskNotFound(id));
        }
        self.tasks
            .get_mut(id.slot())
            .ok_or(JobflowError::TaskNotFound(id))
    }

    pub fn membership_of(&self, id: TaskId) -> Result<Membership> {
        Ok(self.task(id)?.membership)
    }

    /// Ids of the eligible partition. Constant time; iterate between event
    /// steps only.
    pub fn eligible_ids(&self) -> &BTreeSet<TaskId> {
        &self.eligible
    }

    pub fn running_ids(&self) -> &BTreeSet<TaskId> {
        &self.running
    }

    pub fn paused_ids(&self) -> &BTreeSet<TaskId> {
        &self.paused
    }

    pub fn has_eligible(&self) -> bool {
        !self.eligible.is_empty()
    }

    /// Eligible tasks in id order, as views over the arena entries.
    pub fn eligible_tasks(&self) -> impl Iterator<Item = EligibleTask<'_>> {
        self.eligible
            .iter()
            .map(move |id| EligibleTask::new(&self.tasks[id.slot()]))
    }

    pub fn counts(&self) -> PartitionCounts {
        let blocked = self
            .tasks
            .iter()
            .filter(|t| t.membership == Membership::Blocked)
            .count();
        PartitionCounts {
            blocked,
            eligible: self.eligible.len(),
            running: self.running.len(),
            paused: self.paused.len(),
            done: self.done,
        }
    }

    /// Every task has terminated (or was abandoned).
    pub fn is_complete(&self) -> bool {
        self.done == self.tasks.len()
    }

    pub fn snapshot(&self) -> PartitionSnapshot {
        PartitionSnapshot {
            eligible: self.eligible.iter().copied().collect(),
            running: self.running.iter().copied().collect(),
            paused: self.paused.iter().copied().collect(),
            unmet_parent_counts: self.tasks.iter().map(|t| t.unmet_parent_count).collect(),
            children_remaining: self.tasks.iter().map(|t| t.children_remaining).collect(),
        }
    }

    /// Whether any task declared a dependency on `id`.
    pub fn has_children(&self, id: TaskId) -> Result<bool> {
        Ok(!self.task(id)?.children.is_empty())
    }

    /// Whether nothing downstream still waits on the result of `id`.
    pub fn result_releasable(&self, id: TaskId) -> Result<bool> {
        Ok(self.task(id)?.children_remaining == 0)
    }

    /// Count one more dispatch attempt for an eligible task.
    pub fn record_attempt(&mut self, id: TaskId) -> Result<u32> {
        let task = self.task_mut(id)?;
        task.attempts += 1;
        Ok(task.attempts)
    }

    /// Eligible -> running.
    pub fn start(&mut self, id: TaskId) -> Result<()> {
        self.move_task(id, Membership::Eligible, Membership::Running)
    }

    /// Eligible -> paused. Running tasks are left to finish.
    pub fn pause(&mut self, id: TaskId) -> Result<()> {
        self.move_task(id, Membership::Eligible, Membership::Paused)
    }

    /// Paused -> eligible.
    pub fn resume(&mut self, id: TaskId) -> Result<()> {
        if self.failed {
            return Err(JobflowError::ContractViolation {
                task: id,
                expected: "paused task of a live job",
                actual: "failed job",
            });
        }
        self.move_task(id, Membership::Paused, Membership::Eligible)
    }

    /// Running -> eligible, for a task that must be executed again.
    ///
    /// The task is not re-wired: its parents have all terminated already.
    pub fn restart(&mut self, id: TaskId) -> Result<()> {
        self.move_task(id, Membership::Running, Membership::Eligible)
    }

    /// Running -> paused, for a task that failed for good in a job that
    /// holds failed tasks for inspection instead of going on without them.
    pub fn pause_on_error(&mut self, id: TaskId) -> Result<()> {
        self.move_task(id, Membership::Running, Membership::Paused)
    }

    /// Running -> done, promoting direct children whose last unmet parent
    /// this was.
    ///
    /// Returns the children that became eligible, in child order. Only
    /// direct children are visited; grandchildren are released when their
    /// own parents terminate.
    pub fn terminate(&mut self, id: TaskId) -> Result<Vec<TaskId>> {
        self.finish_task(id, Membership::Running)
    }

    /// Paused -> done for a task held after a failure: it is given up on
    /// and its children are released as if it had terminated.
    pub fn terminate_in_error(&mut self, id: TaskId) -> Result<Vec<TaskId>> {
        self.finish_task(id, Membership::Paused)
    }

    /// Terminate a single task wherever it waits: eligible, running or
    /// paused. Blocked and done tasks are rejected.
    pub fn kill(&mut self, id: TaskId) -> Result<Vec<TaskId>> {
        let from = self.membership_of(id)?;
        match from {
            Membership::Eligible | Membership::Running | Membership::Paused => {
                self.finish_task(id, from)
            }
            Membership::Blocked | Membership::Done => Err(JobflowError::ContractViolation {
                task: id,
                expected: "eligible, running or paused",
                actual: from.as_str(),
            }),
        }
    }

    fn finish_task(&mut self, id: TaskId, from: Membership) -> Result<Vec<TaskId>> {
        self.move_task(id, from, Membership::Done)?;

        let mut promoted = Vec::new();
        if self.kind != JobKind::TaskFlow {
            return Ok(promoted);
        }

        let slot = id.slot();
        let children = self.tasks[slot].children.clone();
        for child in children {
            let desc = &mut self.tasks[child.slot()];
            desc.unmet_parent_count = desc.unmet_parent_count.saturating_sub(1);
            if desc.unmet_parent_count == 0 {
                if desc.membership == Membership::Blocked {
                    desc.membership = Membership::Eligible;
                    self.eligible.insert(child);
                    promoted.push(child);
                    trace!(job = %self.id, task = %child, "child promoted to eligible");
                } else {
                    warn!(
                        job = %self.id,
                        task = %child,
                        membership = desc.membership.as_str(),
                        "child reached zero unmet parents outside the blocked state"
                    );
                }
            }
        }

        let parents = self.tasks[slot].parents.clone();
        for parent in parents {
            let desc = &mut self.tasks[parent.slot()];
            desc.children_remaining = desc.children_remaining.saturating_sub(1);
        }

        debug!(
            job = %self.id,
            task = %id,
            from = from.as_str(),
            promoted = promoted.len(),
            "task terminated"
        );
        Ok(promoted)
    }

    /// Abandon all pending work: empties `eligible` and `running`.
    ///
    /// Paused tasks are kept; use [`teardown`](Self::teardown) to empty
    /// every partition. Returns the ids that were running so their workers
    /// can be stopped.
    pub fn fail(&mut self) -> Vec<TaskId> {
        self.failed = true;

        let eligible = std::mem::take(&mut self.eligible);
        let running = std::mem::take(&mut self.running);
        for id in eligible.iter().chain(running.iter()) {
            self.tasks[id.slot()].membership = Membership::Done;
        }
        self.done += eligible.len() + running.len();

        debug!(
            job = %self.id,
            eligible = eligible.len(),
            running = running.len(),
            "job descriptor failed"
        );
        running.into_iter().collect()
    }

    /// Full teardown for a failed, canceled or killed job: every partition
    /// is emptied and blocked tasks are marked done as well.
    pub fn teardown(&mut self) -> Vec<TaskId> {
        let running = self.fail();

        let paused = std::mem::take(&mut self.paused);
        for id in &paused {
            self.tasks[id.slot()].membership = Membership::Done;
        }
        self.done += paused.len();

        let mut blocked = 0;
        for task in self.tasks.iter_mut() {
            if task.membership == Membership::Blocked {
                task.membership = Membership::Done;
                blocked += 1;
            }
        }
        self.done += blocked;

        debug!(
            job = %self.id,
            paused = paused.len(),
            blocked,
            "job descriptor torn down"
        );
        running
    }

    /// Bulk reconciliation after a job-level pause or resume.
    ///
    /// `Paused` moves eligible -> paused; `Pending`/`Submitted` moves
    /// paused -> eligible. Tasks not in the source partition (for instance
    /// running ones) and unknown ids are left alone. Returns how many tasks
    /// moved.
    pub fn apply_task_state_changes(&mut self, states: &HashMap<TaskId, TaskStatus>) -> usize {
        let mut ids: Vec<(&TaskId, &TaskStatus)> = states.iter().collect();
        ids.sort_by_key(|(id, _)| **id);

        let mut moved = 0;
        for (id, status) in ids {
            let Ok(membership) = self.membership_of(*id) else {
                continue;
            };
            let result = match (status, membership) {
                (TaskStatus::Paused, Membership::Eligible) => self.pause(*id),
                (TaskStatus::Pending | TaskStatus::Submitted, Membership::Paused)
                    if !self.failed =>
                {
                    self.resume(*id)
                }
                _ => continue,
            };
            if result.is_ok() {
                moved += 1;
            }
        }

        debug!(job = %self.id, moved, "applied task state changes");
        moved
    }

    fn move_task(&mut self, id: TaskId, from: Membership, to: Membership) -> Result<()> {
        let job = self.id;
        let task = self.task_mut(id)?;
        if task.membership != from {
            return Err(JobflowError::ContractViolation {
                task: id,
                expected: from.as_str(),
                actual: task.membership.as_str(),
            });
        }
        task.membership = to;

        match from {
            Membership::Eligible => self.eligible.remove(&id),
            Membership::Running => self.running.remove(&id),
            Membership::Paused => self.paused.remove(&id),
            Membership::Blocked | Membership::Done => true,
        };
        match to {
            Membership::Eligible => {
                self.eligible.insert(id);
            }
            Membership::Running => {
                self.running.insert(id);
            }
            Membership::Paused => {
                self.paused.insert(id);
            }
            Membership::Done => self.done += 1,
            Membership::Blocked => {}
        }

        trace!(
            job = %job,
            task = %id,
            from = from.as_str(),
            to = to.as_str(),
            "task moved"
        );
        Ok(())
    }
}

impl PartialEq for JobDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for JobDescriptor {}

impl PartialOrd for JobDescriptor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Dispatch order: higher priority first, earlier submission on ties.
impl Ord for JobDescriptor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.dispatch_key().cmp(&other.dispatch_key())
    }
}

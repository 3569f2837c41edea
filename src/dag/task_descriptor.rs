// src/dag/task_descriptor.rs

//! Mutable scheduling links of a task inside its job's arena.

use std::hash::{Hash, Hasher};
use std::ops::Deref;

use crate::dag::task_node::TaskNode;
use crate::types::TaskId;

/// Which partition of its job a task currently belongs to.
///
/// `Blocked` and `Done` are both "outside every partition"; they are kept
/// apart so that counts and diagnostics can tell waiting tasks from finished
/// ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Membership {
    /// Waiting on at least one parent.
    Blocked,
    Eligible,
    Running,
    Paused,
    /// Terminated, or abandoned by a failed job.
    Done,
}

impl Membership {
    pub fn as_str(self) -> &'static str {
        match self {
            Membership::Blocked => "blocked",
            Membership::Eligible => "eligible",
            Membership::Running => "running",
            Membership::Paused => "paused",
            Membership::Done => "done",
        }
    }
}

/// One task plus its links into the job's dependency graph.
///
/// Parents and children are stored as ids into the owning
/// [`JobDescriptor`](super::JobDescriptor)'s arena, so a descriptor is never
/// copied when it changes partition.
#[derive(Debug, Clone)]
pub struct TaskDescriptor {
    node: TaskNode,
    pub(crate) parents: Vec<TaskId>,
    pub(crate) children: Vec<TaskId>,
    /// Parents that have not terminated yet.
    pub(crate) unmet_parent_count: u32,
    /// Children that have not terminated yet.
    pub(crate) children_remaining: u32,
    pub(crate) membership: Membership,
    /// How many times a dispatch pass has considered this task.
    pub(crate) attempts: u32,
}

impl TaskDescriptor {
    pub(crate) fn new(node: TaskNode) -> Self {
        Self {
            node,
            parents: Vec::new(),
            children: Vec::new(),
            unmet_parent_count: 0,
            children_remaining: 0,
            membership: Membership::Blocked,
            attempts: 0,
        }
    }

    pub fn id(&self) -> TaskId {
        self.node.id
    }

    pub fn node(&self) -> &TaskNode {
        &self.node
    }

    pub fn name(&self) -> &str {
        &self.node.name
    }

    pub fn resources_needed(&self) -> u32 {
        self.node.resources_needed
    }

    pub fn parents(&self) -> &[TaskId] {
        &self.parents
    }

    pub fn children(&self) -> &[TaskId] {
        &self.children
    }

    pub fn unmet_parent_count(&self) -> u32 {
        self.unmet_parent_count
    }

    pub fn children_remaining(&self) -> u32 {
        self.children_remaining
    }

    pub fn membership(&self) -> Membership {
        self.membership
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub(crate) fn add_parent(&mut self, parent: TaskId) {
        self.parents.push(parent);
        self.unmet_parent_count += 1;
    }

    pub(crate) fn add_child(&mut self, child: TaskId) {
        self.children.push(child);
        self.children_remaining += 1;
    }
}

impl PartialEq for TaskDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for TaskDescriptor {}

impl Hash for TaskDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

/// Read-only view of a descriptor known to be in the eligible partition.
///
/// This borrows the arena entry itself, so links seen through it are always
/// the live ones.
#[derive(Debug, Clone, Copy)]
pub struct EligibleTask<'a> {
    descriptor: &'a TaskDescriptor,
}

impl<'a> EligibleTask<'a> {
    pub(crate) fn new(descriptor: &'a TaskDescriptor) -> Self {
        debug_assert_eq!(descriptor.membership, Membership::Eligible);
        Self { descriptor }
    }

    pub fn descriptor(&self) -> &'a TaskDescriptor {
        self.descriptor
    }
}

impl Deref for EligibleTask<'_> {
    type Target = TaskDescriptor;

    fn deref(&self) -> &Self::Target {
        self.descriptor
    }
}

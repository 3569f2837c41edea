// src/dag/mod.rs

//! Job/task dependency-graph scheduling engine.
//!
//! - [`spec`] is the submission model (tasks and dependencies by name).
//! - [`graph`] checks a submission's name-level graph (references, cycles).
//! - [`task_node`] holds a task's immutable attributes once ids are assigned.
//! - [`task_descriptor`] adds the mutable links and partition membership.
//! - [`job_descriptor`] owns a job's descriptors and its eligible, running
//!   and paused partitions.
//! - [`recovery`] rebuilds descriptors from persisted task statuses.

pub mod graph;
pub mod job_descriptor;
pub mod recovery;
pub mod spec;
pub mod task_descriptor;
pub mod task_node;

pub use graph::JobGraph;
pub use job_descriptor::{DispatchKey, JobDescriptor, PartitionCounts, PartitionSnapshot};
pub use recovery::{
    rebuild_from_persisted_tasks, InMemoryRecoverySource, PersistedJob, RecoverySource,
};
pub use spec::{JobSpec, TaskSpec};
pub use task_descriptor::{EligibleTask, Membership, TaskDescriptor};
pub use task_node::TaskNode;

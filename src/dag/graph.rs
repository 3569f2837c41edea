// src/dag/graph.rs

use std::collections::HashMap;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::dag::spec::JobSpec;
use crate::errors::{JobflowError, Result};

/// Internal node structure: stores immediate deps and dependents.
#[derive(Debug, Clone)]
struct DagNode {
    /// Direct dependencies: tasks that must terminate before this one can run.
    deps: Vec<String>,
    /// Direct dependents: tasks that depend on this one.
    dependents: Vec<String>,
}

/// Name-level view of a submitted job's task graph.
///
/// Used before ids exist: to check references and acyclicity of a
/// submission, and for dry-run output. The live graph is the
/// [`JobDescriptor`](super::JobDescriptor).
#[derive(Debug, Clone)]
pub struct JobGraph {
    order: Vec<String>,
    nodes: HashMap<String, DagNode>,
}

impl JobGraph {
    /// Build the adjacency of a job. Unknown `after` names are kept as
    /// dangling dependencies and reported by [`check`](Self::check).
    pub fn from_spec(spec: &JobSpec) -> Self {
        let mut nodes: HashMap<String, DagNode> = HashMap::new();
        let mut order = Vec::with_capacity(spec.tasks.len());

        // First pass: create nodes with their dependency lists.
        for task in &spec.tasks {
            order.push(task.name.clone());
            nodes.insert(
                task.name.clone(),
                DagNode {
                    deps: task.after.clone(),
                    dependents: Vec::new(),
                },
            );
        }

        // Second pass: populate dependents based on deps.
        for task in &spec.tasks {
            for dep in &task.after {
                if let Some(dep_node) = nodes.get_mut(dep) {
                    dep_node.dependents.push(task.name.clone());
                }
            }
        }

        Self { order, nodes }
    }

    /// Task names in declaration order.
    pub fn tasks(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(|s| s.as_str())
    }

    /// Immediate dependencies of a task (the tasks listed in its `after`).
    pub fn dependencies_of(&self, name: &str) -> &[String] {
        self.nodes
            .get(name)
            .map(|n| n.deps.as_slice())
            .unwrap_or(&[])
    }

    /// Immediate dependents of a task (tasks that list this one in their `after`).
    pub fn dependents_of(&self, name: &str) -> &[String] {
        self.nodes
            .get(name)
            .map(|n| n.dependents.as_slice())
            .unwrap_or(&[])
    }

    /// Tasks without dependencies.
    pub fn roots(&self) -> impl Iterator<Item = &str> {
        self.tasks()
            .filter(|name| self.dependencies_of(name).is_empty())
    }

    /// Reject unknown or self references and cycles.
    pub fn check(&self, job: &str) -> Result<()> {
        for name in &self.order {
            for dep in self.dependencies_of(name) {
                if dep == name {
                    return Err(JobflowError::ConfigError(format!(
                        "task '{job}.{name}' cannot depend on itself in `after`"
                    )));
                }
                if !self.nodes.contains_key(dep) {
                    return Err(JobflowError::ConfigError(format!(
                        "task '{job}.{name}' has unknown dependency '{dep}' in `after`"
                    )));
                }
            }
        }

        // Edge direction: dep -> task.
        let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
        for name in &self.order {
            graph.add_node(name.as_str());
        }
        for name in &self.order {
            for dep in self.dependencies_of(name) {
                graph.add_edge(dep.as_str(), name.as_str(), ());
            }
        }

        // A topological sort will fail if there is a cycle.
        match toposort(&graph, None) {
            Ok(_order) => Ok(()),
            Err(cycle) => Err(JobflowError::DagCycle(format!(
                "cycle detected in job '{}' involving task '{}'",
                job,
                cycle.node_id()
            ))),
        }
    }
}

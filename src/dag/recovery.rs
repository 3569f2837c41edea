// src/dag/recovery.rs

//! Rebuilding job descriptors from persisted task statuses after a restart.
//!
//! Recovery is a replay, not a separate algorithm: the job graph is built
//! fresh and every task persisted as terminated is started and terminated
//! again through the ordinary transitions. Termination only decrements
//! counters, so the order of replay does not change the outcome as long as
//! each task is terminated after its parents.

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, info};

use crate::dag::job_descriptor::JobDescriptor;
use crate::dag::spec::JobSpec;
use crate::dag::task_descriptor::Membership;
use crate::errors::{JobflowError, Result};
use crate::result::TaskResult;
use crate::types::{JobId, JobStatus, TaskId, TaskStatus};

/// Everything the persistence layer kept about an active job.
#[derive(Debug, Clone)]
pub struct PersistedJob {
    pub id: JobId,
    pub spec: JobSpec,
    pub status: JobStatus,
    /// Last known status per task name; missing tasks count as `Submitted`.
    pub statuses: HashMap<String, TaskStatus>,
    /// Results already collected, by task name.
    pub results: BTreeMap<String, TaskResult>,
    /// Executions already consumed, by task name.
    pub executions: HashMap<String, u32>,
}

impl PersistedJob {
    pub fn new(id: JobId, spec: JobSpec) -> Self {
        Self {
            id,
            spec,
            status: JobStatus::Pending,
            statuses: HashMap::new(),
            results: BTreeMap::new(),
            executions: HashMap::new(),
        }
    }

    pub fn with_status(mut self, task: &str, status: TaskStatus) -> Self {
        self.statuses.insert(task.to_string(), status);
        self
    }
}

/// Source of jobs to recover at startup (a database in production).
pub trait RecoverySource {
    fn load_active_jobs(&self) -> Result<Vec<PersistedJob>>;
}

/// Recovery source backed by a list held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRecoverySource {
    jobs: Vec<PersistedJob>,
}

impl InMemoryRecoverySource {
    pub fn new(jobs: Vec<PersistedJob>) -> Self {
        Self { jobs }
    }

    pub fn push(&mut self, job: PersistedJob) {
        self.jobs.push(job);
    }
}

impl RecoverySource for InMemoryRecoverySource {
    fn load_active_jobs(&self) -> Result<Vec<PersistedJob>> {
        Ok(self.jobs.clone())
    }
}

/// Rebuild the descriptor of job `id` so that its partitions match the
/// persisted statuses.
///
/// - `Finished`/`Faulty` tasks are replayed through `start` + `terminate`.
/// - `Running` tasks are started.
/// - `Paused` tasks that are eligible are paused; blocked ones stay blocked.
/// - `Submitted`/`Pending`/`WaitingOnError` tasks are left where the graph
///   puts them.
///
/// Fails if a task is `Aborted` (the job is already terminal) or if the
/// statuses are inconsistent with the graph, e.g. a finished task whose
/// parent is not finished.
pub fn rebuild_from_persisted_tasks(
    id: JobId,
    spec: &JobSpec,
    statuses: &HashMap<String, TaskStatus>,
) -> Result<JobDescriptor> {
    for name in statuses.keys() {
        if !spec.tasks.iter().any(|t| &t.name == name) {
            return Err(JobflowError::Recovery(format!(
                "persisted status for unknown task '{}.{}'",
                spec.name, name
            )));
        }
    }

    let nodes = spec.resolve(id)?;
    let mut job = JobDescriptor::build(id, spec.priority, spec.kind, nodes)?;

    let status_of: Vec<TaskStatus> = spec
        .tasks
        .iter()
        .map(|t| {
            statuses
                .get(&t.name)
                .copied()
                .unwrap_or(TaskStatus::Submitted)
        })
        .collect();

    if let Some(pos) = status_of.iter().position(|s| *s == TaskStatus::Aborted) {
        return Err(JobflowError::Recovery(format!(
            "task '{}.{}' was aborted; terminal jobs are not rebuilt",
            spec.name, spec.tasks[pos].name
        )));
    }

    // Replay terminations, lowest id first.
    let mut replayed = 0;
    loop {
        let next = job
            .eligible_ids()
            .iter()
            .find(|t| status_of[t.slot()].is_terminated())
            .copied();
        let Some(next) = next else {
            break;
        };
        job.start(next).map_err(replay_error)?;
        job.terminate(next).map_err(replay_error)?;
        replayed += 1;
    }

    for (slot, status) in status_of.iter().enumerate() {
        let task = TaskId::new(id, slot as u32);
        let membership = job.membership_of(task)?;
        match status {
            s if s.is_terminated() => {
                if membership != Membership::Done {
                    return Err(inconsistent(spec, slot, *s, membership));
                }
            }
            TaskStatus::Running => {
                if membership != Membership::Eligible {
                    return Err(inconsistent(spec, slot, *status, membership));
                }
                job.start(task).map_err(replay_error)?;
            }
            TaskStatus::Paused => {
                if membership == Membership::Eligible {
                    job.pause(task).map_err(replay_error)?;
                }
            }
            TaskStatus::WaitingOnError => {
                if membership != Membership::Eligible {
                    return Err(inconsistent(spec, slot, *status, membership));
                }
            }
            // Held in error: back into the paused partition.
            TaskStatus::InError => {
                if membership != Membership::Eligible {
                    return Err(inconsistent(spec, slot, *status, membership));
                }
                job.pause(task).map_err(replay_error)?;
            }
            _ => {}
        }
    }

    debug!(job = %id, replayed, "replayed persisted terminations");
    info!(
        job = %id,
        eligible = job.eligible_ids().len(),
        running = job.running_ids().len(),
        paused = job.paused_ids().len(),
        "job descriptor recovered"
    );
    Ok(job)
}

fn replay_error(err: JobflowError) -> JobflowError {
    JobflowError::Recovery(format!("replay failed: {err}"))
}

fn inconsistent(spec: &JobSpec, slot: usize, status: TaskStatus, found: Membership) -> JobflowError {
    JobflowError::Recovery(format!(
        "task '{}.{}' persisted as {} but the graph leaves it {}",
        spec.name,
        spec.tasks[slot].name,
        status,
        found.as_str()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::spec::TaskSpec;

    const JOB: JobId = JobId(4);

    fn tid(index: u32) -> TaskId {
        TaskId::new(JOB, index)
    }

    /// A -> {B, C} -> D, plus an independent E.
    fn diamond() -> JobSpec {
        let mut spec = JobSpec::new("diamond");
        for (name, after) in [
            ("A", vec![]),
            ("B", vec!["A"]),
            ("C", vec!["A"]),
            ("D", vec!["B", "C"]),
            ("E", vec![]),
        ] {
            let mut t = TaskSpec::new(name, "true");
            t.after = after.into_iter().map(String::from).collect();
            spec.tasks.push(t);
        }
        spec
    }

    fn statuses(pairs: &[(&str, TaskStatus)]) -> HashMap<String, TaskStatus> {
        pairs.iter().map(|(n, s)| (n.to_string(), *s)).collect()
    }

    #[test]
    fn recovery_matches_live_replay() {
        let spec = diamond();

        let mut live = JobDescriptor::build(
            JOB,
            spec.priority,
            spec.kind,
            spec.resolve(JOB).unwrap(),
        )
        .unwrap();
        live.start(tid(0)).unwrap();
        live.terminate(tid(0)).unwrap();
        live.start(tid(2)).unwrap();
        live.terminate(tid(2)).unwrap();
        live.start(tid(1)).unwrap();
        live.pause(tid(4)).unwrap();

        let recovered = rebuild_from_persisted_tasks(
            JOB,
            &spec,
            &statuses(&[
                ("A", TaskStatus::Finished),
                ("B", TaskStatus::Running),
                ("C", TaskStatus::Faulty),
                ("E", TaskStatus::Paused),
            ]),
        )
        .unwrap();

        assert_eq!(recovered.snapshot(), live.snapshot());
    }

    #[test]
    fn rebuilding_twice_is_identical() {
        let spec = diamond();
        let st = statuses(&[("A", TaskStatus::Finished), ("B", TaskStatus::Finished)]);
        let first = rebuild_from_persisted_tasks(JOB, &spec, &st).unwrap();
        let second = rebuild_from_persisted_tasks(JOB, &spec, &st).unwrap();
        assert_eq!(first.snapshot(), second.snapshot());
        assert_eq!(
            first.eligible_ids().iter().copied().collect::<Vec<_>>(),
            vec![tid(2), tid(4)]
        );
    }

    #[test]
    fn tasks_in_error_return_to_paused_and_killed_ones_release_children() {
        let spec = diamond();
        let recovered = rebuild_from_persisted_tasks(
            JOB,
            &spec,
            &statuses(&[
                ("A", TaskStatus::Finished),
                ("B", TaskStatus::InError),
                ("C", TaskStatus::Killed),
            ]),
        )
        .unwrap();

        assert_eq!(recovered.paused_ids().iter().copied().collect::<Vec<_>>(), vec![tid(1)]);
        assert_eq!(recovered.eligible_ids().iter().copied().collect::<Vec<_>>(), vec![tid(4)]);
        assert_eq!(recovered.membership_of(tid(2)).unwrap(), Membership::Done);
        assert_eq!(recovered.task(tid(3)).unwrap().unmet_parent_count(), 1);
    }

    #[test]
    fn finished_child_of_unfinished_parent_is_inconsistent() {
        let spec = diamond();
        let err = rebuild_from_persisted_tasks(
            JOB,
            &spec,
            &statuses(&[("B", TaskStatus::Finished)]),
        )
        .unwrap_err();
        assert!(matches!(err, JobflowError::Recovery(m) if m.contains("'diamond.B'")));
    }

    #[test]
    fn aborted_tasks_are_not_recovered() {
        let spec = diamond();
        let err = rebuild_from_persisted_tasks(
            JOB,
            &spec,
            &statuses(&[("A", TaskStatus::Aborted)]),
        )
        .unwrap_err();
        assert!(matches!(err, JobflowError::Recovery(_)));
    }

    #[test]
    fn in_memory_source_returns_what_it_holds() {
        let mut source = InMemoryRecoverySource::default();
        source.push(PersistedJob::new(JOB, diamond()).with_status("A", TaskStatus::Finished));
        let jobs = source.load_active_jobs().unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].statuses["A"], TaskStatus::Finished);
    }
}

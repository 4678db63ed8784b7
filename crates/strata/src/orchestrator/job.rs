//! # Jobs
//!
//! A job is a unit of background work scheduled by the orchestrator.
//!
//! ```text
//!   Pending ──execute──> Running ──ok──> Completed
//!                           │
//!                           └──err/panic──> Failed
//! ```
//!
//! Transitions only move forward. Failed jobs are never retried.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use strata_core::FieldMap;
use strata_shared::{now_millis, Millis};
use uuid::Uuid;

use crate::error::{JobError, OrchestratorError, OrchestratorResult};

/// What a job does.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Marks every entity of a region active.
    ActivateRegion,
    /// Builds and applies a create-entity patch.
    SpawnEntity,
    /// Job retention sweep and world index compaction.
    Maintenance,
    /// Derives health ratios into attributes and reports their mean.
    SyncMetric,
    /// Dispatched to an externally registered handler.
    Custom(String),
}

impl JobKind {
    /// Parses a job type name. Unknown names become [`JobKind::Custom`].
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name {
            "activate_region" => Self::ActivateRegion,
            "spawn_entity" => Self::SpawnEntity,
            "maintenance" => Self::Maintenance,
            "sync_metric" => Self::SyncMetric,
            other => Self::Custom(other.to_string()),
        }
    }

    /// The job type name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::ActivateRegion => "activate_region",
            Self::SpawnEntity => "spawn_entity",
            Self::Maintenance => "maintenance",
            Self::SyncMetric => "sync_metric",
            Self::Custom(name) => name.as_str(),
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Lifecycle state of a job.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting to run.
    Pending,
    /// Currently executing.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
}

impl JobStatus {
    /// True for `Completed` and `Failed`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A scheduled job and its outcome.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Job {
    /// Job id.
    pub id: String,
    /// What the job does.
    pub job_type: JobKind,
    /// Higher runs first.
    pub priority: i32,
    /// Lifecycle state.
    pub status: JobStatus,
    /// Submission time.
    pub created_at: Millis,
    /// Time the job started running.
    pub started_at: Option<Millis>,
    /// Time the job reached a terminal state.
    pub completed_at: Option<Millis>,
    /// Handler input.
    pub metadata: FieldMap,
    /// Handler output, on success.
    pub result: Option<Value>,
    /// Failure description, on failure.
    pub error: Option<String>,
    #[serde(skip)]
    sequence: u64,
}

impl Job {
    /// Wall-clock run time, once the job has finished.
    #[must_use]
    pub fn duration(&self) -> Option<Duration> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some(Duration::from_millis(end.saturating_sub(start))),
            _ => None,
        }
    }
}

/// How long terminal jobs are kept.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Terminal jobs older than this are dropped.
    pub max_age: Option<Duration>,
    /// At most this many terminal jobs are kept; the oldest go first.
    pub max_terminal_jobs: Option<usize>,
}

#[derive(Default)]
struct JobTable {
    jobs: HashMap<String, Job>,
    next_sequence: u64,
}

/// The set of known jobs.
///
/// All methods take the board lock briefly and never call out while holding
/// it, so handlers are free to use the board themselves.
#[derive(Default)]
pub struct JobBoard {
    table: Mutex<JobTable>,
}

impl fmt::Debug for JobBoard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobBoard").field("jobs", &self.len()).finish()
    }
}

impl JobBoard {
    /// Creates an empty board.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a pending job and returns its id.
    pub fn submit(&self, job_type: JobKind, priority: i32, metadata: FieldMap) -> String {
        let id = Uuid::new_v4().to_string();
        let mut table = self.table.lock();
        let sequence = table.next_sequence;
        table.next_sequence += 1;
        table.jobs.insert(
            id.clone(),
            Job {
                id: id.clone(),
                job_type,
                priority,
                status: JobStatus::Pending,
                created_at: now_millis(),
                started_at: None,
                completed_at: None,
                metadata,
                result: None,
                error: None,
                sequence,
            },
        );
        id
    }

    /// Returns a copy of the job.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Job> {
        self.table.lock().jobs.get(id).cloned()
    }

    /// Jobs in submission order, optionally filtered by status.
    #[must_use]
    pub fn list(&self, status: Option<JobStatus>) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .table
            .lock()
            .jobs
            .values()
            .filter(|job| status.map_or(true, |s| job.status == s))
            .cloned()
            .collect();
        jobs.sort_by_key(|job| job.sequence);
        jobs
    }

    /// Ids of up to `limit` pending jobs, highest priority first, then
    /// oldest first.
    #[must_use]
    pub fn next_pending(&self, limit: usize) -> Vec<String> {
        let table = self.table.lock();
        let mut pending: Vec<&Job> = table
            .jobs
            .values()
            .filter(|job| job.status == JobStatus::Pending)
            .collect();
        pending.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.sequence.cmp(&b.sequence)));
        pending.into_iter().take(limit).map(|job| job.id.clone()).collect()
    }

    /// Number of jobs with `status`.
    #[must_use]
    pub fn count(&self, status: JobStatus) -> usize {
        self.table
            .lock()
            .jobs
            .values()
            .filter(|job| job.status == status)
            .count()
    }

    /// Number of known jobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.lock().jobs.len()
    }

    /// True if no job is known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.lock().jobs.is_empty()
    }

    /// Moves a pending job to `Running` and returns a copy of it.
    pub(crate) fn begin(&self, id: &str) -> OrchestratorResult<Job> {
        let mut table = self.table.lock();
        let job = table
            .jobs
            .get_mut(id)
            .ok_or_else(|| OrchestratorError::JobNotFound(id.to_string()))?;
        if job.status != JobStatus::Pending {
            return Err(OrchestratorError::InvalidTransition {
                job_id: id.to_string(),
                from: job.status,
                to: JobStatus::Running,
            });
        }
        job.status = JobStatus::Running;
        job.started_at = Some(now_millis());
        Ok(job.clone())
    }

    /// Moves a running job to its terminal state.
    pub(crate) fn finish(&self, id: &str, outcome: Result<Value, JobError>) -> OrchestratorResult<Job> {
        let mut table = self.table.lock();
        let job = table
            .jobs
            .get_mut(id)
            .ok_or_else(|| OrchestratorError::JobNotFound(id.to_string()))?;
        let to = if outcome.is_ok() {
            JobStatus::Completed
        } else {
            JobStatus::Failed
        };
        if job.status != JobStatus::Running {
            return Err(OrchestratorError::InvalidTransition {
                job_id: id.to_string(),
                from: job.status,
                to,
            });
        }
        job.status = to;
        job.completed_at = Some(now_millis().max(job.started_at.unwrap_or_default()));
        match outcome {
            Ok(value) => job.result = Some(value),
            Err(e) => job.error = Some(e.to_string()),
        }
        Ok(job.clone())
    }

    /// Drops terminal jobs outside `policy` and returns how many went.
    pub fn sweep(&self, policy: &RetentionPolicy) -> usize {
        let now = now_millis();
        let mut table = self.table.lock();
        let before = table.jobs.len();

        if let Some(max_age) = policy.max_age {
            let max_age = u64::try_from(max_age.as_millis()).unwrap_or(u64::MAX);
            table.jobs.retain(|_, job| match job.completed_at {
                Some(done) if job.status.is_terminal() => now.saturating_sub(done) <= max_age,
                _ => true,
            });
        }

        if let Some(max_terminal) = policy.max_terminal_jobs {
            let mut terminal: Vec<(Millis, u64, String)> = table
                .jobs
                .values()
                .filter(|job| job.status.is_terminal())
                .map(|job| (job.completed_at.unwrap_or_default(), job.sequence, job.id.clone()))
                .collect();
            if terminal.len() > max_terminal {
                terminal.sort();
                let excess = terminal.len() - max_terminal;
                for (_, _, id) in terminal.into_iter().take(excess) {
                    table.jobs.remove(&id);
                }
            }
        }

        before - table.jobs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_names_round_trip() {
        for kind in [
            JobKind::ActivateRegion,
            JobKind::SpawnEntity,
            JobKind::Maintenance,
            JobKind::SyncMetric,
            JobKind::Custom("reindex".to_string()),
        ] {
            assert_eq!(JobKind::from_name(kind.name()), kind);
        }
    }

    #[test]
    fn test_lifecycle_is_monotonic() {
        let board = JobBoard::new();
        let id = board.submit(JobKind::Maintenance, 0, FieldMap::new());
        assert_eq!(board.get(&id).unwrap().status, JobStatus::Pending);

        let err = board.finish(&id, Ok(json!(null))).unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidTransition { from: JobStatus::Pending, .. }));

        let running = board.begin(&id).unwrap();
        assert_eq!(running.status, JobStatus::Running);
        assert!(running.started_at.is_some());
        assert!(board.begin(&id).is_err());

        let done = board.finish(&id, Err(JobError::Handler("boom".to_string()))).unwrap();
        assert_eq!(done.status, JobStatus::Failed);
        assert_eq!(done.error.as_deref(), Some("handler failed: boom"));
        assert!(done.duration().is_some());

        let err = board.begin(&id).unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidTransition { from: JobStatus::Failed, .. }));
        assert!(matches!(board.begin("nope"), Err(OrchestratorError::JobNotFound(_))));
    }

    #[test]
    fn test_next_pending_orders_by_priority_then_age() {
        let board = JobBoard::new();
        let low = board.submit(JobKind::SyncMetric, 1, FieldMap::new());
        let high_a = board.submit(JobKind::SyncMetric, 5, FieldMap::new());
        let high_b = board.submit(JobKind::SyncMetric, 5, FieldMap::new());
        let started = board.submit(JobKind::SyncMetric, 9, FieldMap::new());
        board.begin(&started).unwrap();

        assert_eq!(board.next_pending(10), vec![high_a.clone(), high_b, low]);
        assert_eq!(board.next_pending(1), vec![high_a]);
        assert_eq!(board.count(JobStatus::Running), 1);
    }

    #[test]
    fn test_list_filters_by_status_in_submission_order() {
        let board = JobBoard::new();
        let a = board.submit(JobKind::Maintenance, 0, FieldMap::new());
        let b = board.submit(JobKind::Maintenance, 3, FieldMap::new());
        board.begin(&b).unwrap();

        let all: Vec<String> = board.list(None).into_iter().map(|j| j.id).collect();
        assert_eq!(all, vec![a.clone(), b.clone()]);
        let pending: Vec<String> = board.list(Some(JobStatus::Pending)).into_iter().map(|j| j.id).collect();
        assert_eq!(pending, vec![a]);
    }

    #[test]
    fn test_sweep_keeps_pending_and_newest_terminal_jobs() {
        let board = JobBoard::new();
        let ids: Vec<String> = (0..4)
            .map(|_| board.submit(JobKind::Maintenance, 0, FieldMap::new()))
            .collect();
        for id in &ids[..3] {
            board.begin(id).unwrap();
            board.finish(id, Ok(Value::Null)).unwrap();
        }

        let removed = board.sweep(&RetentionPolicy {
            max_age: None,
            max_terminal_jobs: Some(1),
        });
        assert_eq!(removed, 2);
        assert!(board.get(&ids[2]).is_some());
        assert_eq!(board.get(&ids[3]).unwrap().status, JobStatus::Pending);

        let removed = board.sweep(&RetentionPolicy {
            max_age: Some(Duration::from_secs(3600)),
            max_terminal_jobs: None,
        });
        assert_eq!(removed, 0);
        assert_eq!(board.len(), 2);
    }
}

// src/dag/execution.rs

//! Runtime records: one [`JobExecution`] per job and the owning
//! [`DagExecution`] aggregate.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde_json::Value;
use uuid::Uuid;

use crate::types::{DagStatus, JobId, JobStatus};

/// Mutable runtime record for one job.
///
/// `output` is only present on `completed`, `error` only on `failed`.
/// `logs` is append-only.
#[derive(Debug, Clone, PartialEq)]
pub struct JobExecution {
    pub job_id: JobId,
    pub status: JobStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Number of times a handler was started for this job.
    pub attempt: u32,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub logs: Vec<String>,
}

impl JobExecution {
    pub fn new(job_id: impl Into<JobId>) -> Self {
        Self {
            job_id: job_id.into(),
            status: JobStatus::Pending,
            started_at: None,
            completed_at: None,
            attempt: 0,
            output: None,
            error: None,
            logs: Vec::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn append_log(&mut self, line: impl Into<String>) {
        self.logs.push(line.into());
    }

    /// A failure that was propagated from a dependency; the job never ran.
    pub fn is_propagated_failure(&self) -> bool {
        self.status == JobStatus::Failed && self.attempt == 0
    }
}

/// One run of a job graph, including dynamically generated jobs.
#[derive(Debug, Clone, PartialEq)]
pub struct DagExecution {
    pub id: String,
    pub name: String,
    pub status: DagStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Insertion ordered: declared jobs first, generated jobs appended as
    /// their fan-out expands.
    pub jobs: IndexMap<JobId, JobExecution>,
}

impl DagExecution {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            status: DagStatus::Pending,
            started_at: Utc::now(),
            completed_at: None,
            jobs: IndexMap::new(),
        }
    }

    pub fn job(&self, id: &str) -> Option<&JobExecution> {
        self.jobs.get(id)
    }

    pub fn count_with_status(&self, status: JobStatus) -> usize {
        self.jobs.values().filter(|j| j.status == status).count()
    }

    pub fn running_count(&self) -> usize {
        self.count_with_status(JobStatus::Running)
    }

    pub fn all_terminal(&self) -> bool {
        self.jobs.values().all(JobExecution::is_terminal)
    }

    /// Completed jobs as a percentage of all known jobs (0.0 when empty).
    pub fn progress(&self) -> f64 {
        if self.jobs.is_empty() {
            return 0.0;
        }
        self.count_with_status(JobStatus::Completed) as f64 * 100.0 / self.jobs.len() as f64
    }

    /// First job that failed on its own (not by propagation), for diagnostics.
    ///
    /// Falls back to the first failed job of any kind.
    pub fn root_cause(&self) -> Option<(&str, &str)> {
        let failed = |j: &&JobExecution| j.status == JobStatus::Failed;
        self.jobs
            .values()
            .filter(failed)
            .find(|j| !j.is_propagated_failure())
            .or_else(|| self.jobs.values().find(failed))
            .map(|j| (j.job_id.as_str(), j.error.as_deref().unwrap_or("")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_counts_completed_jobs() {
        let mut exec = DagExecution::new("run");
        assert_eq!(exec.progress(), 0.0);

        for id in ["a", "b", "c", "d"] {
            exec.jobs.insert(id.to_string(), JobExecution::new(id));
        }
        exec.jobs["a"].status = JobStatus::Completed;
        assert_eq!(exec.progress(), 25.0);
        assert!(!exec.all_terminal());
    }

    #[test]
    fn root_cause_skips_propagated_failures() {
        let mut exec = DagExecution::new("run");
        let mut downstream = JobExecution::new("downstream");
        downstream.status = JobStatus::Failed;
        downstream.error = Some("dependency 'upstream' failed".to_string());

        let mut upstream = JobExecution::new("upstream");
        upstream.status = JobStatus::Failed;
        upstream.attempt = 2;
        upstream.error = Some("out of memory".to_string());

        exec.jobs.insert("downstream".to_string(), downstream);
        exec.jobs.insert("upstream".to_string(), upstream);

        assert_eq!(exec.root_cause(), Some(("upstream", "out of memory")));
    }
}

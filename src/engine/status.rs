// src/engine/status.rs

//! Read-only views for whoever polls an execution: status summaries and
//! incremental log reads.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::dag::execution::{DagExecution, JobExecution};
use crate::types::{DagStatus, JobId, JobStatus};

/// Point-in-time summary of an execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionStatus {
    pub execution_id: String,
    pub name: String,
    pub status: DagStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Completed jobs as a percentage of all known jobs.
    pub progress: f64,
    pub total_jobs: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub jobs: Vec<JobStatusView>,
    /// First job that failed on its own, for diagnostics.
    pub root_cause: Option<RootCause>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStatusView {
    pub job_id: JobId,
    pub status: JobStatus,
    pub attempt: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub log_lines: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RootCause {
    pub job_id: JobId,
    pub error: String,
}

impl From<&JobExecution> for JobStatusView {
    fn from(job: &JobExecution) -> Self {
        Self {
            job_id: job.job_id.clone(),
            status: job.status,
            attempt: job.attempt,
            started_at: job.started_at,
            completed_at: job.completed_at,
            error: job.error.clone(),
            log_lines: job.logs.len(),
        }
    }
}

impl From<&DagExecution> for ExecutionStatus {
    fn from(exec: &DagExecution) -> Self {
        Self {
            execution_id: exec.id.clone(),
            name: exec.name.clone(),
            status: exec.status,
            started_at: exec.started_at,
            completed_at: exec.completed_at,
            progress: exec.progress(),
            total_jobs: exec.jobs.len(),
            pending: exec.count_with_status(JobStatus::Pending),
            running: exec.count_with_status(JobStatus::Running),
            completed: exec.count_with_status(JobStatus::Completed),
            failed: exec.count_with_status(JobStatus::Failed),
            jobs: exec.jobs.values().map(JobStatusView::from).collect(),
            root_cause: exec.root_cause().map(|(job_id, error)| RootCause {
                job_id: job_id.to_string(),
                error: error.to_string(),
            }),
        }
    }
}

/// A log line tagged with its job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogLine {
    pub job_id: JobId,
    pub line: String,
}

/// Remembers how far each job's log has been read, so repeated polls only
/// return newly appended lines.
///
/// Relies on logs being append-only.
#[derive(Debug, Clone, Default)]
pub struct LogCursor {
    positions: HashMap<JobId, usize>,
}

impl LogCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// New lines of one job since the previous read of that job.
    pub fn poll_job<'a>(&mut self, exec: &'a DagExecution, job_id: &str) -> &'a [String] {
        let Some(job) = exec.job(job_id) else {
            return &[];
        };
        let pos = self.positions.entry(job_id.to_string()).or_insert(0);
        let start = (*pos).min(job.logs.len());
        *pos = job.logs.len();
        &job.logs[start..]
    }

    /// New lines of every job, in job order.
    pub fn poll(&mut self, exec: &DagExecution) -> Vec<LogLine> {
        let mut out = Vec::new();
        for job_id in exec.jobs.keys() {
            for line in self.poll_job(exec, job_id) {
                out.push(LogLine {
                    job_id: job_id.clone(),
                    line: line.clone(),
                });
            }
        }
        out
    }
}

// src/dag/state_manager.rs

//! Per-job state transitions for the scheduler.

use std::collections::HashSet;

use chrono::Utc;
use indexmap::IndexMap;
use serde_json::Value;
use tracing::{debug, warn};

use crate::dag::execution::JobExecution;
use crate::dag::graph::DagGraph;
use crate::types::{JobId, JobStatus};

/// Applies state transitions to job execution records.
///
/// Every transition stamps timestamps and appends a log line, so the log of
/// a job is a complete history of its lifecycle.
pub struct StateManager<'a> {
    graph: &'a DagGraph,
    jobs: &'a mut IndexMap<JobId, JobExecution>,
}

impl<'a> StateManager<'a> {
    pub fn new(graph: &'a DagGraph, jobs: &'a mut IndexMap<JobId, JobExecution>) -> Self {
        Self { graph, jobs }
    }

    /// `pending|failed -> running`. Returns the new attempt number.
    pub fn mark_running(&mut self, id: &str) -> Option<u32> {
        let job = self.jobs.get_mut(id)?;
        if !matches!(job.status, JobStatus::Pending | JobStatus::Failed) {
            warn!(job = %id, status = %job.status, "refusing to start job that is not pending/failed");
            return None;
        }

        let now = Utc::now();
        job.status = JobStatus::Running;
        job.attempt += 1;
        job.started_at.get_or_insert(now);
        job.completed_at = None;
        job.output = None;
        job.error = None;
        job.append_log(format!("attempt {} started", job.attempt));
        debug!(job = %id, attempt = job.attempt, "marked Running");
        Some(job.attempt)
    }

    /// `running -> completed` with an output.
    pub fn mark_completed(&mut self, id: &str, output: Value) {
        if let Some(job) = self.jobs.get_mut(id) {
            let now = Utc::now();
            job.status = JobStatus::Completed;
            job.started_at.get_or_insert(now);
            job.completed_at = Some(now);
            job.output = Some(output);
            job.error = None;
            job.append_log(format!("attempt {} completed", job.attempt));
            debug!(job = %id, attempt = job.attempt, "marked Completed");
        }
    }

    /// Complete a job by reusing another job's output; no handler runs.
    pub fn mark_cached(&mut self, id: &str, source: &str) -> bool {
        let Some(output) = self.jobs.get(source).and_then(|j| j.output.clone()) else {
            return false;
        };
        if let Some(job) = self.jobs.get_mut(id) {
            let now = Utc::now();
            job.status = JobStatus::Completed;
            job.started_at = Some(now);
            job.completed_at = Some(now);
            job.output = Some(output);
            job.error = None;
            job.append_log(format!("cache hit: reused output of '{source}'"));
            debug!(job = %id, source = %source, "completed from cache");
            return true;
        }
        false
    }

    /// `running -> failed`, recording the error.
    pub fn mark_failed(&mut self, id: &str, error: impl Into<String>) {
        if let Some(job) = self.jobs.get_mut(id) {
            let error = error.into();
            let now = Utc::now();
            job.status = JobStatus::Failed;
            job.completed_at = Some(now);
            job.output = None;
            job.append_log(format!("attempt {} failed: {error}", job.attempt));
            job.error = Some(error);
            debug!(job = %id, attempt = job.attempt, "marked Failed");
        }
    }

    /// Mark every *pending* job downstream of a permanently failed job as
    /// failed without running it.
    ///
    /// Returns the newly failed jobs (excluding `failed_job` itself).
    pub fn mark_dependents_failed(&mut self, failed_job: &str) -> Vec<JobId> {
        let mut stack: Vec<(JobId, JobId)> = self
            .graph
            .dependents_of(failed_job)
            .iter()
            .map(|d| (d.clone(), failed_job.to_string()))
            .collect();
        let mut visited: HashSet<JobId> = HashSet::new();
        let mut newly_failed = Vec::new();

        while let Some((name, cause)) = stack.pop() {
            if !visited.insert(name.clone()) {
                continue;
            }
            let Some(job) = self.jobs.get_mut(&name) else {
                continue;
            };
            if job.status != JobStatus::Pending {
                continue;
            }

            let now = Utc::now();
            let reason = format!("dependency '{cause}' failed");
            job.status = JobStatus::Failed;
            job.completed_at = Some(now);
            job.append_log(format!("not run: {reason}"));
            job.error = Some(reason);
            debug!(job = %name, cause = %cause, "marking dependent as Failed due to upstream failure");

            stack.extend(
                self.graph
                    .dependents_of(&name)
                    .iter()
                    .map(|d| (d.clone(), name.clone())),
            );
            newly_failed.push(name);
        }

        newly_failed
    }

    /// Fail every pending job with the same reason (used when the execution
    /// can make no further progress).
    pub fn fail_all_pending(&mut self, reason: &str) -> Vec<JobId> {
        let now = Utc::now();
        let mut failed = Vec::new();
        for job in self.jobs.values_mut() {
            if job.status == JobStatus::Pending {
                job.status = JobStatus::Failed;
                job.completed_at = Some(now);
                job.append_log(format!("not run: {reason}"));
                job.error = Some(reason.to_string());
                failed.push(job.job_id.clone());
            }
        }
        failed
    }

    /// Append a coordinator or handler log line.
    pub fn append_log(&mut self, id: &str, line: impl Into<String>) -> bool {
        match self.jobs.get_mut(id) {
            Some(job) => {
                job.append_log(line);
                true
            }
            None => false,
        }
    }

    pub fn running_ids(&self) -> Vec<JobId> {
        self.jobs
            .values()
            .filter(|j| j.status == JobStatus::Running)
            .map(|j| j.job_id.clone())
            .collect()
    }
}

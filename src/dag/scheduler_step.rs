// src/dag/scheduler_step.rs

//! Step-by-step execution result types for the scheduler.

use crate::dag::execution::JobExecution;
use crate::dag::job_info::ScheduledJob;
use crate::types::JobId;

/// Structured result of a single scheduler "step".
///
/// The coordinator uses it to dispatch work and fire callbacks; tests use it
/// to step the DAG manually and assert on what changed.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStep {
    /// Job attempts that must be handed to the executor now.
    pub newly_scheduled: Vec<ScheduledJob>,
    /// Jobs that reached `completed` in this step (including fan-out,
    /// fan-in and cache hits, which complete inline).
    pub newly_completed: Vec<JobId>,
    /// Jobs that reached `failed` in this step: handler failures (retried or
    /// not) and failures propagated to dependents.
    pub newly_failed: Vec<JobId>,
    /// Records of failed attempts as they were before the immediate retry
    /// replaced them.
    pub retried: Vec<JobExecution>,
    /// Running handlers should be told to abort (cancel or fail-fast).
    pub abort_running: bool,
    /// The execution reached a terminal status with nothing left running.
    pub run_just_finished: bool,
}

impl SchedulerStep {
    pub fn merge(&mut self, other: SchedulerStep) {
        self.newly_scheduled.extend(other.newly_scheduled);
        self.newly_completed.extend(other.newly_completed);
        self.newly_failed.extend(other.newly_failed);
        self.retried.extend(other.retried);
        self.abort_running |= other.abort_running;
        self.run_just_finished |= other.run_just_finished;
    }

    pub fn scheduled_ids(&self) -> Vec<&str> {
        self.newly_scheduled
            .iter()
            .map(|job| job.job_id.as_str())
            .collect()
    }
}

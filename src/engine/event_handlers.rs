// src/engine/event_handlers.rs

//! Event handling logic for the core runtime.

use tracing::debug;

use crate::dag::execution::JobExecution;
use crate::dag::{ScheduledJob, Scheduler, SchedulerStep};
use crate::engine::JobOutcome;
use crate::types::{CheckpointTrigger, JobId};

/// Command produced by the pure core, to be executed by the outer IO shell.
#[derive(Debug, Clone)]
pub enum CoreCommand {
    /// Send these attempts to the executor.
    DispatchJobs(Vec<ScheduledJob>),
    /// Ask running handlers to stop.
    CancelRunning,
    /// Fire completion callbacks with these records.
    NotifyCompleted(Vec<JobExecution>),
    /// Fire failure callbacks with these records, one per failed attempt.
    NotifyFailed(Vec<JobExecution>),
    /// Save a checkpoint of the current state.
    TakeCheckpoint(CheckpointTrigger),
    /// The execution reached a terminal status.
    Finish,
}

/// Decision returned by the core after handling a single event.
#[derive(Debug, Clone)]
pub struct CoreStep {
    /// Commands the IO shell should execute, in order.
    pub commands: Vec<CoreCommand>,
    /// Whether the outer runtime loop should keep running.
    pub keep_running: bool,
}

/// Tracks completions for periodic checkpoints.
#[derive(Debug, Clone, Default)]
pub struct CheckpointCounter {
    every: Option<usize>,
    since_last: usize,
}

impl CheckpointCounter {
    pub fn new(every: Option<usize>) -> Self {
        Self {
            every: every.filter(|n| *n > 0),
            since_last: 0,
        }
    }

    /// Count `completed` new completions; `true` when a periodic checkpoint
    /// is due.
    fn record(&mut self, completed: usize) -> bool {
        let Some(every) = self.every else {
            return false;
        };
        self.since_last += completed;
        if self.since_last >= every {
            self.since_last = 0;
            true
        } else {
            false
        }
    }
}

/// Handle a finished handler attempt.
pub fn handle_job_finished(
    scheduler: &mut Scheduler,
    counter: &mut CheckpointCounter,
    job: JobId,
    attempt: u32,
    outcome: JobOutcome,
) -> CoreStep {
    let step = match outcome {
        JobOutcome::Success(output) => scheduler.complete_job(&job, attempt, output),
        JobOutcome::Failed(error) => scheduler.fail_job(&job, attempt, error),
    };
    step_to_core(scheduler, counter, step)
}

/// Handle a log line from a running handler. Never produces commands.
pub fn handle_job_log(scheduler: &mut Scheduler, job: JobId, attempt: u32, line: String) -> CoreStep {
    if !scheduler.append_log(&job, attempt, line) {
        debug!(job = %job, attempt, "log line not recorded");
    }
    CoreStep {
        commands: Vec::new(),
        keep_running: true,
    }
}

/// Handle an external cancellation request.
pub fn handle_cancel_requested(scheduler: &mut Scheduler, counter: &mut CheckpointCounter) -> CoreStep {
    let step = scheduler.cancel();
    step_to_core(scheduler, counter, step)
}

/// Translate what the scheduler did into commands for the shell.
pub fn step_to_core(
    scheduler: &Scheduler,
    counter: &mut CheckpointCounter,
    step: SchedulerStep,
) -> CoreStep {
    let mut commands = Vec::new();

    let completed = step.newly_completed.len();
    if !step.newly_completed.is_empty() {
        commands.push(CoreCommand::NotifyCompleted(records(
            scheduler,
            &step.newly_completed,
            &[],
        )));
    }
    if !step.newly_failed.is_empty() {
        commands.push(CoreCommand::NotifyFailed(records(
            scheduler,
            &step.newly_failed,
            &step.retried,
        )));
    }
    if step.abort_running {
        commands.push(CoreCommand::CancelRunning);
    }
    if !step.newly_scheduled.is_empty() {
        commands.push(CoreCommand::DispatchJobs(step.newly_scheduled));
    }

    if step.run_just_finished {
        if let Some(trigger) = CheckpointTrigger::for_terminal(scheduler.execution().status) {
            commands.push(CoreCommand::TakeCheckpoint(trigger));
        }
        commands.push(CoreCommand::Finish);
        return CoreStep {
            commands,
            keep_running: false,
        };
    }

    // Nothing can be in flight once the execution is terminal.
    if scheduler.is_finished() {
        commands.push(CoreCommand::Finish);
        return CoreStep {
            commands,
            keep_running: false,
        };
    }

    if counter.record(completed) {
        commands.push(CoreCommand::TakeCheckpoint(CheckpointTrigger::Periodic));
    }

    CoreStep {
        commands,
        keep_running: true,
    }
}

/// Records for callbacks. A retried attempt is reported as it looked when it
/// failed, not as the attempt that replaced it.
fn records(scheduler: &Scheduler, ids: &[JobId], retried: &[JobExecution]) -> Vec<JobExecution> {
    ids.iter()
        .filter_map(|id| {
            retried
                .iter()
                .find(|r| &r.job_id == id)
                .or_else(|| scheduler.execution().job(id))
                .cloned()
        })
        .collect()
}

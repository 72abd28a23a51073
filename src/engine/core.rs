// src/engine/core.rs

//! Pure core runtime state machine.
//!
//! This module contains a synchronous, deterministic "core runtime" that
//! consumes [`RuntimeEvent`]s and produces:
//! - an updated core state
//! - a list of "commands" describing what the IO shell should do next
//!
//! The async/IO-heavy shell (`engine::runtime::Runtime`) is responsible for:
//! - reading events from channels
//! - sending `ScheduledJob`s to the executor
//! - firing callbacks and writing checkpoints
//!
//! The core can be unit tested without any Tokio, channels or handlers.

use tracing::warn;

use crate::dag::Scheduler;
use crate::engine::RuntimeEvent;
use crate::engine::event_handlers::{
    CheckpointCounter, CoreStep, handle_cancel_requested, handle_job_finished, handle_job_log,
    step_to_core,
};

/// Pure core runtime state.
///
/// It has **no** channels, no Tokio types, and does not perform any IO.
#[derive(Debug)]
pub struct CoreRuntime {
    scheduler: Scheduler,
    counter: CheckpointCounter,
}

impl CoreRuntime {
    pub fn new(scheduler: Scheduler, checkpoint_every: Option<usize>) -> Self {
        Self {
            scheduler,
            counter: CheckpointCounter::new(checkpoint_every),
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn into_scheduler(self) -> Scheduler {
        self.scheduler
    }

    /// Start the execution: dispatch the first ready jobs.
    pub fn start(&mut self) -> CoreStep {
        let step = self.scheduler.start();
        step_to_core(&self.scheduler, &mut self.counter, step)
    }

    /// Handle a single runtime event, updating core state and returning the
    /// resulting commands for the IO shell.
    pub fn step(&mut self, event: RuntimeEvent) -> CoreStep {
        match event {
            RuntimeEvent::JobFinished {
                job,
                attempt,
                outcome,
            } => handle_job_finished(&mut self.scheduler, &mut self.counter, job, attempt, outcome),
            RuntimeEvent::JobLog { job, attempt, line } => {
                handle_job_log(&mut self.scheduler, job, attempt, line)
            }
            RuntimeEvent::CancelRequested => {
                handle_cancel_requested(&mut self.scheduler, &mut self.counter)
            }
            RuntimeEvent::CheckpointRequested { .. } => {
                warn!("checkpoint requests are served by the runtime shell; ignoring in core");
                CoreStep {
                    commands: Vec::new(),
                    keep_running: true,
                }
            }
        }
    }
}

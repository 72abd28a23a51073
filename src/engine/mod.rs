// src/engine/mod.rs

//! Orchestration engine for tunedag.
//!
//! This module ties together:
//! - the DAG scheduler
//! - the main runtime event loop that reacts to:
//!   - job results reported by handler tasks
//!   - log lines appended by running handlers
//!   - cancellation and on-demand checkpoint requests
//! - the public [`Orchestrator`] facade and status views
//!
//! The pure core state machine lives in [`core`]; the async/IO shell is
//! implemented in [`runtime`].

use serde_json::Value;
use tokio::sync::oneshot;

use crate::checkpoint::Checkpoint;
use crate::types::JobId;

/// Outcome of one handler attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Success(Value),
    Failed(String),
}

/// Events flowing into the runtime from job runners and callers.
#[derive(Debug)]
pub enum RuntimeEvent {
    /// A handler attempt finished (including timeouts and panics).
    JobFinished {
        job: JobId,
        attempt: u32,
        outcome: JobOutcome,
    },
    /// A running handler appended a log line.
    JobLog {
        job: JobId,
        attempt: u32,
        line: String,
    },
    /// Stop dispatching and wind the execution down.
    CancelRequested,
    /// Capture a manual checkpoint of the current state.
    CheckpointRequested {
        label: String,
        reply: oneshot::Sender<Checkpoint>,
    },
}

pub mod core;
pub mod event_handlers;
pub mod options;
pub mod orchestrator;
pub mod runtime;
pub mod status;

pub use core::CoreRuntime;
pub use event_handlers::{CoreCommand, CoreStep};
pub use options::{ExecuteOptions, JobCallback};
pub use orchestrator::{Canceller, ExecutionHandle, Orchestrator};
pub use runtime::{Runtime, RuntimeHooks};
pub use status::{ExecutionStatus, JobStatusView, LogCursor, LogLine};

// src/exec/backend.rs

//! Pluggable executor backend abstraction.
//!
//! The runtime talks to an `ExecutorBackend` instead of spawning handler
//! tasks itself. This makes it easy to swap in a fake executor in tests while
//! keeping the production executor in [`super::executor_loop`].
//!
//! - `TokioExecutorBackend` is the default implementation. It wraps the
//!   executor loop and forwards commands over an mpsc channel.
//! - Tests can provide their own `ExecutorBackend` that, for example, records
//!   which jobs were dispatched and directly emits `JobFinished` events.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;

use crate::dag::ScheduledJob;
use crate::engine::RuntimeEvent;
use crate::errors::{Error, Result};

use super::executor_loop::{ExecutorCommand, spawn_executor};

/// Trait abstracting how scheduled job attempts are executed.
pub trait ExecutorBackend: Send {
    /// Dispatch the given attempts for execution.
    ///
    /// Must not wait for the attempts to finish; results are reported back
    /// as `RuntimeEvent::JobFinished`.
    fn spawn_ready_jobs(
        &mut self,
        jobs: Vec<ScheduledJob>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Ask every running attempt to stop cooperatively.
    fn cancel_running(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Executor backend that runs handlers as Tokio tasks.
pub struct TokioExecutorBackend {
    tx: mpsc::Sender<ExecutorCommand>,
}

impl TokioExecutorBackend {
    /// Create a backend wired to the given runtime event sender.
    ///
    /// This spawns the background executor loop immediately, so it must be
    /// called from within a Tokio runtime.
    pub fn new(runtime_tx: mpsc::Sender<RuntimeEvent>) -> Self {
        let tx = spawn_executor(runtime_tx);
        Self { tx }
    }
}

impl ExecutorBackend for TokioExecutorBackend {
    fn spawn_ready_jobs(
        &mut self,
        jobs: Vec<ScheduledJob>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        // Clone the sender so the future doesn't borrow `self` across `await`.
        let tx = self.tx.clone();

        Box::pin(async move {
            for job in jobs {
                tx.send(ExecutorCommand::Run(job))
                    .await
                    .map_err(|e| Error::msg(format!("executor loop closed: {e}")))?;
            }
            Ok(())
        })
    }

    fn cancel_running(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let tx = self.tx.clone();

        Box::pin(async move {
            tx.send(ExecutorCommand::CancelAll)
                .await
                .map_err(|e| Error::msg(format!("executor loop closed: {e}")))?;
            Ok(())
        })
    }
}

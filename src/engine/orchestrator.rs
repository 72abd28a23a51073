// src/engine/orchestrator.rs

//! Public entry point: start, observe, cancel and resume executions.

use std::sync::Arc;

use anyhow::anyhow;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::checkpoint::Checkpoint;
use crate::config::model::JobDeclaration;
use crate::dag::Scheduler;
use crate::dag::execution::DagExecution;
use crate::errors::{Result, TunedagError};
use crate::exec::{JobHandler, JobRegistry, TokioExecutorBackend};

use super::core::CoreRuntime;
use super::options::ExecuteOptions;
use super::runtime::{Runtime, RuntimeHooks};
use super::status::ExecutionStatus;
use super::RuntimeEvent;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Runs job DAGs against a registry of handlers.
///
/// Cheap to clone; every execution gets its own scheduler and runtime task
/// while sharing the registry.
#[derive(Debug, Clone, Default)]
pub struct Orchestrator {
    registry: Arc<JobRegistry>,
}

impl Orchestrator {
    pub fn new(registry: Arc<JobRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// Register a handler for `job_type`.
    ///
    /// Executions already started keep the registry they were started with.
    pub fn register_handler(
        &mut self,
        job_type: impl Into<String>,
        handler: impl JobHandler + 'static,
    ) -> Result<()> {
        Arc::make_mut(&mut self.registry).register_handler(job_type, handler)
    }

    /// Run `declarations` to a terminal status.
    ///
    /// Invalid declarations (cycles, unknown dependencies or types) are
    /// rejected before any handler runs.
    pub async fn execute(
        &self,
        name: impl Into<String>,
        declarations: Vec<JobDeclaration>,
        options: ExecuteOptions,
    ) -> Result<DagExecution> {
        self.start(name, declarations, options)?.wait().await
    }

    /// Start an execution in the background.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        &self,
        name: impl Into<String>,
        declarations: Vec<JobDeclaration>,
        options: ExecuteOptions,
    ) -> Result<ExecutionHandle> {
        let scheduler = Scheduler::new(
            name,
            declarations,
            options.scheduler_options(),
            Arc::clone(&self.registry),
        )?;
        Ok(self.launch(scheduler, options))
    }

    /// Continue an execution from a checkpoint.
    ///
    /// Completed jobs are not run again; jobs that were running when the
    /// checkpoint was taken start over.
    pub fn resume(&self, checkpoint: &Checkpoint, options: ExecuteOptions) -> Result<ExecutionHandle> {
        let execution = checkpoint.restore()?;
        let scheduler = Scheduler::from_parts(
            execution,
            checkpoint.declarations.clone(),
            options.scheduler_options(),
            Arc::clone(&self.registry),
        )
        .map_err(|e| match e {
            TunedagError::Checkpoint(_) => e,
            other => TunedagError::Checkpoint(format!(
                "cannot resume execution '{}': {other}",
                checkpoint.execution_id
            )),
        })?;

        info!(
            execution = %checkpoint.execution_id,
            checkpoint = %checkpoint.id,
            label = %checkpoint.label,
            "resuming from checkpoint"
        );
        Ok(self.launch(scheduler, options))
    }

    fn launch(&self, scheduler: Scheduler, options: ExecuteOptions) -> ExecutionHandle {
        let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(EVENT_CHANNEL_CAPACITY);
        let executor = TokioExecutorBackend::new(rt_tx.clone());

        let execution_id = scheduler.execution().id.clone();
        let (status_tx, status_rx) = watch::channel(scheduler.execution().clone());

        let hooks = RuntimeHooks::from_options(&options).with_status(status_tx);
        let core = CoreRuntime::new(scheduler, options.checkpoint_every);
        let runtime = Runtime::new(core, rt_rx, executor).with_hooks(hooks);

        debug!(execution = %execution_id, "spawning runtime task");
        let join = tokio::spawn(runtime.run());

        ExecutionHandle {
            execution_id,
            events: rt_tx,
            status_rx,
            join,
        }
    }
}

/// Handle to a running execution.
#[derive(Debug)]
pub struct ExecutionHandle {
    execution_id: String,
    events: mpsc::Sender<RuntimeEvent>,
    status_rx: watch::Receiver<DagExecution>,
    join: JoinHandle<Result<DagExecution>>,
}

impl ExecutionHandle {
    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    /// Request cancellation. A no-op if the execution already finished.
    pub async fn cancel(&self) {
        self.canceller().cancel().await;
    }

    /// Detached cancel capability, e.g. for a signal handler task.
    pub fn canceller(&self) -> Canceller {
        Canceller {
            execution_id: self.execution_id.clone(),
            events: self.events.clone(),
        }
    }

    /// Capture a manual checkpoint of the live state.
    ///
    /// Also saved to the configured store, if any.
    pub async fn checkpoint(&self, label: impl Into<String>) -> Result<Checkpoint> {
        let (reply, rx) = oneshot::channel();
        let not_running = || {
            TunedagError::Checkpoint(format!(
                "execution '{}' is no longer running",
                self.execution_id
            ))
        };

        self.events
            .send(RuntimeEvent::CheckpointRequested {
                label: label.into(),
                reply,
            })
            .await
            .map_err(|_| not_running())?;
        rx.await.map_err(|_| not_running())
    }

    /// Latest published execution record.
    pub fn snapshot(&self) -> DagExecution {
        self.status_rx.borrow().clone()
    }

    pub fn status(&self) -> ExecutionStatus {
        ExecutionStatus::from(&*self.status_rx.borrow())
    }

    /// Receiver notified after every state change.
    pub fn subscribe(&self) -> watch::Receiver<DagExecution> {
        self.status_rx.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the execution to reach a terminal status.
    pub async fn wait(self) -> Result<DagExecution> {
        match self.join.await {
            Ok(result) => result,
            Err(e) => Err(TunedagError::Other(anyhow!("execution task failed: {e}"))),
        }
    }
}

/// Cloneable handle that can only cancel an execution.
#[derive(Debug, Clone)]
pub struct Canceller {
    execution_id: String,
    events: mpsc::Sender<RuntimeEvent>,
}

impl Canceller {
    pub async fn cancel(&self) {
        if self.events.send(RuntimeEvent::CancelRequested).await.is_err() {
            debug!(execution = %self.execution_id, "cancel after execution finished");
        }
    }
}

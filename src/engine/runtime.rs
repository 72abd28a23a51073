// src/engine/runtime.rs

use std::fmt;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, trace, warn};

use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::dag::ScheduledJob;
use crate::dag::execution::{DagExecution, JobExecution};
use crate::errors::Result;
use crate::exec::ExecutorBackend;
use crate::types::CheckpointTrigger;

use super::core::CoreRuntime;
use super::options::{ExecuteOptions, JobCallback};
use super::{CoreCommand, RuntimeEvent};

/// Side effects the shell performs on behalf of the core: callbacks,
/// checkpoint persistence and status publication.
#[derive(Default)]
pub struct RuntimeHooks {
    pub on_job_complete: Option<JobCallback>,
    pub on_job_failed: Option<JobCallback>,
    pub checkpoint_store: Option<Arc<dyn CheckpointStore>>,
    pub status_tx: Option<watch::Sender<DagExecution>>,
}

impl RuntimeHooks {
    pub fn from_options(options: &ExecuteOptions) -> Self {
        Self {
            on_job_complete: options.on_job_complete.clone(),
            on_job_failed: options.on_job_failed.clone(),
            checkpoint_store: options.checkpoint_store.clone(),
            status_tx: None,
        }
    }

    pub fn with_status(mut self, tx: watch::Sender<DagExecution>) -> Self {
        self.status_tx = Some(tx);
        self
    }
}

impl fmt::Debug for RuntimeHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeHooks")
            .field("on_job_complete", &self.on_job_complete.is_some())
            .field("on_job_failed", &self.on_job_failed.is_some())
            .field("checkpoint_store", &self.checkpoint_store)
            .field("status_tx", &self.status_tx.is_some())
            .finish()
    }
}

/// Drives the scheduler in response to `RuntimeEvent`s,
/// and delegates handler execution to an `ExecutorBackend`.
///
/// This is a pure IO shell around `CoreRuntime`, which contains all the
/// scheduling semantics. This struct handles async IO: reading events from
/// channels, dispatching jobs to the executor, firing callbacks and writing
/// checkpoints.
pub struct Runtime<E: ExecutorBackend> {
    core: CoreRuntime,
    event_rx: mpsc::Receiver<RuntimeEvent>,
    executor: E,
    hooks: RuntimeHooks,
}

impl<E: ExecutorBackend> fmt::Debug for Runtime<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("core", &self.core)
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}

impl<E: ExecutorBackend> Runtime<E> {
    pub fn new(core: CoreRuntime, event_rx: mpsc::Receiver<RuntimeEvent>, executor: E) -> Self {
        Self {
            core,
            event_rx,
            executor,
            hooks: RuntimeHooks::default(),
        }
    }

    pub fn with_hooks(mut self, hooks: RuntimeHooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Main event loop.
    ///
    /// - Starts the execution and dispatches the first ready jobs.
    /// - Consumes `RuntimeEvent`s from `event_rx` and feeds them into the core.
    /// - Executes commands returned by the core.
    /// - Returns the final execution record once the core reports a terminal
    ///   status.
    pub async fn run(mut self) -> Result<DagExecution> {
        let execution_id = self.core.scheduler().execution().id.clone();
        info!(execution = %execution_id, "tunedag runtime started");

        let step = self.core.start();
        let mut keep_running = self.apply(step.commands, step.keep_running).await?;

        while keep_running {
            let Some(event) = self.event_rx.recv().await else {
                warn!(execution = %execution_id, "runtime event channel closed before the execution finished");
                break;
            };

            match event {
                RuntimeEvent::CheckpointRequested { label, reply } => {
                    self.manual_checkpoint(label, reply);
                    continue;
                }
                RuntimeEvent::JobLog { .. } => trace!(?event, "runtime received log line"),
                _ => debug!(?event, "runtime received event"),
            }

            let step = self.core.step(event);
            keep_running = self.apply(step.commands, step.keep_running).await?;
        }

        let execution = self.core.into_scheduler().into_execution();
        info!(
            execution = %execution.id,
            status = %execution.status,
            "runtime exiting"
        );
        Ok(execution)
    }

    async fn apply(&mut self, commands: Vec<CoreCommand>, keep_running: bool) -> Result<bool> {
        for command in commands {
            self.execute_command(command).await?;
        }
        self.publish_status();
        Ok(keep_running)
    }

    /// Execute a single command from the core.
    async fn execute_command(&mut self, command: CoreCommand) -> Result<()> {
        match command {
            CoreCommand::DispatchJobs(jobs) => {
                self.spawn_ready(jobs).await?;
            }
            CoreCommand::CancelRunning => {
                debug!("asking running handlers to stop");
                self.executor.cancel_running().await?;
            }
            CoreCommand::NotifyCompleted(records) => {
                notify(self.hooks.on_job_complete.as_ref(), &records);
            }
            CoreCommand::NotifyFailed(records) => {
                notify(self.hooks.on_job_failed.as_ref(), &records);
            }
            CoreCommand::TakeCheckpoint(trigger) => {
                self.automatic_checkpoint(trigger);
            }
            CoreCommand::Finish => {
                info!("core reported a terminal status");
            }
        }
        Ok(())
    }

    async fn spawn_ready(&mut self, jobs: Vec<ScheduledJob>) -> Result<()> {
        if jobs.is_empty() {
            return Ok(());
        }

        let ids: Vec<_> = jobs.iter().map(|j| j.job_id.as_str()).collect();
        let attempts: Vec<_> = jobs.iter().map(|j| j.attempt).collect();
        debug!(?ids, ?attempts, "spawning ready jobs");

        self.executor.spawn_ready_jobs(jobs).await
    }

    fn capture(&self, trigger: CheckpointTrigger, label: String) -> Result<Checkpoint> {
        let scheduler = self.core.scheduler();
        Checkpoint::capture(
            scheduler.execution(),
            scheduler.declarations().values(),
            trigger,
            label,
        )
    }

    fn automatic_checkpoint(&self, trigger: CheckpointTrigger) {
        let Some(store) = self.hooks.checkpoint_store.as_ref() else {
            return;
        };
        match self.capture(trigger, trigger.as_str().to_string()) {
            Ok(checkpoint) => self.save(store.as_ref(), &checkpoint),
            Err(e) => warn!(%trigger, error = %e, "failed to capture checkpoint"),
        }
    }

    fn manual_checkpoint(&self, label: String, reply: oneshot::Sender<Checkpoint>) {
        let checkpoint = match self.capture(CheckpointTrigger::Manual, label) {
            Ok(cp) => cp,
            Err(e) => {
                warn!(error = %e, "failed to capture manual checkpoint");
                return;
            }
        };
        if let Some(store) = self.hooks.checkpoint_store.as_ref() {
            self.save(store.as_ref(), &checkpoint);
        }
        if reply.send(checkpoint).is_err() {
            debug!("manual checkpoint requester went away");
        }
    }

    // A failed save is logged; the execution carries on.
    fn save(&self, store: &dyn CheckpointStore, checkpoint: &Checkpoint) {
        match store.save(checkpoint) {
            Ok(()) => info!(
                checkpoint = %checkpoint.id,
                trigger = %checkpoint.trigger,
                label = %checkpoint.label,
                "checkpoint saved"
            ),
            Err(e) => warn!(checkpoint = %checkpoint.id, error = %e, "failed to save checkpoint"),
        }
    }

    fn publish_status(&self) {
        if let Some(tx) = self.hooks.status_tx.as_ref() {
            tx.send_replace(self.core.scheduler().execution().clone());
        }
    }
}

fn notify(callback: Option<&JobCallback>, records: &[JobExecution]) {
    if let Some(callback) = callback {
        for record in records {
            callback(record);
        }
    }
}

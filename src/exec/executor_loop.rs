// src/exec/executor_loop.rs

//! Main executor loop that owns running handler tasks.

use std::collections::HashMap;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::dag::ScheduledJob;
use crate::engine::RuntimeEvent;
use crate::exec::job_runner::run_job;

/// Commands accepted by the executor loop.
#[derive(Debug)]
pub enum ExecutorCommand {
    /// Start one job attempt.
    Run(ScheduledJob),
    /// Signal every running attempt to stop cooperatively.
    CancelAll,
}

/// Internal handle for a currently-running job attempt.
///
/// - `cancel` flips to `true` when the attempt should stop; the runner holds
///   a clone and flips it itself on timeout.
/// - `handle` is the Tokio task running [`run_job`].
struct ActiveJob {
    attempt: u32,
    cancel: watch::Sender<bool>,
    handle: tokio::task::JoinHandle<()>,
}

/// Spawn the background executor loop.
///
/// The returned sender is what [`super::TokioExecutorBackend`] forwards
/// commands to. Each attempt runs in its own Tokio task and reports back to
/// the runtime on `runtime_tx`; the loop never waits on a handler.
pub fn spawn_executor(runtime_tx: mpsc::Sender<RuntimeEvent>) -> mpsc::Sender<ExecutorCommand> {
    let (tx, mut rx) = mpsc::channel::<ExecutorCommand>(64);

    tokio::spawn(async move {
        info!("executor loop started");

        // At most one ActiveJob per job id.
        let mut active: HashMap<String, ActiveJob> = HashMap::new();

        while let Some(command) = rx.recv().await {
            active.retain(|_, job| !job.handle.is_finished());

            match command {
                ExecutorCommand::Run(job) => start_job(job, &mut active, &runtime_tx),
                ExecutorCommand::CancelAll => cancel_all(&active),
            }
        }

        info!("executor loop finished (channel closed)");
    });

    tx
}

fn start_job(
    job: ScheduledJob,
    active: &mut HashMap<String, ActiveJob>,
    runtime_tx: &mpsc::Sender<RuntimeEvent>,
) {
    let job_id = job.job_id.clone();

    // A previous attempt (e.g. one that timed out) may still be running.
    if let Some(previous) = active.remove(&job_id) {
        debug!(
            job = %job_id,
            previous_attempt = previous.attempt,
            attempt = job.attempt,
            "signalling previous attempt to stop before retrying"
        );
        previous.cancel.send_replace(true);
    }

    // send_replace keeps a cancel that lands before the runner subscribes.
    let (cancel_tx, _) = watch::channel(false);
    let runner_cancel = cancel_tx.clone();
    let rt_tx = runtime_tx.clone();
    let attempt = job.attempt;
    let spawn_id = job_id.clone();

    let handle = tokio::spawn(async move {
        run_job(job, rt_tx, runner_cancel).await;
        debug!(job = %spawn_id, attempt, "job runner future finished");
    });

    active.insert(
        job_id,
        ActiveJob {
            attempt,
            cancel: cancel_tx,
            handle,
        },
    );
}

fn cancel_all(active: &HashMap<String, ActiveJob>) {
    info!(running = active.len(), "cancelling running job attempts");
    for (job_id, job) in active {
        job.cancel.send_replace(true);
        if job.cancel.is_closed() {
            debug!(job = %job_id, attempt = job.attempt, "attempt already finished while cancelling");
        }
    }
}

// src/exec/job_runner.rs

//! Runs one handler attempt and reports its outcome.

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::dag::ScheduledJob;
use crate::engine::{JobOutcome, RuntimeEvent};
use crate::exec::handler::JobContext;

/// Run a single attempt of a scheduled job and send exactly one
/// `JobFinished` event for it.
///
/// - The handler runs in its own Tokio task, so a panic is reported as a
///   failed attempt instead of taking the runner down.
/// - If the attempt has a timeout and the handler exceeds it, `cancel` is
///   set before the failure is reported, so [`JobContext::cancelled`]
///   resolves. The handler task is not aborted.
pub async fn run_job(
    job: ScheduledJob,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    cancel: watch::Sender<bool>,
) {
    let job_id = job.job_id.clone();
    let attempt = job.attempt;

    info!(
        job = %job_id,
        attempt,
        job_type = %job.job_type,
        "starting job attempt"
    );

    let ctx = JobContext::new(
        job.job_id.clone(),
        job.name.clone(),
        attempt,
        job.config.clone(),
        runtime_tx.clone(),
        cancel.subscribe(),
    );
    let future = job.handler.run(ctx);
    let mut handle = tokio::spawn(future);

    let joined = match job.timeout {
        Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
            Ok(joined) => joined,
            Err(_elapsed) => {
                warn!(job = %job_id, attempt, timeout = ?limit, "job attempt timed out");
                cancel.send_replace(true);
                send_outcome(
                    &runtime_tx,
                    job_id,
                    attempt,
                    JobOutcome::Failed(format!("timed out after {limit:?}")),
                )
                .await;
                return;
            }
        },
        None => (&mut handle).await,
    };

    let outcome = match joined {
        Ok(Ok(output)) => {
            info!(job = %job_id, attempt, "job attempt succeeded");
            JobOutcome::Success(output)
        }
        Ok(Err(err)) => {
            warn!(job = %job_id, attempt, error = %format!("{err:#}"), "job attempt failed");
            JobOutcome::Failed(format!("{err:#}"))
        }
        Err(join_err) if join_err.is_panic() => {
            error!(job = %job_id, attempt, "job handler panicked");
            JobOutcome::Failed(panic_message(join_err.into_panic()))
        }
        Err(join_err) => {
            error!(job = %job_id, attempt, error = %join_err, "job handler task did not complete");
            JobOutcome::Failed(format!("handler task did not complete: {join_err}"))
        }
    };

    send_outcome(&runtime_tx, job_id, attempt, outcome).await;
}

async fn send_outcome(
    runtime_tx: &mpsc::Sender<RuntimeEvent>,
    job: String,
    attempt: u32,
    outcome: JobOutcome,
) {
    let event = RuntimeEvent::JobFinished {
        job: job.clone(),
        attempt,
        outcome,
    };
    if runtime_tx.send(event).await.is_err() {
        debug!(job = %job, attempt, "runtime gone; dropping job outcome");
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("handler panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("handler panicked: {s}")
    } else {
        "handler panicked".to_string()
    }
}

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tunedag::dag::ScheduledJob;
use tunedag::engine::{JobOutcome, RuntimeEvent};
use tunedag::errors::Result;
use tunedag::exec::ExecutorBackend;

type Script = Arc<dyn Fn(&ScheduledJob) -> JobOutcome + Send + Sync>;

/// A fake executor that:
/// - records which `(job, attempt)` pairs were "run"
/// - immediately reports `JobFinished` with whatever the script returns.
///
/// Handlers attached to the scheduled jobs are never called.
pub struct FakeExecutor {
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    executed: Arc<Mutex<Vec<(String, u32)>>>,
    cancels: Arc<Mutex<usize>>,
    script: Script,
}

impl FakeExecutor {
    /// Every job succeeds with an empty object.
    pub fn new(
        runtime_tx: mpsc::Sender<RuntimeEvent>,
        executed: Arc<Mutex<Vec<(String, u32)>>>,
    ) -> Self {
        Self::scripted(runtime_tx, executed, |_| {
            JobOutcome::Success(serde_json::json!({}))
        })
    }

    pub fn scripted(
        runtime_tx: mpsc::Sender<RuntimeEvent>,
        executed: Arc<Mutex<Vec<(String, u32)>>>,
        script: impl Fn(&ScheduledJob) -> JobOutcome + Send + Sync + 'static,
    ) -> Self {
        Self {
            runtime_tx,
            executed,
            cancels: Arc::new(Mutex::new(0)),
            script: Arc::new(script),
        }
    }

    /// Number of `cancel_running` calls seen so far.
    pub fn cancel_count(&self) -> Arc<Mutex<usize>> {
        Arc::clone(&self.cancels)
    }
}

impl ExecutorBackend for FakeExecutor {
    fn spawn_ready_jobs(
        &mut self,
        jobs: Vec<ScheduledJob>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let tx = self.runtime_tx.clone();
        let executed = Arc::clone(&self.executed);
        let script = Arc::clone(&self.script);

        Box::pin(async move {
            for job in jobs {
                executed
                    .lock()
                    .unwrap()
                    .push((job.job_id.clone(), job.attempt));

                let outcome = script(&job);
                tx.send(RuntimeEvent::JobFinished {
                    job: job.job_id.clone(),
                    attempt: job.attempt,
                    outcome,
                })
                .await
                .map_err(anyhow::Error::from)?;
            }
            Ok(())
        })
    }

    fn cancel_running(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let cancels = Arc::clone(&self.cancels);
        Box::pin(async move {
            *cancels.lock().unwrap() += 1;
            Ok(())
        })
    }
}

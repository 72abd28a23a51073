//! Handlers for driving real executions in tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};
use tunedag::exec::{JobContext, JobHandler};

type OutputFn = Arc<dyn Fn(&JobContext) -> anyhow::Result<Value> + Send + Sync>;

/// Records which jobs started and how many ran at the same time.
#[derive(Debug, Clone, Default)]
pub struct ConcurrencyProbe {
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    started: Arc<Mutex<Vec<(String, u32)>>>,
}

impl ConcurrencyProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest number of overlapping invocations seen.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// `(job_id, attempt)` of every invocation, in start order.
    pub fn started(&self) -> Vec<(String, u32)> {
        self.started.lock().unwrap().clone()
    }

    pub fn started_ids(&self) -> Vec<String> {
        self.started().into_iter().map(|(id, _)| id).collect()
    }

    /// A handler that sleeps for `delay`, then returns `output(ctx)`.
    pub fn handler(
        &self,
        delay: Duration,
        output: impl Fn(&JobContext) -> anyhow::Result<Value> + Send + Sync + 'static,
    ) -> impl JobHandler + 'static {
        let probe = self.clone();
        let output: OutputFn = Arc::new(output);
        move |ctx: JobContext| {
            let probe = probe.clone();
            let output = Arc::clone(&output);
            async move {
                probe
                    .started
                    .lock()
                    .unwrap()
                    .push((ctx.job_id().to_string(), ctx.attempt()));
                let now = probe.current.fetch_add(1, Ordering::SeqCst) + 1;
                probe.peak.fetch_max(now, Ordering::SeqCst);

                tokio::time::sleep(delay).await;
                let result = output(&ctx);

                probe.current.fetch_sub(1, Ordering::SeqCst);
                result
            }
        }
    }

    /// A handler that sleeps for `delay` and succeeds with `{"job": id}`.
    pub fn ok_handler(&self, delay: Duration) -> impl JobHandler + 'static {
        self.handler(delay, |ctx| Ok(json!({ "job": ctx.job_id() })))
    }
}

/// Fails the first `failures` attempts of every job, then succeeds.
pub fn flaky(failures: u32) -> impl JobHandler + 'static {
    move |ctx: JobContext| async move {
        if ctx.attempt() <= failures {
            anyhow::bail!("transient failure on attempt {}", ctx.attempt());
        }
        Ok(json!({ "attempt": ctx.attempt() }))
    }
}

/// Reports the `metric` value found in the job's config under `metric`.
///
/// Fan-out templates put the grid value there, so each generated job
/// "scores" its own parameter.
pub fn echo_metric(metric: &'static str) -> impl JobHandler + 'static {
    move |ctx: JobContext| async move {
        let value = ctx
            .config()
            .get(metric)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("missing '{metric}' in config"))?;
        Ok::<_, anyhow::Error>(json!({ metric: value }))
    }
}

// src/exec/handler.rs

//! The handler contract user code implements, and the context it receives.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::engine::RuntimeEvent;
use crate::types::JobId;

/// Future returned by a handler: the job's output, or an error that counts
/// as a failed attempt.
pub type HandlerFuture = Pin<Box<dyn Future<Output = anyhow::Result<Value>> + Send + 'static>>;

/// Executable behaviour for one job type.
///
/// Implemented for any `Fn(JobContext) -> impl Future<Output = anyhow::Result<Value>>`,
/// so most handlers are plain async closures.
pub trait JobHandler: Send + Sync {
    fn run(&self, ctx: JobContext) -> HandlerFuture;
}

impl<F, Fut> JobHandler for F
where
    F: Fn(JobContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    fn run(&self, ctx: JobContext) -> HandlerFuture {
        Box::pin(self(ctx))
    }
}

/// Everything a handler may see or do while running one attempt.
///
/// Logging goes through the coordinator, which is the only writer of the
/// job's execution record.
#[derive(Debug, Clone)]
pub struct JobContext {
    job_id: JobId,
    name: String,
    attempt: u32,
    config: BTreeMap<String, Value>,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    cancel_rx: watch::Receiver<bool>,
}

impl JobContext {
    pub fn new(
        job_id: JobId,
        name: String,
        attempt: u32,
        config: BTreeMap<String, Value>,
        runtime_tx: mpsc::Sender<RuntimeEvent>,
        cancel_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            job_id,
            name,
            attempt,
            config,
            runtime_tx,
            cancel_rx,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 1-based attempt number.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn config(&self) -> &BTreeMap<String, Value> {
        &self.config
    }

    /// Convenience accessor for a string config entry.
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(Value::as_str)
    }

    /// Append a line to this job's log.
    pub async fn log(&self, line: impl Into<String>) {
        let event = RuntimeEvent::JobLog {
            job: self.job_id.clone(),
            attempt: self.attempt,
            line: line.into(),
        };
        if self.runtime_tx.send(event).await.is_err() {
            debug!(job = %self.job_id, "runtime gone; dropping log line");
        }
    }

    /// Whether the coordinator asked this attempt to stop.
    pub fn is_cancelled(&self) -> bool {
        *self.cancel_rx.borrow()
    }

    /// Resolves once cancellation is requested.
    ///
    /// Never resolves if the coordinator drops the signal without cancelling.
    pub async fn cancelled(&self) {
        let mut rx = self.cancel_rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

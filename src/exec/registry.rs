// src/exec/registry.rs

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::errors::{Result, TunedagError};
use crate::exec::handler::JobHandler;
use crate::types::{FAN_IN_TYPE, FAN_OUT_TYPE};

/// How the coordinator executes a job of a given type.
#[derive(Clone)]
pub enum Capability {
    /// User handler, run as an independent task.
    Handler(Arc<dyn JobHandler>),
    /// Built-in fan-out expansion.
    Expand,
    /// Built-in fan-in aggregation.
    Aggregate,
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Handler(_) => f.write_str("Handler(..)"),
            Capability::Expand => f.write_str("Expand"),
            Capability::Aggregate => f.write_str("Aggregate"),
        }
    }
}

/// Lookup table from job type to handler.
///
/// Populated before any execution starts, then shared read-only (behind an
/// `Arc`) by every execution.
#[derive(Clone, Default)]
pub struct JobRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<_> = self.handlers.keys().collect();
        types.sort();
        f.debug_struct("JobRegistry").field("types", &types).finish()
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `job_type`, replacing any previous handler.
    ///
    /// The reserved `fan-out` / `fan-in` types cannot be overridden.
    pub fn register_handler(
        &mut self,
        job_type: impl Into<String>,
        handler: impl JobHandler + 'static,
    ) -> Result<()> {
        let job_type = job_type.into();
        if job_type.trim().is_empty() {
            return Err(TunedagError::ConfigError(
                "cannot register a handler for an empty job type".to_string(),
            ));
        }
        if is_reserved(&job_type) {
            return Err(TunedagError::ConfigError(format!(
                "job type '{job_type}' is reserved"
            )));
        }

        debug!(job_type = %job_type, "registered job handler");
        self.handlers.insert(job_type, Arc::new(handler));
        Ok(())
    }

    pub fn resolve(&self, job_type: &str) -> Option<Capability> {
        match job_type {
            FAN_OUT_TYPE => Some(Capability::Expand),
            FAN_IN_TYPE => Some(Capability::Aggregate),
            other => self.handlers.get(other).cloned().map(Capability::Handler),
        }
    }

    pub fn contains(&self, job_type: &str) -> bool {
        is_reserved(job_type) || self.handlers.contains_key(job_type)
    }

    /// Registered (non-reserved) types, sorted.
    pub fn types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

fn is_reserved(job_type: &str) -> bool {
    job_type == FAN_OUT_TYPE || job_type == FAN_IN_TYPE
}

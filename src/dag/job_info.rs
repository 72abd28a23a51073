// src/dag/job_info.rs

//! Description of a job attempt handed from the scheduler to the executor.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::config::model::JobDeclaration;
use crate::exec::handler::JobHandler;
use crate::types::JobId;

/// A job attempt that the scheduler wants the executor to run now.
#[derive(Clone)]
pub struct ScheduledJob {
    pub job_id: JobId,
    pub name: String,
    pub job_type: String,
    pub config: BTreeMap<String, Value>,
    /// 1-based attempt number; results for other attempts are stale.
    pub attempt: u32,
    /// Per-attempt time limit, if any.
    pub timeout: Option<Duration>,
    pub handler: Arc<dyn JobHandler>,
}

impl ScheduledJob {
    pub fn from_declaration(
        decl: &JobDeclaration,
        attempt: u32,
        timeout: Option<Duration>,
        handler: Arc<dyn JobHandler>,
    ) -> Self {
        Self {
            job_id: decl.id.clone(),
            name: decl.display_name().to_string(),
            job_type: decl.job_type.clone(),
            config: decl.config.clone(),
            attempt,
            timeout,
            handler,
        }
    }
}

impl fmt::Debug for ScheduledJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledJob")
            .field("job_id", &self.job_id)
            .field("job_type", &self.job_type)
            .field("attempt", &self.attempt)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

// src/checkpoint/mod.rs

//! Checkpoints: persisted, replay-safe snapshots of an execution.
//!
//! - [`snapshot`] converts a [`DagExecution`] to and from JSON-safe form.
//! - [`validate`] checks a checkpoint's structure before resume.
//! - [`store`] holds the [`CheckpointStore`] trait and the memory / file
//!   implementations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::config::model::JobDeclaration;
use crate::dag::execution::DagExecution;
use crate::errors::Result;
use crate::types::CheckpointTrigger;

pub mod snapshot;
pub mod store;
pub mod validate;

pub use snapshot::{ExecutionSnapshot, deserialize, serialize, to_value};
pub use store::{CheckpointStore, FileCheckpointStore, InMemoryCheckpointStore, build_store};
pub use validate::{validate, validate_checkpoint, validate_value};

/// A stored snapshot of one execution plus the declarations needed to
/// resume scheduling it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub execution_id: String,
    pub label: String,
    pub trigger: CheckpointTrigger,
    /// Output of [`snapshot::to_value`].
    pub state: Value,
    /// Every declaration active at capture time, generated jobs included.
    pub declarations: Vec<JobDeclaration>,
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn capture<'a>(
        execution: &DagExecution,
        declarations: impl IntoIterator<Item = &'a JobDeclaration>,
        trigger: CheckpointTrigger,
        label: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            execution_id: execution.id.clone(),
            label: label.into(),
            trigger,
            state: snapshot::to_value(execution)?,
            declarations: declarations.into_iter().cloned().collect(),
            created_at: Utc::now(),
        })
    }

    /// Validate, then rebuild the execution this checkpoint describes.
    pub fn restore(&self) -> Result<DagExecution> {
        validate::validate_checkpoint(self)?;
        snapshot::deserialize(&self.state)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

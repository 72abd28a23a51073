// src/checkpoint/validate.rs

//! Structural validation of checkpoints before they are accepted for resume.
//!
//! Only the shape of the serialized state is checked: required fields and
//! their types, enum values, timestamp ordering and unique job keys. DAG
//! consistency (cycles, dangling dependencies) is re-checked separately
//! when the scheduler is rebuilt from the checkpoint.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::debug;

use crate::checkpoint::Checkpoint;
use crate::checkpoint::snapshot::parse_timestamp;
use crate::errors::{Result, TunedagError};
use crate::types::{DagStatus, JobStatus};

/// `true` if `checkpoint` may be used to resume.
pub fn validate(checkpoint: &Checkpoint) -> bool {
    match validate_checkpoint(checkpoint) {
        Ok(()) => true,
        Err(e) => {
            debug!(checkpoint = %checkpoint.id, error = %e, "checkpoint failed validation");
            false
        }
    }
}

/// Like [`validate`], but explains what is wrong.
pub fn validate_checkpoint(checkpoint: &Checkpoint) -> Result<()> {
    validate_state(&checkpoint.state)?;

    let state_id = checkpoint.state.get("id").and_then(Value::as_str);
    if state_id != Some(checkpoint.execution_id.as_str()) {
        return Err(invalid(format!(
            "execution_id '{}' does not match state.id {:?}",
            checkpoint.execution_id, state_id
        )));
    }
    Ok(())
}

/// Validate a raw checkpoint document (as read from storage).
pub fn validate_value(value: &Value) -> bool {
    let check = || -> Result<()> {
        let obj = as_object(value, "checkpoint")?;
        for field in ["id", "execution_id", "label", "trigger", "created_at"] {
            require_str(obj, field, "checkpoint")?;
        }
        if !obj.get("declarations").is_some_and(Value::is_array) {
            return Err(invalid("checkpoint.declarations must be an array"));
        }
        let state = obj
            .get("state")
            .ok_or_else(|| invalid("checkpoint.state is missing"))?;
        validate_state(state)?;
        if state.get("id") != obj.get("execution_id") {
            return Err(invalid("checkpoint.execution_id does not match state.id"));
        }
        Ok(())
    };
    check().is_ok()
}

/// Check the serialized execution state.
pub fn validate_state(state: &Value) -> Result<()> {
    let obj = as_object(state, "state")?;
    require_str(obj, "id", "state")?;
    require_str(obj, "name", "state")?;

    let status = require_str(obj, "status", "state")?;
    status
        .parse::<DagStatus>()
        .map_err(|e| invalid(format!("state.status: {e}")))?;

    let started = required_timestamp(obj, "started_at", "state")?;
    let completed = optional_timestamp(obj, "completed_at", "state")?;
    check_order(started, completed, "state")?;

    let jobs = obj
        .get("jobs")
        .ok_or_else(|| invalid("state.jobs is missing"))?
        .as_array()
        .ok_or_else(|| invalid("state.jobs must be an array of entries"))?;

    let mut keys = HashSet::with_capacity(jobs.len());
    for (idx, entry) in jobs.iter().enumerate() {
        let ctx = format!("state.jobs[{idx}]");
        let entry = as_object(entry, &ctx)?;
        let key = require_str(entry, "key", &ctx)?;
        if !keys.insert(key) {
            return Err(invalid(format!("duplicate job key '{key}'")));
        }
        let value = entry
            .get("value")
            .ok_or_else(|| invalid(format!("{ctx}.value is missing")))?;
        validate_job(key, value)?;
    }

    Ok(())
}

fn validate_job(key: &str, value: &Value) -> Result<()> {
    let ctx = format!("job '{key}'");
    let obj = as_object(value, &ctx)?;

    let job_id = require_str(obj, "job_id", &ctx)?;
    if job_id != key {
        return Err(invalid(format!("{ctx}: job_id '{job_id}' does not match its key")));
    }

    let status = require_str(obj, "status", &ctx)?;
    status
        .parse::<JobStatus>()
        .map_err(|e| invalid(format!("{ctx}: {e}")))?;

    let attempt = obj
        .get("attempt")
        .and_then(Value::as_u64)
        .ok_or_else(|| invalid(format!("{ctx}: attempt must be a non-negative integer")))?;
    if u32::try_from(attempt).is_err() {
        return Err(invalid(format!("{ctx}: attempt {attempt} is out of range")));
    }

    let started = optional_timestamp(obj, "started_at", &ctx)?;
    let completed = optional_timestamp(obj, "completed_at", &ctx)?;
    if let (Some(started), Some(completed)) = (started, completed) {
        if completed < started {
            return Err(invalid(format!("{ctx}: completed_at precedes started_at")));
        }
    }

    match obj.get("error") {
        None | Some(Value::Null) | Some(Value::String(_)) => {}
        Some(_) => return Err(invalid(format!("{ctx}: error must be a string or null"))),
    }

    let logs = obj
        .get("logs")
        .and_then(Value::as_array)
        .ok_or_else(|| invalid(format!("{ctx}: logs must be an array")))?;
    if !logs.iter().all(Value::is_string) {
        return Err(invalid(format!("{ctx}: logs must contain only strings")));
    }

    Ok(())
}

fn invalid(msg: impl Into<String>) -> TunedagError {
    TunedagError::Checkpoint(msg.into())
}

fn as_object<'a>(value: &'a Value, ctx: &str) -> Result<&'a Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| invalid(format!("{ctx} must be an object")))
}

fn require_str<'a>(obj: &'a Map<String, Value>, field: &str, ctx: &str) -> Result<&'a str> {
    obj.get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| invalid(format!("{ctx}.{field} must be a string")))
}

fn required_timestamp(obj: &Map<String, Value>, field: &str, ctx: &str) -> Result<DateTime<Utc>> {
    parse_timestamp(require_str(obj, field, ctx)?)
}

fn optional_timestamp(
    obj: &Map<String, Value>,
    field: &str,
    ctx: &str,
) -> Result<Option<DateTime<Utc>>> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(raw)) => parse_timestamp(raw).map(Some),
        Some(_) => Err(invalid(format!("{ctx}.{field} must be a timestamp string or null"))),
    }
}

fn check_order(
    started: DateTime<Utc>,
    completed: Option<DateTime<Utc>>,
    ctx: &str,
) -> Result<()> {
    match completed {
        Some(completed) if completed < started => Err(invalid(format!(
            "{ctx}.completed_at precedes started_at"
        ))),
        _ => Ok(()),
    }
}

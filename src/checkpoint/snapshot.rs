// src/checkpoint/snapshot.rs

//! JSON-safe snapshot of a [`DagExecution`] and its exact inverse.
//!
//! Timestamps are RFC 3339 strings (UTC, `Z` suffix, only as many fractional
//! digits as needed so nothing is lost). The job map is written as an ordered
//! list of `{ "key", "value" }` entries so that reading a snapshot never
//! depends on the iteration order of a JSON object.

use chrono::{DateTime, SecondsFormat, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::dag::execution::{DagExecution, JobExecution};
use crate::errors::{Result, TunedagError};
use crate::types::{DagStatus, JobStatus};

/// Serialized form of a [`DagExecution`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSnapshot {
    pub id: String,
    pub name: String,
    pub status: DagStatus,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub jobs: Vec<JobEntry>,
}

/// One entry of the ordered job map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEntry {
    pub key: String,
    pub value: JobSnapshot,
}

/// Serialized form of a [`JobExecution`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub job_id: String,
    pub status: JobStatus,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub attempt: u32,
    /// Absent when the job has no output; `null` when the output *is* null.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_some"
    )]
    pub output: Option<Value>,
    pub error: Option<String>,
    pub logs: Vec<String>,
}

/// Distinguish a present `null` from a missing field.
fn deserialize_some<'de, D>(deserializer: D) -> std::result::Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// Canonical timestamp representation.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| TunedagError::Checkpoint(format!("invalid timestamp '{raw}': {e}")))
}

fn parse_optional(raw: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    raw.map(parse_timestamp).transpose()
}

/// Convert an execution into its snapshot form.
pub fn serialize(execution: &DagExecution) -> ExecutionSnapshot {
    ExecutionSnapshot {
        id: execution.id.clone(),
        name: execution.name.clone(),
        status: execution.status,
        started_at: format_timestamp(&execution.started_at),
        completed_at: execution.completed_at.as_ref().map(format_timestamp),
        jobs: execution
            .jobs
            .iter()
            .map(|(key, job)| JobEntry {
                key: key.clone(),
                value: serialize_job(job),
            })
            .collect(),
    }
}

fn serialize_job(job: &JobExecution) -> JobSnapshot {
    JobSnapshot {
        job_id: job.job_id.clone(),
        status: job.status,
        started_at: job.started_at.as_ref().map(format_timestamp),
        completed_at: job.completed_at.as_ref().map(format_timestamp),
        attempt: job.attempt,
        output: job.output.clone(),
        error: job.error.clone(),
        logs: job.logs.clone(),
    }
}

/// Snapshot as a plain JSON value, ready to store.
pub fn to_value(execution: &DagExecution) -> Result<Value> {
    Ok(serde_json::to_value(serialize(execution))?)
}

/// Rebuild an execution from a snapshot value.
///
/// Unknown enum values, malformed timestamps and duplicate job keys are
/// rejected.
pub fn deserialize(value: &Value) -> Result<DagExecution> {
    let snapshot = ExecutionSnapshot::deserialize(value)
        .map_err(|e| TunedagError::Checkpoint(format!("unrecognized snapshot shape: {e}")))?;
    from_snapshot(snapshot)
}

pub fn from_snapshot(snapshot: ExecutionSnapshot) -> Result<DagExecution> {
    let mut jobs = IndexMap::with_capacity(snapshot.jobs.len());
    for entry in snapshot.jobs {
        let job = JobExecution {
            job_id: entry.value.job_id,
            status: entry.value.status,
            started_at: parse_optional(entry.value.started_at.as_deref())?,
            completed_at: parse_optional(entry.value.completed_at.as_deref())?,
            attempt: entry.value.attempt,
            output: entry.value.output,
            error: entry.value.error,
            logs: entry.value.logs,
        };
        if jobs.insert(entry.key.clone(), job).is_some() {
            return Err(TunedagError::Checkpoint(format!(
                "duplicate job key '{}' in snapshot",
                entry.key
            )));
        }
    }

    Ok(DagExecution {
        id: snapshot.id,
        name: snapshot.name,
        status: snapshot.status,
        started_at: parse_timestamp(&snapshot.started_at)?,
        completed_at: parse_optional(snapshot.completed_at.as_deref())?,
        jobs,
    })
}

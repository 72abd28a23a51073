use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Canonical job identifier type used throughout the crate.
pub type JobId = String;

/// Reserved job type for parameter-grid expansion.
pub const FAN_OUT_TYPE: &str = "fan-out";

/// Reserved job type for aggregating a fan-out's children.
pub const FAN_IN_TYPE: &str = "fan-in";

/// Lifecycle of a single job inside an execution.
///
/// `pending -> running -> {completed | failed}`; a failed job may re-enter
/// `running` while it still has attempts left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("invalid job status: {other}")),
        }
    }
}

/// Lifecycle of a whole DAG execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DagStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl DagStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DagStatus::Pending => "pending",
            DagStatus::Running => "running",
            DagStatus::Completed => "completed",
            DagStatus::Failed => "failed",
            DagStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DagStatus::Completed | DagStatus::Failed | DagStatus::Cancelled
        )
    }
}

impl fmt::Display for DagStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DagStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DagStatus::Pending),
            "running" => Ok(DagStatus::Running),
            "completed" => Ok(DagStatus::Completed),
            "failed" => Ok(DagStatus::Failed),
            "cancelled" => Ok(DagStatus::Cancelled),
            other => Err(format!("invalid execution status: {other}")),
        }
    }
}

/// What a fan-in does when some of its fan-out children failed.
///
/// - `BestEffort`: aggregate over the completed subset (default).
/// - `RequireAll`: fail the fan-in as soon as any child failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FanInPolicy {
    #[default]
    BestEffort,
    RequireAll,
}

impl FromStr for FanInPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "best_effort" | "best-effort" => Ok(FanInPolicy::BestEffort),
            "require_all" | "require-all" => Ok(FanInPolicy::RequireAll),
            other => Err(format!(
                "invalid fan_in_policy: {other} (expected \"best_effort\" or \"require_all\")"
            )),
        }
    }
}

/// What happens to running jobs when an execution is cancelled.
///
/// Both variants signal running handlers to abort cooperatively.
/// - `Drain`: wait for running handlers to report before finishing.
/// - `Abandon`: record running jobs as failed and finish immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CancelBehaviour {
    #[default]
    Drain,
    Abandon,
}

/// Mode for storing checkpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointStorageMode {
    /// One JSON file per checkpoint under `checkpoint_dir`.
    File,
    /// Kept in memory only (lost on restart).
    #[default]
    Memory,
}

/// Why a checkpoint was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointTrigger {
    Manual,
    Periodic,
    OnCompletion,
    OnFailure,
    OnCancel,
}

impl CheckpointTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            CheckpointTrigger::Manual => "manual",
            CheckpointTrigger::Periodic => "periodic",
            CheckpointTrigger::OnCompletion => "on_completion",
            CheckpointTrigger::OnFailure => "on_failure",
            CheckpointTrigger::OnCancel => "on_cancel",
        }
    }

    /// Automatic trigger matching a terminal execution status.
    pub fn for_terminal(status: DagStatus) -> Option<Self> {
        match status {
            DagStatus::Completed => Some(CheckpointTrigger::OnCompletion),
            DagStatus::Failed => Some(CheckpointTrigger::OnFailure),
            DagStatus::Cancelled => Some(CheckpointTrigger::OnCancel),
            DagStatus::Pending | DagStatus::Running => None,
        }
    }
}

impl fmt::Display for CheckpointTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parse a compact duration string such as `"500ms"`, `"30s"`, `"5m"`, `"2h"`.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| "duration missing unit suffix".to_string())?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{}': {}", num_part, e))?;
    let unit = unit_part.trim().to_lowercase();

    match unit.as_str() {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 60 * 60)),
        _ => Err(format!(
            "unsupported duration unit '{}'; expected ms, s, m, or h",
            unit
        )),
    }
}

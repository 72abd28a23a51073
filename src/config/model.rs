// src/config/model.rs

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{
    CancelBehaviour, CheckpointStorageMode, FAN_IN_TYPE, FAN_OUT_TYPE, FanInPolicy, JobId,
    parse_duration,
};

/// Pipeline file exactly as deserialized from TOML, before validation.
///
/// ```toml
/// [config]
/// parallelism = 2
/// max_attempts = 3
///
/// [[job]]
/// id = "prepare"
/// type = "shell"
/// config = { cmd = "python prepare.py" }
///
/// [[job]]
/// id = "sweep"
/// type = "fan-out"
/// depends_on = ["prepare"]
///
/// [job.fan_out]
/// parameters = [{ name = "lr", values = [0.1, 0.01] }]
///
/// [job.fan_out.template]
/// name = "train lr=${lr}"
/// type = "shell"
/// config = { cmd = "python train.py --lr ${lr}" }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct RawPipelineFile {
    #[serde(default)]
    pub config: ConfigSection,

    /// All `[[job]]` tables, in file order.
    #[serde(default, rename = "job")]
    pub jobs: Vec<JobDeclaration>,
}

/// A validated pipeline file.
///
/// Only obtainable through `TryFrom<RawPipelineFile>` (see `config::validate`),
/// so holding one means ids are unique, dependencies resolve and the graph is
/// acyclic.
#[derive(Debug, Clone)]
pub struct PipelineFile {
    config: ConfigSection,
    jobs: Vec<JobDeclaration>,
}

impl PipelineFile {
    pub(crate) fn new_unchecked(config: ConfigSection, jobs: Vec<JobDeclaration>) -> Self {
        Self { config, jobs }
    }

    pub fn config(&self) -> &ConfigSection {
        &self.config
    }

    pub fn jobs(&self) -> &[JobDeclaration] {
        &self.jobs
    }

    pub fn into_parts(self) -> (ConfigSection, Vec<JobDeclaration>) {
        (self.config, self.jobs)
    }
}

/// `[config]` section: execution-wide scheduling behaviour.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigSection {
    /// Maximum number of simultaneously running jobs.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,

    /// Reuse the output of an earlier job in the same execution whose type
    /// and configuration are identical.
    #[serde(default)]
    pub enable_cache: bool,

    /// Attempts per job before a failure becomes permanent.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Default per-attempt timeout (e.g. `"30m"`); unset means no timeout.
    #[serde(default)]
    pub job_timeout: Option<String>,

    #[serde(default)]
    pub fan_in_policy: FanInPolicy,

    /// Stop dispatching as soon as any job fails permanently.
    #[serde(default)]
    pub fail_fast: bool,

    #[serde(default)]
    pub cancel_behaviour: CancelBehaviour,

    #[serde(default)]
    pub checkpoint_storage: CheckpointStorageMode,

    /// Directory used when `checkpoint_storage = "file"`.
    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: String,

    /// Take a periodic checkpoint after this many job completions.
    #[serde(default)]
    pub checkpoint_every: Option<usize>,
}

fn default_parallelism() -> usize {
    4
}

fn default_max_attempts() -> u32 {
    1
}

fn default_checkpoint_dir() -> String {
    ".tunedag/checkpoints".to_string()
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            enable_cache: false,
            max_attempts: default_max_attempts(),
            job_timeout: None,
            fan_in_policy: FanInPolicy::default(),
            fail_fast: false,
            cancel_behaviour: CancelBehaviour::default(),
            checkpoint_storage: CheckpointStorageMode::default(),
            checkpoint_dir: default_checkpoint_dir(),
            checkpoint_every: None,
        }
    }
}

/// One unit of work in a pipeline.
///
/// Declarations are immutable once an execution starts. Jobs generated by a
/// fan-out are declarations too; they carry `generated_by`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDeclaration {
    /// Unique within an execution.
    pub id: JobId,

    /// Display name; empty means "use the id".
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    /// Registry key, or one of the reserved `fan-out` / `fan-in` types.
    #[serde(rename = "type")]
    pub job_type: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<JobId>,

    /// Opaque handler configuration.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fan_out: Option<FanOutSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fan_in: Option<FanInSpec>,

    /// Id of the fan-out job that generated this declaration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_by: Option<JobId>,

    /// Per-job override of `[config].max_attempts`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,

    /// Per-job override of `[config].job_timeout`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
}

impl JobDeclaration {
    pub fn new(id: impl Into<JobId>, job_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            job_type: job_type.into(),
            depends_on: Vec::new(),
            config: BTreeMap::new(),
            fan_out: None,
            fan_in: None,
            generated_by: None,
            max_attempts: None,
            timeout: None,
        }
    }

    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }

    pub fn is_fan_out(&self) -> bool {
        self.job_type == FAN_OUT_TYPE
    }

    pub fn is_fan_in(&self) -> bool {
        self.job_type == FAN_IN_TYPE
    }

    /// Dependencies including the implicit edge from a fan-in to its source.
    pub fn all_dependencies(&self) -> Vec<&str> {
        let mut deps: Vec<&str> = self.depends_on.iter().map(String::as_str).collect();
        if let Some(fan_in) = &self.fan_in {
            if !deps.contains(&fan_in.source.as_str()) {
                deps.push(fan_in.source.as_str());
            }
        }
        deps
    }

    pub fn effective_max_attempts(&self, default: u32) -> u32 {
        self.max_attempts.unwrap_or(default)
    }

    /// Per-job timeout if set, otherwise `default`.
    pub fn effective_timeout(&self, default: Option<Duration>) -> Result<Option<Duration>, String> {
        match &self.timeout {
            Some(raw) => parse_duration(raw).map(Some),
            None => Ok(default),
        }
    }
}

/// `[job.fan_out]`: a parameter grid and the template each combination fills.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FanOutSpec {
    pub template: JobTemplate,
    pub parameters: Vec<ParameterSet>,
}

/// Shape of a generated job. `${param}` placeholders in `name` and in string
/// configuration values are substituted per combination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobTemplate {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(rename = "type")]
    pub job_type: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
}

impl JobTemplate {
    pub fn new(job_type: impl Into<String>) -> Self {
        Self {
            name: String::new(),
            job_type: job_type.into(),
            config: BTreeMap::new(),
            max_attempts: None,
            timeout: None,
        }
    }
}

/// One grid dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSet {
    pub name: String,
    pub values: Vec<Value>,
}

/// `[job.fan_in]`: which fan-out to wait for and how to reduce its children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FanInSpec {
    /// Id of the fan-out job whose generated jobs are aggregated.
    pub source: JobId,

    pub aggregation: AggregationSpec,
}

pub const BEST_METRIC_STRATEGY: &str = "best-metric";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationSpec {
    #[serde(default = "default_strategy")]
    pub strategy: String,

    /// Output field compared by `best-metric`; dotted paths reach into
    /// nested objects (`"metrics.accuracy"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric_name: Option<String>,

    /// `true` selects the minimum, `false` the maximum.
    #[serde(default)]
    pub ascending: bool,
}

fn default_strategy() -> String {
    BEST_METRIC_STRATEGY.to_string()
}

impl AggregationSpec {
    pub fn best_metric(metric_name: impl Into<String>, ascending: bool) -> Self {
        Self {
            strategy: default_strategy(),
            metric_name: Some(metric_name.into()),
            ascending,
        }
    }
}

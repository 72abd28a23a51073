#![allow(dead_code)]

use serde_json::{Value, json};
use tunedag::config::{
    AggregationSpec, ConfigSection, FanInSpec, FanOutSpec, JobDeclaration, JobTemplate,
    ParameterSet, PipelineFile, RawPipelineFile,
};

/// Builder for a validated `PipelineFile`.
pub struct PipelineBuilder {
    raw: RawPipelineFile,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self {
            raw: RawPipelineFile {
                config: ConfigSection::default(),
                jobs: Vec::new(),
            },
        }
    }

    pub fn parallelism(mut self, n: usize) -> Self {
        self.raw.config.parallelism = n;
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.raw.config.max_attempts = n;
        self
    }

    pub fn with_job(mut self, job: JobDeclaration) -> Self {
        self.raw.jobs.push(job);
        self
    }

    pub fn raw(self) -> RawPipelineFile {
        self.raw
    }

    pub fn build(self) -> PipelineFile {
        PipelineFile::try_from(self.raw).expect("Failed to build valid pipeline from builder")
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for one `JobDeclaration`.
pub struct JobBuilder {
    job: JobDeclaration,
}

impl JobBuilder {
    pub fn new(id: &str, job_type: &str) -> Self {
        Self {
            job: JobDeclaration::new(id, job_type),
        }
    }

    /// A `fan-out` job over the given `(parameter, values)` grid whose
    /// generated jobs have type `template_type`.
    pub fn fan_out(id: &str, template_type: &str, grid: &[(&str, Vec<Value>)]) -> Self {
        let mut job = JobDeclaration::new(id, tunedag::types::FAN_OUT_TYPE);
        job.fan_out = Some(FanOutSpec {
            template: JobTemplate::new(template_type),
            parameters: grid
                .iter()
                .map(|(name, values)| ParameterSet {
                    name: name.to_string(),
                    values: values.clone(),
                })
                .collect(),
        });
        Self { job }
    }

    /// A `fan-in` job selecting the best `metric` among `source`'s children.
    pub fn fan_in(id: &str, source: &str, metric: &str, ascending: bool) -> Self {
        let mut job = JobDeclaration::new(id, tunedag::types::FAN_IN_TYPE);
        job.fan_in = Some(FanInSpec {
            source: source.to_string(),
            aggregation: AggregationSpec::best_metric(metric, ascending),
        });
        Self { job }
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.job.depends_on.push(dep.to_string());
        self
    }

    pub fn name(mut self, name: &str) -> Self {
        self.job.name = name.to_string();
        self
    }

    pub fn config(mut self, key: &str, value: Value) -> Self {
        self.job.config.insert(key.to_string(), value);
        self
    }

    /// Set a template config entry on a fan-out job.
    pub fn template_config(mut self, key: &str, value: Value) -> Self {
        if let Some(spec) = self.job.fan_out.as_mut() {
            spec.template.config.insert(key.to_string(), value);
        }
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.job.max_attempts = Some(n);
        self
    }

    pub fn timeout(mut self, raw: &str) -> Self {
        self.job.timeout = Some(raw.to_string());
        self
    }

    pub fn build(self) -> JobDeclaration {
        self.job
    }
}

/// Shorthand for a config value.
pub fn cfg(v: impl Into<Value>) -> Value {
    v.into()
}

/// `{"metric": value}` shaped output, as a training job would report.
pub fn metric_output(metric: &str, value: f64) -> Value {
    json!({ metric: value })
}

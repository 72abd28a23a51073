// src/dag/fan_in.rs

//! Fan-in aggregation over the jobs generated by a fan-out.

use indexmap::IndexMap;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::config::model::{AggregationSpec, BEST_METRIC_STRATEGY, JobDeclaration};
use crate::dag::execution::JobExecution;
use crate::dag::fan_out::generated_ids;
use crate::errors::{Result, TunedagError};
use crate::types::{FanInPolicy, JobId, JobStatus};

/// One completed child's output, as handed to a strategy.
#[derive(Debug, Clone, Copy)]
pub struct ChildOutput<'a> {
    pub job_id: &'a str,
    pub output: &'a Value,
}

/// Reduces an ordered list of child outputs into a single value.
pub trait AggregationStrategy: Send + Sync {
    fn name(&self) -> &str;

    fn aggregate(&self, inputs: &[ChildOutput<'_>]) -> Result<Value>;
}

/// Select the child with the extreme value of one metric.
///
/// Maximum when `ascending` is false, minimum when true. Ties keep the first
/// child in iteration order. Children without a numeric metric are skipped.
///
/// The result is the winner's output object plus the reserved keys in
/// [`BestMetric::RESERVED_KEYS`]. Those always hold the aggregate values: a
/// child key with the same name is overwritten. A non-object output is
/// nested under `output`.
#[derive(Debug, Clone)]
pub struct BestMetric {
    pub metric_name: String,
    pub ascending: bool,
}

impl BestMetric {
    pub const RESERVED_KEYS: [&'static str; 4] =
        ["strategy", "input_count", "aggregated_result", "selected_job_id"];
}

impl AggregationStrategy for BestMetric {
    fn name(&self) -> &str {
        BEST_METRIC_STRATEGY
    }

    fn aggregate(&self, inputs: &[ChildOutput<'_>]) -> Result<Value> {
        let mut best: Option<(ChildOutput<'_>, f64)> = None;

        for child in inputs {
            let Some(metric) = read_metric(child.output, &self.metric_name) else {
                debug!(
                    job = %child.job_id,
                    metric = %self.metric_name,
                    "child output has no numeric metric; skipping"
                );
                continue;
            };

            let better = match best {
                None => true,
                Some((_, current)) if self.ascending => metric < current,
                Some((_, current)) => metric > current,
            };
            if better {
                best = Some((*child, metric));
            }
        }

        let (winner, metric) = best.ok_or_else(|| {
            TunedagError::Aggregation(format!(
                "none of {} completed children reported metric '{}'",
                inputs.len(),
                self.metric_name
            ))
        })?;

        let mut result = match winner.output {
            Value::Object(map) => map.clone(),
            other => {
                let mut map = Map::new();
                map.insert("output".to_string(), other.clone());
                map
            }
        };
        let aggregate = [
            json!(self.name()),
            json!(inputs.len()),
            json!(metric),
            json!(winner.job_id),
        ];
        for (key, value) in Self::RESERVED_KEYS.into_iter().zip(aggregate) {
            if let Some(shadowed) = result.insert(key.to_string(), value) {
                debug!(job = %winner.job_id, key, shadowed = %shadowed, "child output key replaced by aggregate field");
            }
        }

        Ok(Value::Object(result))
    }
}

/// Look up `metric_name` in an output; dots descend into nested objects.
fn read_metric(output: &Value, metric_name: &str) -> Option<f64> {
    if let Some(v) = output.get(metric_name) {
        return v.as_f64().filter(|m| !m.is_nan());
    }
    let mut current = output;
    for part in metric_name.split('.') {
        current = current.get(part)?;
    }
    current.as_f64().filter(|m| !m.is_nan())
}

/// Build the strategy named by an aggregation spec.
pub fn strategy_for(spec: &AggregationSpec) -> Result<Box<dyn AggregationStrategy>> {
    match spec.strategy.as_str() {
        BEST_METRIC_STRATEGY => {
            let metric_name = spec.metric_name.clone().ok_or_else(|| {
                TunedagError::Aggregation(format!(
                    "strategy '{BEST_METRIC_STRATEGY}' requires metric_name"
                ))
            })?;
            Ok(Box::new(BestMetric {
                metric_name,
                ascending: spec.ascending,
            }))
        }
        other => Err(TunedagError::Aggregation(format!(
            "unknown aggregation strategy '{other}'"
        ))),
    }
}

/// Run a fan-in declaration against the current execution records.
///
/// The caller must only invoke this once the resolver reports the fan-in as
/// ready, i.e. every child is terminal.
pub fn aggregate(
    decl: &JobDeclaration,
    executions: &IndexMap<JobId, JobExecution>,
    policy: FanInPolicy,
) -> Result<Value> {
    let spec = decl.fan_in.as_ref().ok_or_else(|| {
        TunedagError::Aggregation(format!("job '{}' has no fan_in section", decl.id))
    })?;

    let children = executions
        .get(&spec.source)
        .and_then(|exec| exec.output.as_ref())
        .and_then(generated_ids)
        .ok_or_else(|| {
            TunedagError::Aggregation(format!(
                "fan-out '{}' has not recorded its generated jobs",
                spec.source
            ))
        })?;

    let failed: Vec<&str> = children
        .iter()
        .filter(|id| {
            executions
                .get(id.as_str())
                .is_some_and(|e| e.status == JobStatus::Failed)
        })
        .map(String::as_str)
        .collect();

    if policy == FanInPolicy::RequireAll && !failed.is_empty() {
        return Err(TunedagError::Aggregation(format!(
            "{} of {} children of '{}' failed: {}",
            failed.len(),
            children.len(),
            spec.source,
            failed.join(", ")
        )));
    }

    let inputs: Vec<ChildOutput<'_>> = children
        .iter()
        .filter_map(|id| {
            let exec = executions.get(id.as_str())?;
            if exec.status != JobStatus::Completed {
                return None;
            }
            Some(ChildOutput {
                job_id: exec.job_id.as_str(),
                output: exec.output.as_ref()?,
            })
        })
        .collect();

    if inputs.is_empty() {
        return Err(TunedagError::Aggregation(format!(
            "no completed children of '{}' to aggregate ({} failed)",
            spec.source,
            failed.len()
        )));
    }

    strategy_for(&spec.aggregation)?.aggregate(&inputs)
}

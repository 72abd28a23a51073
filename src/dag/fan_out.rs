// src/dag/fan_out.rs

//! Fan-out expansion: one generated job per combination of a parameter grid.

use std::collections::BTreeMap;

use serde_json::{Map, Value, json};

use crate::config::model::{FanOutSpec, JobDeclaration};
use crate::errors::{Result, TunedagError};
use crate::types::JobId;

/// Output key listing the generated job ids; read by the fan-in.
pub const GENERATED_JOB_IDS_KEY: &str = "generated_job_ids";

/// Result of expanding one fan-out declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct Expansion {
    /// Generated declarations in combination order.
    pub jobs: Vec<JobDeclaration>,
    /// Output recorded on the fan-out job itself.
    pub output: Value,
}

/// Deterministic id for the `index`-th combination of `fan_out_id`.
pub fn generated_job_id(fan_out_id: &str, index: usize) -> JobId {
    format!("{fan_out_id}-{index}")
}

/// Generated job ids recorded in a fan-out's output.
pub fn generated_ids(output: &Value) -> Option<Vec<JobId>> {
    output
        .get(GENERATED_JOB_IDS_KEY)?
        .as_array()?
        .iter()
        .map(|v| v.as_str().map(str::to_string))
        .collect()
}

/// Expand a fan-out declaration into its generated jobs.
///
/// Combinations follow the cartesian product in parameter order, then value
/// order (the last parameter varies fastest). Generated jobs depend on
/// exactly what the fan-out depended on. Expanding the same declaration
/// twice yields identical ids.
pub fn expand(decl: &JobDeclaration) -> Result<Expansion> {
    let spec = decl.fan_out.as_ref().ok_or_else(|| {
        TunedagError::Expansion(format!("job '{}' has no fan_out section", decl.id))
    })?;

    if spec.parameters.is_empty() {
        return Err(TunedagError::Expansion(format!(
            "job '{}' has an empty parameter set",
            decl.id
        )));
    }
    if let Some(empty) = spec.parameters.iter().find(|p| p.values.is_empty()) {
        return Err(TunedagError::Expansion(format!(
            "job '{}' parameter '{}' has no values",
            decl.id, empty.name
        )));
    }

    let combinations = cartesian_indices(spec);
    let mut jobs = Vec::with_capacity(combinations.len());
    let mut bindings_out = Vec::with_capacity(combinations.len());

    for (index, combo) in combinations.iter().enumerate() {
        let bindings: Vec<(&str, &Value)> = spec
            .parameters
            .iter()
            .zip(combo)
            .map(|(param, &value_idx)| (param.name.as_str(), &param.values[value_idx]))
            .collect();

        let job = instantiate(decl, spec, index, &bindings)?;

        let mut binding_obj = Map::new();
        for (name, value) in &bindings {
            binding_obj.insert((*name).to_string(), (*value).clone());
        }
        bindings_out.push(Value::Object(binding_obj));
        jobs.push(job);
    }

    let ids: Vec<&str> = jobs.iter().map(|j| j.id.as_str()).collect();
    let output = json!({
        GENERATED_JOB_IDS_KEY: ids,
        "dimensions": spec.parameters.iter().map(|p| p.values.len()).collect::<Vec<_>>(),
        "parameter_names": spec.parameters.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(),
        "combinations": jobs.len(),
        "parameters": bindings_out,
    });

    Ok(Expansion { jobs, output })
}

/// Odometer over value indices; the last parameter varies fastest.
fn cartesian_indices(spec: &FanOutSpec) -> Vec<Vec<usize>> {
    let sizes: Vec<usize> = spec.parameters.iter().map(|p| p.values.len()).collect();
    let total: usize = sizes.iter().product();

    let mut out = Vec::with_capacity(total);
    let mut current = vec![0usize; sizes.len()];
    for _ in 0..total {
        out.push(current.clone());
        for pos in (0..sizes.len()).rev() {
            current[pos] += 1;
            if current[pos] < sizes[pos] {
                break;
            }
            current[pos] = 0;
        }
    }
    out
}

fn instantiate(
    decl: &JobDeclaration,
    spec: &FanOutSpec,
    index: usize,
    bindings: &[(&str, &Value)],
) -> Result<JobDeclaration> {
    let template = &spec.template;
    let wrap = |e: String| {
        TunedagError::Expansion(format!("job '{}' template: {e}", decl.id))
    };

    let name = if template.name.is_empty() {
        format!("{} #{index}", decl.display_name())
    } else {
        substitute_str(&template.name, bindings).map_err(wrap)?
    };

    let mut config = BTreeMap::new();
    for (key, value) in &template.config {
        config.insert(key.clone(), substitute_value(value, bindings).map_err(wrap)?);
    }

    Ok(JobDeclaration {
        id: generated_job_id(&decl.id, index),
        name,
        job_type: template.job_type.clone(),
        depends_on: decl.depends_on.clone(),
        config,
        fan_out: None,
        fan_in: None,
        generated_by: Some(decl.id.clone()),
        max_attempts: template.max_attempts.or(decl.max_attempts),
        timeout: template.timeout.clone().or_else(|| decl.timeout.clone()),
    })
}

/// Substitute placeholders inside a config value.
///
/// A string consisting of exactly one placeholder takes the parameter's typed
/// value (`"${lr}"` becomes `0.01`, not `"0.01"`).
fn substitute_value(value: &Value, bindings: &[(&str, &Value)]) -> std::result::Result<Value, String> {
    match value {
        Value::String(s) => {
            if let Some(name) = whole_placeholder(s) {
                return lookup(name, bindings).cloned();
            }
            substitute_str(s, bindings).map(Value::String)
        }
        Value::Array(items) => items
            .iter()
            .map(|v| substitute_value(v, bindings))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut out = Map::new();
            for (k, v) in map {
                out.insert(k.clone(), substitute_value(v, bindings)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

fn whole_placeholder(s: &str) -> Option<&str> {
    let inner = s.strip_prefix("${")?.strip_suffix('}')?;
    if inner.contains('}') || inner.contains("${") {
        return None;
    }
    Some(inner)
}

fn lookup<'v>(name: &str, bindings: &[(&str, &'v Value)]) -> std::result::Result<&'v Value, String> {
    bindings
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, v)| *v)
        .ok_or_else(|| format!("unknown parameter '${{{name}}}'"))
}

fn substitute_str(s: &str, bindings: &[(&str, &Value)]) -> std::result::Result<String, String> {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find('}')
            .ok_or_else(|| format!("unterminated placeholder in '{s}'"))?;
        let name = &after[..end];
        match lookup(name, bindings)? {
            Value::String(v) => out.push_str(v),
            other => out.push_str(&other.to_string()),
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::model::{JobTemplate, ParameterSet};
    use crate::types::FAN_OUT_TYPE;

    fn sweep(params: Vec<(&str, Vec<Value>)>, template: JobTemplate) -> JobDeclaration {
        let mut decl = JobDeclaration::new("sweep", FAN_OUT_TYPE);
        decl.depends_on = vec!["prepare".to_string()];
        decl.fan_out = Some(FanOutSpec {
            template,
            parameters: params
                .into_iter()
                .map(|(name, values)| ParameterSet {
                    name: name.to_string(),
                    values,
                })
                .collect(),
        });
        decl
    }

    fn train_template() -> JobTemplate {
        let mut t = JobTemplate::new("train");
        t.name = "train lr=${lr} bs=${batch}".to_string();
        t.config.insert("learning_rate".to_string(), json!("${lr}"));
        t.config.insert("args".to_string(), json!(["--batch=${batch}", "--fixed"]));
        t
    }

    #[test]
    fn expands_full_product_in_lexicographic_order() {
        let decl = sweep(
            vec![
                ("lr", vec![json!(0.1), json!(0.01)]),
                ("batch", vec![json!(16), json!(32), json!(64)]),
            ],
            train_template(),
        );

        let expansion = expand(&decl).unwrap();
        assert_eq!(expansion.jobs.len(), 6);

        let first = &expansion.jobs[0];
        assert_eq!(first.id, "sweep-0");
        assert_eq!(first.name, "train lr=0.1 bs=16");
        assert_eq!(first.config["learning_rate"], json!(0.1));
        assert_eq!(first.config["args"], json!(["--batch=16", "--fixed"]));
        assert_eq!(first.depends_on, vec!["prepare".to_string()]);
        assert_eq!(first.generated_by.as_deref(), Some("sweep"));

        assert_eq!(expansion.jobs[1].name, "train lr=0.1 bs=32");
        assert_eq!(expansion.jobs[3].name, "train lr=0.01 bs=16");

        assert_eq!(expansion.output["dimensions"], json!([2, 3]));
        assert_eq!(expansion.output["combinations"], json!(6));
        assert_eq!(
            generated_ids(&expansion.output).unwrap(),
            (0..6).map(|i| format!("sweep-{i}")).collect::<Vec<_>>()
        );
    }

    #[test]
    fn re_expansion_is_idempotent() {
        let decl = sweep(vec![("lr", vec![json!(1), json!(2)])], JobTemplate::new("train"));
        assert_eq!(expand(&decl).unwrap(), expand(&decl).unwrap());
        assert_eq!(expand(&decl).unwrap().jobs[1].name, "sweep #1");
    }

    #[test]
    fn unknown_placeholder_fails_expansion() {
        let mut template = JobTemplate::new("train");
        template.name = "train ${missing}".to_string();
        let decl = sweep(vec![("lr", vec![json!(1)])], template);

        let err = expand(&decl).unwrap_err();
        assert!(matches!(err, TunedagError::Expansion(msg) if msg.contains("missing")));
    }

    #[test]
    fn unterminated_placeholder_fails_expansion() {
        let mut template = JobTemplate::new("train");
        template.config.insert("cmd".to_string(), json!("run ${lr"));
        let decl = sweep(vec![("lr", vec![json!(1)])], template);

        assert!(expand(&decl).is_err());
    }
}

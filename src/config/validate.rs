// src/config/validate.rs

use std::collections::HashSet;

use crate::config::model::{
    BEST_METRIC_STRATEGY, ConfigSection, JobDeclaration, PipelineFile, RawPipelineFile,
};
use crate::dag::fan_out::generated_job_id;
use crate::dag::resolver::check_acyclic;
use crate::errors::{Result, TunedagError};
use crate::types::{FAN_IN_TYPE, FAN_OUT_TYPE, parse_duration};

impl TryFrom<RawPipelineFile> for PipelineFile {
    type Error = TunedagError;

    fn try_from(raw: RawPipelineFile) -> std::result::Result<Self, Self::Error> {
        validate_config_section(&raw.config)?;
        validate_declarations(&raw.jobs)?;
        Ok(PipelineFile::new_unchecked(raw.config, raw.jobs))
    }
}

/// Validate a set of declarations before anything is dispatched.
///
/// Checks unique ids, dependency references, fan-out/fan-in shape and
/// acyclicity. Handler registration is checked separately by the
/// orchestrator, since it depends on the registry.
pub fn validate_declarations(jobs: &[JobDeclaration]) -> Result<()> {
    ensure_has_jobs(jobs)?;
    validate_unique_ids(jobs)?;
    validate_job_shapes(jobs)?;
    validate_generated_ids(jobs)?;
    validate_dependencies(jobs)?;
    check_acyclic(jobs)?;
    Ok(())
}

pub fn validate_config_section(cfg: &ConfigSection) -> Result<()> {
    if cfg.parallelism == 0 {
        return Err(TunedagError::ConfigError(
            "[config].parallelism must be >= 1 (got 0)".to_string(),
        ));
    }
    if cfg.max_attempts == 0 {
        return Err(TunedagError::ConfigError(
            "[config].max_attempts must be >= 1 (got 0)".to_string(),
        ));
    }
    if let Some(raw) = &cfg.job_timeout {
        parse_duration(raw).map_err(|e| {
            TunedagError::ConfigError(format!("[config].job_timeout is invalid: {e}"))
        })?;
    }
    if cfg.checkpoint_every == Some(0) {
        return Err(TunedagError::ConfigError(
            "[config].checkpoint_every must be >= 1 when set".to_string(),
        ));
    }
    Ok(())
}

fn ensure_has_jobs(jobs: &[JobDeclaration]) -> Result<()> {
    if jobs.is_empty() {
        return Err(TunedagError::ConfigError(
            "pipeline must contain at least one [[job]]".to_string(),
        ));
    }
    Ok(())
}

fn validate_unique_ids(jobs: &[JobDeclaration]) -> Result<()> {
    let mut seen = HashSet::new();
    for job in jobs {
        if job.id.trim().is_empty() {
            return Err(TunedagError::ConfigError(
                "job id must not be empty".to_string(),
            ));
        }
        if !seen.insert(job.id.as_str()) {
            return Err(TunedagError::ConfigError(format!(
                "duplicate job id '{}'",
                job.id
            )));
        }
    }
    Ok(())
}

fn validate_job_shapes(jobs: &[JobDeclaration]) -> Result<()> {
    for job in jobs {
        if job.job_type.trim().is_empty() {
            return Err(TunedagError::ConfigError(format!(
                "job '{}' has an empty type",
                job.id
            )));
        }
        if let Some(raw) = &job.timeout {
            parse_duration(raw).map_err(|e| {
                TunedagError::ConfigError(format!("job '{}' has invalid timeout: {e}", job.id))
            })?;
        }
        if job.max_attempts == Some(0) {
            return Err(TunedagError::ConfigError(format!(
                "job '{}' max_attempts must be >= 1 (got 0)",
                job.id
            )));
        }

        match (job.is_fan_out(), job.fan_out.as_ref()) {
            (true, None) => {
                return Err(TunedagError::ConfigError(format!(
                    "job '{}' has type '{FAN_OUT_TYPE}' but no [job.fan_out] section",
                    job.id
                )));
            }
            (false, Some(_)) => {
                return Err(TunedagError::ConfigError(format!(
                    "job '{}' has a fan_out section but type '{}'",
                    job.id, job.job_type
                )));
            }
            (true, Some(spec)) => validate_fan_out(job, spec)?,
            (false, None) => {}
        }

        match (job.is_fan_in(), job.fan_in.as_ref()) {
            (true, None) => {
                return Err(TunedagError::ConfigError(format!(
                    "job '{}' has type '{FAN_IN_TYPE}' but no [job.fan_in] section",
                    job.id
                )));
            }
            (false, Some(_)) => {
                return Err(TunedagError::ConfigError(format!(
                    "job '{}' has a fan_in section but type '{}'",
                    job.id, job.job_type
                )));
            }
            (true, Some(spec)) => {
                let source = jobs.iter().find(|j| j.id == spec.source).ok_or_else(|| {
                    TunedagError::ConfigError(format!(
                        "fan-in job '{}' references unknown fan-out '{}'",
                        job.id, spec.source
                    ))
                })?;
                if !source.is_fan_out() {
                    return Err(TunedagError::ConfigError(format!(
                        "fan-in job '{}' references '{}', which is not a fan-out job",
                        job.id, spec.source
                    )));
                }
                if spec.aggregation.strategy == BEST_METRIC_STRATEGY
                    && spec
                        .aggregation
                        .metric_name
                        .as_deref()
                        .is_none_or(|m| m.trim().is_empty())
                {
                    return Err(TunedagError::ConfigError(format!(
                        "fan-in job '{}' uses '{BEST_METRIC_STRATEGY}' without a metric_name",
                        job.id
                    )));
                }
            }
            (false, None) => {}
        }
    }
    Ok(())
}

fn validate_fan_out(job: &JobDeclaration, spec: &crate::config::model::FanOutSpec) -> Result<()> {
    if spec.parameters.is_empty() {
        return Err(TunedagError::ConfigError(format!(
            "fan-out job '{}' has an empty parameter set",
            job.id
        )));
    }

    let mut names = HashSet::new();
    for param in &spec.parameters {
        if param.name.trim().is_empty() {
            return Err(TunedagError::ConfigError(format!(
                "fan-out job '{}' has a parameter with an empty name",
                job.id
            )));
        }
        if !names.insert(param.name.as_str()) {
            return Err(TunedagError::ConfigError(format!(
                "fan-out job '{}' declares parameter '{}' twice",
                job.id, param.name
            )));
        }
        if param.values.is_empty() {
            return Err(TunedagError::ConfigError(format!(
                "fan-out job '{}' parameter '{}' has no values",
                job.id, param.name
            )));
        }
    }

    let template_type = spec.template.job_type.as_str();
    if template_type == FAN_OUT_TYPE || template_type == FAN_IN_TYPE {
        return Err(TunedagError::ConfigError(format!(
            "fan-out job '{}' template cannot have reserved type '{template_type}'",
            job.id
        )));
    }
    if template_type.trim().is_empty() {
        return Err(TunedagError::ConfigError(format!(
            "fan-out job '{}' template has an empty type",
            job.id
        )));
    }
    if spec.template.max_attempts == Some(0) {
        return Err(TunedagError::ConfigError(format!(
            "fan-out job '{}' template max_attempts must be >= 1 (got 0)",
            job.id
        )));
    }
    if let Some(raw) = &spec.template.timeout {
        parse_duration(raw).map_err(|e| {
            TunedagError::ConfigError(format!(
                "fan-out job '{}' template has invalid timeout: {e}",
                job.id
            ))
        })?;
    }
    Ok(())
}

/// A declared id may not take the place of a job a fan-out will generate,
/// unless it is that generated job (resume carries them).
fn validate_generated_ids(jobs: &[JobDeclaration]) -> Result<()> {
    for fan_out in jobs.iter().filter(|j| j.is_fan_out()) {
        let Some(spec) = &fan_out.fan_out else {
            continue;
        };
        let combinations: usize = spec.parameters.iter().map(|p| p.values.len()).product();
        for index in 0..combinations {
            let id = generated_job_id(&fan_out.id, index);
            let clash = jobs
                .iter()
                .find(|j| j.id == id && j.generated_by.as_deref() != Some(fan_out.id.as_str()));
            if let Some(clash) = clash {
                return Err(TunedagError::ConfigError(format!(
                    "job '{}' collides with an id generated by fan-out '{}'",
                    clash.id, fan_out.id
                )));
            }
        }
    }
    Ok(())
}

fn validate_dependencies(jobs: &[JobDeclaration]) -> Result<()> {
    let ids: HashSet<&str> = jobs.iter().map(|j| j.id.as_str()).collect();

    for job in jobs {
        for dep in job.depends_on.iter() {
            if dep == &job.id {
                return Err(TunedagError::ConfigError(format!(
                    "job '{}' cannot depend on itself in `depends_on`",
                    job.id
                )));
            }
            if !ids.contains(dep.as_str()) {
                return Err(TunedagError::ConfigError(format!(
                    "job '{}' has unknown dependency '{}' in `depends_on`",
                    job.id, dep
                )));
            }
        }
        if let Some(parent) = &job.generated_by {
            if !ids.contains(parent.as_str()) {
                return Err(TunedagError::ConfigError(format!(
                    "generated job '{}' references unknown fan-out '{}'",
                    job.id, parent
                )));
            }
        }
    }
    Ok(())
}

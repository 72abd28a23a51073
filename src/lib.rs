// src/lib.rs

pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod types;

use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use tracing::{debug, info, warn};

use crate::checkpoint::{Checkpoint, FileCheckpointStore, build_store};
use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::config::model::{ConfigSection, JobDeclaration};
use crate::dag::fan_out;
use crate::engine::{ExecuteOptions, ExecutionStatus, Orchestrator};
use crate::exec::{SHELL_JOB_TYPE, ShellHandler};
use crate::types::DagStatus;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - pipeline loading
/// - execution options and the checkpoint store
/// - the orchestrator with the built-in `shell` handler
/// - Ctrl-C handling
/// - the final report on stdout
pub async fn run(args: CliArgs) -> Result<()> {
    let pipeline = load_and_validate(&args.config)?;
    let (cfg, jobs) = pipeline.into_parts();

    let checkpoint = match args.resume.as_deref() {
        Some(path) => Some(FileCheckpointStore::read_path(path)?),
        None => None,
    };

    if args.dry_run {
        let jobs = checkpoint.as_ref().map_or(&jobs[..], |cp| &cp.declarations[..]);
        print_dry_run(&cfg, jobs);
        return Ok(());
    }

    let mut options = ExecuteOptions::from_config(&cfg)?;
    if let Some(n) = args.parallelism {
        options = options.with_parallelism(n);
    }
    let store_dir = config_root_dir(&args.config).join(&cfg.checkpoint_dir);
    let options = options
        .with_checkpoint_store(build_store(cfg.checkpoint_storage, store_dir))
        .on_job_complete(|job| info!(job = %job.job_id, attempt = job.attempt, "job completed"))
        .on_job_failed(|job| {
            warn!(
                job = %job.job_id,
                attempt = job.attempt,
                error = job.error.as_deref().unwrap_or(""),
                "job attempt failed"
            )
        });

    let mut orchestrator = Orchestrator::default();
    orchestrator.register_handler(SHELL_JOB_TYPE, ShellHandler)?;

    let handle = match &checkpoint {
        Some(cp) => orchestrator.resume(cp, options)?,
        None => orchestrator.start(pipeline_name(&args.config), jobs, options)?,
    };
    info!(execution = %handle.execution_id(), "execution started");

    // Ctrl-C → graceful cancellation.
    {
        let canceller = handle.canceller();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            warn!("interrupt received; cancelling execution");
            canceller.cancel().await;
        });
    }

    let execution = handle.wait().await?;
    let status = ExecutionStatus::from(&execution);
    print_report(&status, checkpoint.as_ref());

    if status.status != DagStatus::Completed {
        bail!("execution '{}' finished as {}", status.execution_id, status.status);
    }
    Ok(())
}

/// Directory the pipeline file lives in; relative checkpoint dirs resolve
/// against it.
fn config_root_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}

fn pipeline_name(config_path: &Path) -> String {
    config_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("pipeline")
        .to_string()
}

fn print_report(status: &ExecutionStatus, resumed_from: Option<&Checkpoint>) {
    println!("tunedag execution {} ({})", status.execution_id, status.name);
    if let Some(cp) = resumed_from {
        println!("  resumed from checkpoint {} ({})", cp.id, cp.label);
    }
    println!(
        "  status: {}  progress: {:.0}%  completed: {}  failed: {}",
        status.status, status.progress, status.completed, status.failed
    );
    println!();

    for job in &status.jobs {
        match &job.error {
            Some(err) => println!("  {:<10} {} (attempt {}): {err}", job.status.as_str(), job.job_id, job.attempt),
            None => println!("  {:<10} {} (attempt {})", job.status.as_str(), job.job_id, job.attempt),
        }
    }

    if let Some(cause) = &status.root_cause {
        println!();
        println!("root cause: job '{}' failed: {}", cause.job_id, cause.error);
    }
}

/// Dry-run output: configuration, jobs, dependencies and what each fan-out
/// would generate.
fn print_dry_run(cfg: &ConfigSection, jobs: &[JobDeclaration]) {
    println!("tunedag dry-run");
    println!("  config.parallelism = {}", cfg.parallelism);
    println!("  config.max_attempts = {}", cfg.max_attempts);
    println!("  config.enable_cache = {}", cfg.enable_cache);
    println!("  config.fail_fast = {}", cfg.fail_fast);
    if let Some(timeout) = &cfg.job_timeout {
        println!("  config.job_timeout = {timeout}");
    }
    println!("  config.checkpoint_storage = {:?}", cfg.checkpoint_storage);
    println!();

    println!("jobs ({}):", jobs.len());
    for job in jobs {
        println!("  - {} [{}]", job.id, job.job_type);
        if !job.name.is_empty() {
            println!("      name: {}", job.name);
        }
        let deps = job.all_dependencies();
        if !deps.is_empty() {
            println!("      depends_on: {deps:?}");
        }
        if let Some(generated_by) = &job.generated_by {
            println!("      generated_by: {generated_by}");
        }
        if let Some(fan_in) = &job.fan_in {
            println!(
                "      fan_in: {} of '{}' by {:?} ({})",
                fan_in.aggregation.strategy,
                fan_in.source,
                fan_in.aggregation.metric_name.as_deref().unwrap_or("?"),
                if fan_in.aggregation.ascending { "min" } else { "max" }
            );
        }
        if job.is_fan_out() {
            match fan_out::expand(job) {
                Ok(expansion) => {
                    println!("      expands into {} jobs:", expansion.jobs.len());
                    for child in &expansion.jobs {
                        println!("        - {} ({})", child.id, child.display_name());
                    }
                }
                Err(e) => println!("      expansion error: {e}"),
            }
        }
    }

    debug!("dry-run complete (no execution)");
}

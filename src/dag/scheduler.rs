// src/dag/scheduler.rs

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use indexmap::IndexMap;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::model::{ConfigSection, JobDeclaration};
use crate::config::validate::validate_declarations;
use crate::dag::cache::JobCache;
use crate::dag::execution::{DagExecution, JobExecution};
use crate::dag::fan_in;
use crate::dag::fan_out;
use crate::dag::graph::DagGraph;
use crate::dag::job_info::ScheduledJob;
use crate::dag::resolver::ready_jobs;
use crate::dag::scheduler_step::SchedulerStep;
use crate::dag::state_manager::StateManager;
use crate::errors::{Result, TunedagError};
use crate::exec::handler::JobHandler;
use crate::exec::registry::{Capability, JobRegistry};
use crate::types::{
    CancelBehaviour, DagStatus, FanInPolicy, JobId, JobStatus, parse_duration,
};

/// Knobs that change how the scheduler drives an execution.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerOptions {
    /// Maximum number of simultaneously `running` jobs.
    pub parallelism: usize,
    pub enable_cache: bool,
    /// Default attempt limit for jobs without their own `max_attempts`.
    pub max_attempts: u32,
    /// Default per-attempt time limit for jobs without their own `timeout`.
    pub job_timeout: Option<Duration>,
    pub fan_in_policy: FanInPolicy,
    /// Stop dispatching as soon as any job permanently fails.
    pub fail_fast: bool,
    pub cancel_behaviour: CancelBehaviour,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            parallelism: 4,
            enable_cache: false,
            max_attempts: 1,
            job_timeout: None,
            fan_in_policy: FanInPolicy::default(),
            fail_fast: false,
            cancel_behaviour: CancelBehaviour::default(),
        }
    }
}

impl SchedulerOptions {
    pub fn from_config(cfg: &ConfigSection) -> Result<Self> {
        let job_timeout = cfg
            .job_timeout
            .as_deref()
            .map(parse_duration)
            .transpose()
            .map_err(|e| TunedagError::ConfigError(format!("config.job_timeout: {e}")))?;

        Ok(Self {
            parallelism: cfg.parallelism,
            enable_cache: cfg.enable_cache,
            max_attempts: cfg.max_attempts,
            job_timeout,
            fan_in_policy: cfg.fan_in_policy,
            fail_fast: cfg.fail_fast,
            cancel_behaviour: cfg.cancel_behaviour,
        })
    }

    fn check(&self) -> Result<()> {
        if self.parallelism == 0 {
            return Err(TunedagError::ConfigError(
                "parallelism must be a positive integer".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(TunedagError::ConfigError(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Why dispatching stopped before the graph ran to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Halt {
    Cancelled,
    FailedFast,
}

impl Halt {
    fn final_status(self) -> DagStatus {
        match self {
            Halt::Cancelled => DagStatus::Cancelled,
            Halt::FailedFast => DagStatus::Failed,
        }
    }
}

/// Scheduler owns the live graph of one execution plus its mutable state.
///
/// It is responsible for:
/// - deciding which jobs are ready and dispatching them under the
///   parallelism bound
/// - running the built-in fan-out / fan-in capabilities inline
/// - recording completions and failures, with retry bookkeeping
/// - propagating permanent failures to dependents
/// - deciding when the execution as a whole is finished
///
/// It never awaits anything; the engine feeds it results and dispatches the
/// [`ScheduledJob`]s it returns.
#[derive(Debug)]
pub struct Scheduler {
    graph: DagGraph,
    declarations: IndexMap<JobId, JobDeclaration>,
    execution: DagExecution,
    options: SchedulerOptions,
    registry: Arc<JobRegistry>,
    cache: JobCache,
    halt: Option<Halt>,
}

impl Scheduler {
    /// Validate `declarations` and build a fresh execution for them.
    ///
    /// Every job starts with a `pending` record.
    pub fn new(
        name: impl Into<String>,
        declarations: Vec<JobDeclaration>,
        options: SchedulerOptions,
        registry: Arc<JobRegistry>,
    ) -> Result<Self> {
        let mut execution = DagExecution::new(name);
        for decl in &declarations {
            execution
                .jobs
                .insert(decl.id.clone(), JobExecution::new(decl.id.clone()));
        }
        Self::from_parts(execution, declarations, options, registry)
    }

    /// Rebuild a scheduler around an existing execution (resume).
    ///
    /// Jobs that were `running` go back to `pending`; everything else keeps
    /// its recorded status. Declarations without a record get a fresh
    /// `pending` one.
    ///
    /// A `completed` or `failed` execution cannot be resumed. A `cancelled`
    /// one is reopened so its pending jobs run.
    pub fn from_parts(
        mut execution: DagExecution,
        declarations: Vec<JobDeclaration>,
        options: SchedulerOptions,
        registry: Arc<JobRegistry>,
    ) -> Result<Self> {
        options.check()?;
        validate_declarations(&declarations)?;
        check_job_types(&declarations, &registry)?;

        match execution.status {
            DagStatus::Completed | DagStatus::Failed => {
                return Err(TunedagError::Checkpoint(format!(
                    "execution '{}' already finished as {}; nothing to resume",
                    execution.id, execution.status
                )));
            }
            DagStatus::Cancelled => {
                info!(execution = %execution.id, "reopening cancelled execution");
                execution.status = DagStatus::Pending;
                execution.completed_at = None;
            }
            _ => {}
        }

        let declarations: IndexMap<JobId, JobDeclaration> = declarations
            .into_iter()
            .map(|decl| (decl.id.clone(), decl))
            .collect();

        if let Some(orphan) = execution
            .jobs
            .keys()
            .find(|id| !declarations.contains_key(id.as_str()))
        {
            return Err(TunedagError::JobNotFound(format!(
                "execution record '{orphan}' has no matching declaration"
            )));
        }

        for id in declarations.keys() {
            execution
                .jobs
                .entry(id.clone())
                .or_insert_with(|| JobExecution::new(id.clone()));
        }

        for job in execution.jobs.values_mut() {
            if job.status == JobStatus::Running {
                job.status = JobStatus::Pending;
                job.append_log(format!(
                    "attempt {} interrupted; reverted to pending",
                    job.attempt
                ));
                debug!(job = %job.job_id, "reverting interrupted job to pending");
            }
        }

        let graph = DagGraph::from_declarations(declarations.values());

        let mut cache = JobCache::new();
        if options.enable_cache {
            for (id, decl) in &declarations {
                let completed = execution
                    .jobs
                    .get(id)
                    .is_some_and(|j| j.status == JobStatus::Completed);
                if completed && !decl.is_fan_out() && !decl.is_fan_in() {
                    cache.record(decl);
                }
            }
        }

        Ok(Self {
            graph,
            declarations,
            execution,
            options,
            registry,
            cache,
            halt: None,
        })
    }

    pub fn execution(&self) -> &DagExecution {
        &self.execution
    }

    pub fn into_execution(self) -> DagExecution {
        self.execution
    }

    /// All declarations known so far, generated jobs included.
    pub fn declarations(&self) -> &IndexMap<JobId, JobDeclaration> {
        &self.declarations
    }

    pub fn options(&self) -> &SchedulerOptions {
        &self.options
    }

    pub fn is_finished(&self) -> bool {
        self.execution.status.is_terminal()
    }

    /// Move the execution to `running` and dispatch the first ready jobs.
    pub fn start(&mut self) -> SchedulerStep {
        if self.execution.status.is_terminal() {
            warn!(execution = %self.execution.id, status = %self.execution.status, "start called on finished execution");
            return SchedulerStep::default();
        }

        self.execution.status = DagStatus::Running;
        self.execution.completed_at = None;
        info!(
            execution = %self.execution.id,
            name = %self.execution.name,
            jobs = self.execution.jobs.len(),
            parallelism = self.options.parallelism,
            "scheduler: starting execution"
        );
        self.tick()
    }

    /// One scheduling pass: dispatch ready jobs while below the parallelism
    /// bound, then check whether the execution is finished.
    pub fn tick(&mut self) -> SchedulerStep {
        let mut step = SchedulerStep::default();
        if self.execution.status != DagStatus::Running {
            return step;
        }

        if self.halt.is_none() {
            self.dispatch_ready(&mut step);
            self.fail_if_stuck(&mut step);
        }

        step.run_just_finished = self.maybe_finish_run();
        step
    }

    /// Record a successful attempt.
    pub fn complete_job(&mut self, job: &str, attempt: u32, output: Value) -> SchedulerStep {
        if !self.is_current_attempt(job, attempt) {
            return SchedulerStep::default();
        }

        let mut step = SchedulerStep::default();
        StateManager::new(&self.graph, &mut self.execution.jobs).mark_completed(job, output);
        step.newly_completed.push(job.to_string());

        if self.options.enable_cache {
            if let Some(decl) = self.declarations.get(job) {
                self.cache.record(decl);
            }
        }

        debug!(job = %job, attempt, "job completed");
        step.merge(self.tick());
        step
    }

    /// Record a failed attempt: retry while attempts remain, otherwise fail
    /// the job permanently and propagate to its dependents.
    pub fn fail_job(&mut self, job: &str, attempt: u32, error: impl Into<String>) -> SchedulerStep {
        if !self.is_current_attempt(job, attempt) {
            return SchedulerStep::default();
        }

        let error = error.into();
        let mut step = SchedulerStep::default();
        StateManager::new(&self.graph, &mut self.execution.jobs).mark_failed(job, error.as_str());
        step.newly_failed.push(job.to_string());

        let Some(decl) = self.declarations.get(job).cloned() else {
            return step;
        };
        let max_attempts = decl.effective_max_attempts(self.options.max_attempts);

        if self.halt.is_none() && attempt < max_attempts {
            info!(
                job = %job,
                attempt,
                max_attempts,
                error = %error,
                "job attempt failed; retrying"
            );
            if let Some(record) = self.execution.job(job) {
                step.retried.push(record.clone());
            }
            if let Some(Capability::Handler(handler)) = self.registry.resolve(&decl.job_type) {
                self.launch(&decl, handler, &mut step);
            }
        } else {
            warn!(
                job = %job,
                attempt,
                max_attempts,
                error = %error,
                "job failed permanently"
            );
            self.fail_permanently(job, &mut step);
        }

        step.merge(self.tick());
        step
    }

    /// Append a handler log line to the job's record.
    ///
    /// Lines from an attempt other than the current one are dropped.
    pub fn append_log(&mut self, job: &str, attempt: u32, line: impl Into<String>) -> bool {
        if self.execution.job(job).map(|j| j.attempt) != Some(attempt) {
            debug!(job = %job, attempt, "dropping log line from stale attempt");
            return false;
        }
        StateManager::new(&self.graph, &mut self.execution.jobs).append_log(job, line)
    }

    /// Stop dispatching. Running jobs are drained or abandoned according to
    /// the configured [`CancelBehaviour`].
    pub fn cancel(&mut self) -> SchedulerStep {
        let mut step = SchedulerStep::default();
        if self.execution.status.is_terminal() {
            return step;
        }
        if self.halt == Some(Halt::Cancelled) {
            return step;
        }

        info!(
            execution = %self.execution.id,
            running = self.execution.running_count(),
            behaviour = ?self.options.cancel_behaviour,
            "scheduler: cancellation requested"
        );
        self.halt = Some(Halt::Cancelled);
        self.stop_running("abandoned after cancellation", &mut step);

        if self.execution.status == DagStatus::Pending {
            self.execution.status = DagStatus::Running;
        }
        step.run_just_finished = self.maybe_finish_run();
        step
    }

    fn is_current_attempt(&self, job: &str, attempt: u32) -> bool {
        match self.execution.job(job) {
            Some(exec) if exec.status == JobStatus::Running && exec.attempt == attempt => true,
            Some(exec) => {
                debug!(
                    job = %job,
                    attempt,
                    current_attempt = exec.attempt,
                    status = %exec.status,
                    "ignoring stale job result"
                );
                false
            }
            None => {
                warn!(job = %job, "result for unknown job; ignoring");
                false
            }
        }
    }

    fn dispatch_ready(&mut self, step: &mut SchedulerStep) {
        // Inline capabilities can make further jobs ready within one tick.
        loop {
            let ready = ready_jobs(&self.declarations, &self.execution.jobs);
            let mut dispatched = false;

            for id in ready {
                if self.halt.is_some() {
                    return;
                }
                if self.execution.running_count() >= self.options.parallelism {
                    return;
                }
                let pending = self
                    .execution
                    .job(&id)
                    .is_some_and(|j| j.status == JobStatus::Pending);
                if pending {
                    self.dispatch(&id, step);
                    dispatched = true;
                }
            }

            if !dispatched {
                return;
            }
        }
    }

    fn dispatch(&mut self, id: &str, step: &mut SchedulerStep) {
        let Some(decl) = self.declarations.get(id).cloned() else {
            return;
        };

        match self.registry.resolve(&decl.job_type) {
            Some(Capability::Expand) => self.run_expansion(&decl, step),
            Some(Capability::Aggregate) => self.run_aggregation(&decl, step),
            Some(Capability::Handler(handler)) => {
                if self.options.enable_cache && self.complete_from_cache(&decl, step) {
                    return;
                }
                self.launch(&decl, handler, step);
            }
            None => {
                let mut mgr = StateManager::new(&self.graph, &mut self.execution.jobs);
                mgr.mark_running(id);
                mgr.mark_failed(
                    id,
                    format!("no handler registered for job type '{}'", decl.job_type),
                );
                step.newly_failed.push(id.to_string());
                self.fail_permanently(id, step);
            }
        }
    }

    fn launch(&mut self, decl: &JobDeclaration, handler: Arc<dyn JobHandler>, step: &mut SchedulerStep) {
        let timeout = match decl.effective_timeout(self.options.job_timeout) {
            Ok(timeout) => timeout,
            Err(e) => {
                let mut mgr = StateManager::new(&self.graph, &mut self.execution.jobs);
                mgr.mark_running(&decl.id);
                mgr.mark_failed(&decl.id, format!("invalid timeout: {e}"));
                step.newly_failed.push(decl.id.clone());
                self.fail_permanently(&decl.id, step);
                return;
            }
        };

        let Some(attempt) = StateManager::new(&self.graph, &mut self.execution.jobs)
            .mark_running(&decl.id)
        else {
            return;
        };

        debug!(job = %decl.id, attempt, job_type = %decl.job_type, "dispatching job");
        step.newly_scheduled
            .push(ScheduledJob::from_declaration(decl, attempt, timeout, handler));
    }

    fn complete_from_cache(&mut self, decl: &JobDeclaration, step: &mut SchedulerStep) -> bool {
        let Some(source) = self.cache.lookup(decl).cloned() else {
            return false;
        };
        if source == decl.id {
            return false;
        }

        let hit = StateManager::new(&self.graph, &mut self.execution.jobs).mark_cached(&decl.id, &source);
        if hit {
            info!(job = %decl.id, source = %source, "cache hit; skipping execution");
            step.newly_completed.push(decl.id.clone());
        }
        hit
    }

    fn run_expansion(&mut self, decl: &JobDeclaration, step: &mut SchedulerStep) {
        if StateManager::new(&self.graph, &mut self.execution.jobs)
            .mark_running(&decl.id)
            .is_none()
        {
            return;
        }

        let expanded = fan_out::expand(decl).and_then(|expansion| {
            self.ensure_no_id_collisions(&decl.id, &expansion)?;
            Ok(expansion)
        });
        match expanded {
            Ok(expansion) => {
                let count = expansion.jobs.len();
                for child in expansion.jobs {
                    self.graph.add_job(&child);
                    self.execution
                        .jobs
                        .entry(child.id.clone())
                        .or_insert_with(|| JobExecution::new(child.id.clone()));
                    self.declarations.insert(child.id.clone(), child);
                }

                let mut mgr = StateManager::new(&self.graph, &mut self.execution.jobs);
                mgr.append_log(&decl.id, format!("expanded into {count} jobs"));
                mgr.mark_completed(&decl.id, expansion.output);
                info!(job = %decl.id, generated = count, "fan-out expanded");
                step.newly_completed.push(decl.id.clone());
            }
            Err(e) => {
                StateManager::new(&self.graph, &mut self.execution.jobs)
                    .mark_failed(&decl.id, e.to_string());
                warn!(job = %decl.id, error = %e, "fan-out expansion failed");
                step.newly_failed.push(decl.id.clone());
                self.fail_permanently(&decl.id, step);
            }
        }
    }

    /// Generated ids may only replace declarations this fan-out produced
    /// itself (a resumed expansion).
    fn ensure_no_id_collisions(&self, fan_out_id: &str, expansion: &fan_out::Expansion) -> Result<()> {
        for child in &expansion.jobs {
            if let Some(existing) = self.declarations.get(&child.id) {
                if existing.generated_by.as_deref() != Some(fan_out_id) {
                    return Err(TunedagError::Expansion(format!(
                        "generated job id '{}' collides with an existing job",
                        child.id
                    )));
                }
            }
        }
        Ok(())
    }

    fn run_aggregation(&mut self, decl: &JobDeclaration, step: &mut SchedulerStep) {
        if StateManager::new(&self.graph, &mut self.execution.jobs)
            .mark_running(&decl.id)
            .is_none()
        {
            return;
        }

        match fan_in::aggregate(decl, &self.execution.jobs, self.options.fan_in_policy) {
            Ok(output) => {
                let selected = output
                    .get("selected_job_id")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                let mut mgr = StateManager::new(&self.graph, &mut self.execution.jobs);
                if let Some(selected) = &selected {
                    mgr.append_log(&decl.id, format!("selected '{selected}'"));
                }
                mgr.mark_completed(&decl.id, output);
                info!(job = %decl.id, selected = ?selected, "fan-in aggregated");
                step.newly_completed.push(decl.id.clone());
            }
            Err(e) => {
                StateManager::new(&self.graph, &mut self.execution.jobs)
                    .mark_failed(&decl.id, e.to_string());
                warn!(job = %decl.id, error = %e, "fan-in aggregation failed");
                step.newly_failed.push(decl.id.clone());
                self.fail_permanently(&decl.id, step);
            }
        }
    }

    /// `job` is failed with no attempts left: fail its dependents and, with
    /// fail-fast, halt the execution.
    fn fail_permanently(&mut self, job: &str, step: &mut SchedulerStep) {
        let mut mgr = StateManager::new(&self.graph, &mut self.execution.jobs);
        let propagated = mgr.mark_dependents_failed(job);
        if !propagated.is_empty() {
            debug!(job = %job, dependents = ?propagated, "failing dependents");
        }
        step.newly_failed.extend(propagated);

        if self.options.fail_fast && self.halt.is_none() {
            warn!(job = %job, "fail-fast: halting execution");
            self.halt = Some(Halt::FailedFast);
            let reason = format!("not started: execution halted after '{job}' failed");
            let skipped = StateManager::new(&self.graph, &mut self.execution.jobs)
                .fail_all_pending(&reason);
            step.newly_failed.extend(skipped);
            self.stop_running("abandoned after fail-fast", step);
        }
    }

    /// Signal running handlers to stop; with `abandon`, also record them as
    /// failed right away.
    fn stop_running(&mut self, reason: &str, step: &mut SchedulerStep) {
        let running = StateManager::new(&self.graph, &mut self.execution.jobs).running_ids();
        if running.is_empty() {
            return;
        }
        step.abort_running = true;

        if self.options.cancel_behaviour == CancelBehaviour::Abandon {
            let mut mgr = StateManager::new(&self.graph, &mut self.execution.jobs);
            for id in running {
                mgr.mark_failed(&id, reason);
                step.newly_failed.push(id);
            }
        }
    }

    /// Fail the remaining pending jobs when nothing is running and nothing
    /// can become ready.
    fn fail_if_stuck(&mut self, step: &mut SchedulerStep) {
        if self.execution.running_count() > 0 {
            return;
        }
        if self.execution.count_with_status(JobStatus::Pending) == 0 {
            return;
        }
        if !ready_jobs(&self.declarations, &self.execution.jobs).is_empty() {
            return;
        }

        let stuck = StateManager::new(&self.graph, &mut self.execution.jobs)
            .fail_all_pending("not started: dependencies can never complete");
        warn!(jobs = ?stuck, "no runnable jobs remain; failing pending jobs");
        step.newly_failed.extend(stuck);
    }

    /// Move the execution to its terminal status if nothing is left to do.
    ///
    /// Returns `true` if this call finished the execution.
    fn maybe_finish_run(&mut self) -> bool {
        if self.execution.status.is_terminal() {
            return false;
        }

        let status = match self.halt {
            Some(halt) => {
                if self.execution.running_count() > 0 {
                    return false;
                }
                halt.final_status()
            }
            None => {
                if !self.execution.all_terminal() {
                    return false;
                }
                if self.execution.count_with_status(JobStatus::Failed) == 0 {
                    DagStatus::Completed
                } else {
                    DagStatus::Failed
                }
            }
        };

        self.execution.status = status;
        self.execution.completed_at = Some(Utc::now());
        info!(
            execution = %self.execution.id,
            status = %status,
            completed = self.execution.count_with_status(JobStatus::Completed),
            failed = self.execution.count_with_status(JobStatus::Failed),
            "scheduler: execution finished"
        );
        true
    }
}

/// Every job type (and fan-out template type) must resolve in the registry.
fn check_job_types(declarations: &[JobDeclaration], registry: &JobRegistry) -> Result<()> {
    for decl in declarations {
        if !registry.contains(&decl.job_type) {
            return Err(TunedagError::UnknownJobType(format!(
                "job '{}' has type '{}' but no handler is registered for it",
                decl.id, decl.job_type
            )));
        }
        if let Some(spec) = &decl.fan_out {
            if !registry.contains(&spec.template.job_type) {
                return Err(TunedagError::UnknownJobType(format!(
                    "fan-out '{}' template has type '{}' but no handler is registered for it",
                    decl.id, spec.template.job_type
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::config::model::{AggregationSpec, FanInSpec, FanOutSpec, JobTemplate, ParameterSet};
    use crate::exec::handler::JobContext;
    use crate::types::{FAN_IN_TYPE, FAN_OUT_TYPE};

    fn registry() -> Arc<JobRegistry> {
        let mut registry = JobRegistry::new();
        registry
            .register_handler("train", |_ctx: JobContext| async {
                Ok::<_, anyhow::Error>(json!({}))
            })
            .unwrap();
        Arc::new(registry)
    }

    fn decl(id: &str, deps: &[&str]) -> JobDeclaration {
        let mut d = JobDeclaration::new(id, "train");
        d.depends_on = deps.iter().map(|s| s.to_string()).collect();
        d
    }

    fn options(parallelism: usize) -> SchedulerOptions {
        SchedulerOptions {
            parallelism,
            ..SchedulerOptions::default()
        }
    }

    fn status(s: &Scheduler, id: &str) -> JobStatus {
        s.execution().job(id).unwrap().status
    }

    #[test]
    fn join_runs_only_after_all_dependencies_complete() {
        let decls = vec![decl("a", &[]), decl("b", &[]), decl("c", &[]), decl("d", &["a", "b", "c"])];
        let mut s = Scheduler::new("join", decls, options(2), registry()).unwrap();

        let step = s.start();
        assert_eq!(step.scheduled_ids(), vec!["a", "b"]);
        assert_eq!(s.execution().running_count(), 2);

        let step = s.complete_job("a", 1, json!({}));
        assert_eq!(step.scheduled_ids(), vec!["c"]);

        let step = s.complete_job("b", 1, json!({}));
        assert!(step.newly_scheduled.is_empty());
        assert_eq!(status(&s, "d"), JobStatus::Pending);

        let step = s.complete_job("c", 1, json!({}));
        assert_eq!(step.scheduled_ids(), vec!["d"]);

        let step = s.complete_job("d", 1, json!({ "ok": true }));
        assert!(step.run_just_finished);
        assert_eq!(s.execution().status, DagStatus::Completed);
        assert!(s.execution().completed_at.is_some());
    }

    #[test]
    fn failed_attempt_is_retried_until_the_limit() {
        let mut job = decl("flaky", &[]);
        job.max_attempts = Some(2);
        let mut s = Scheduler::new("retry", vec![job, decl("after", &["flaky"])], options(1), registry()).unwrap();
        s.start();

        let step = s.fail_job("flaky", 1, "boom");
        assert_eq!(step.scheduled_ids(), vec!["flaky"]);
        assert_eq!(step.newly_scheduled[0].attempt, 2);

        let step = s.fail_job("flaky", 2, "boom again");
        assert!(step.newly_scheduled.is_empty());
        assert_eq!(step.newly_failed, vec!["flaky", "after"]);
        assert!(step.run_just_finished);

        let flaky = s.execution().job("flaky").unwrap();
        assert_eq!(flaky.status, JobStatus::Failed);
        assert_eq!(flaky.attempt, 2);
        assert_eq!(flaky.error.as_deref(), Some("boom again"));

        let after = s.execution().job("after").unwrap();
        assert_eq!(after.error.as_deref(), Some("dependency 'flaky' failed"));
        assert_eq!(after.attempt, 0);
        assert_eq!(s.execution().status, DagStatus::Failed);
    }

    #[test]
    fn stale_results_are_ignored() {
        let mut job = decl("a", &[]);
        job.max_attempts = Some(3);
        let mut s = Scheduler::new("stale", vec![job], options(1), registry()).unwrap();
        s.start();
        s.fail_job("a", 1, "first");

        let step = s.complete_job("a", 1, json!({ "late": true }));
        assert!(step.newly_completed.is_empty());
        assert_eq!(status(&s, "a"), JobStatus::Running);
        assert!(!s.append_log("a", 1, "late line"));
        assert!(s.append_log("a", 2, "current line"));
    }

    #[test]
    fn fan_out_and_fan_in_run_inline() {
        let mut sweep = JobDeclaration::new("sweep", FAN_OUT_TYPE);
        let mut template = JobTemplate::new("train");
        template.config.insert("lr".to_string(), json!("${lr}"));
        sweep.fan_out = Some(FanOutSpec {
            template,
            parameters: vec![ParameterSet {
                name: "lr".to_string(),
                values: vec![json!(0.1), json!(0.01)],
            }],
        });
        let mut pick = JobDeclaration::new("pick", FAN_IN_TYPE);
        pick.fan_in = Some(FanInSpec {
            source: "sweep".to_string(),
            aggregation: AggregationSpec::best_metric("acc", false),
        });

        let mut s = Scheduler::new("sweep", vec![sweep, pick], options(4), registry()).unwrap();
        let step = s.start();
        assert_eq!(step.newly_completed, vec!["sweep"]);
        assert_eq!(step.scheduled_ids(), vec!["sweep-0", "sweep-1"]);
        assert_eq!(step.newly_scheduled[1].config["lr"], json!(0.01));

        s.complete_job("sweep-0", 1, json!({ "acc": 0.7 }));
        let step = s.complete_job("sweep-1", 1, json!({ "acc": 0.9 }));
        assert_eq!(step.newly_completed, vec!["sweep-1", "pick"]);
        assert!(step.run_just_finished);

        let pick = s.execution().job("pick").unwrap();
        assert_eq!(pick.output.as_ref().unwrap()["selected_job_id"], json!("sweep-1"));
    }

    #[test]
    fn cache_hit_completes_without_dispatch() {
        let mut first = decl("first", &[]);
        first.config.insert("lr".to_string(), json!(0.1));
        let mut second = first.clone();
        second.id = "second".to_string();
        second.depends_on = vec!["first".to_string()];

        let opts = SchedulerOptions {
            enable_cache: true,
            ..options(2)
        };
        let mut s = Scheduler::new("cache", vec![first, second], opts, registry()).unwrap();
        s.start();

        let step = s.complete_job("first", 1, json!({ "loss": 0.2 }));
        assert!(step.newly_scheduled.is_empty());
        assert_eq!(step.newly_completed, vec!["first", "second"]);

        let second = s.execution().job("second").unwrap();
        assert_eq!(second.attempt, 0);
        assert_eq!(second.output, Some(json!({ "loss": 0.2 })));
        assert_eq!(s.execution().status, DagStatus::Completed);
    }

    #[test]
    fn cancel_drains_running_jobs_then_finishes() {
        let decls = vec![decl("a", &[]), decl("b", &[]), decl("c", &["a"])];
        let mut s = Scheduler::new("cancel", decls, options(1), registry()).unwrap();
        s.start();

        let step = s.cancel();
        assert!(step.abort_running);
        assert!(!step.run_just_finished);

        let step = s.complete_job("a", 1, json!({}));
        assert!(step.newly_scheduled.is_empty());
        assert!(step.run_just_finished);
        assert_eq!(s.execution().status, DagStatus::Cancelled);
        assert_eq!(status(&s, "b"), JobStatus::Pending);
    }

    #[test]
    fn cancel_with_abandon_finishes_immediately() {
        let opts = SchedulerOptions {
            cancel_behaviour: CancelBehaviour::Abandon,
            ..options(2)
        };
        let mut s = Scheduler::new("abandon", vec![decl("a", &[])], opts, registry()).unwrap();
        s.start();

        let step = s.cancel();
        assert!(step.run_just_finished);
        assert_eq!(step.newly_failed, vec!["a"]);
        assert_eq!(s.execution().status, DagStatus::Cancelled);

        let late = s.complete_job("a", 1, json!({}));
        assert!(late.newly_completed.is_empty());
    }

    #[test]
    fn fail_fast_stops_dispatching_and_fails_pending_jobs() {
        let opts = SchedulerOptions {
            fail_fast: true,
            ..options(1)
        };
        let decls = vec![decl("a", &[]), decl("b", &[]), decl("c", &[])];
        let mut s = Scheduler::new("fast", decls, opts, registry()).unwrap();
        s.start();

        let step = s.fail_job("a", 1, "boom");
        assert!(step.newly_scheduled.is_empty());
        assert!(step.run_just_finished);
        assert_eq!(s.execution().status, DagStatus::Failed);
        assert_eq!(s.execution().job("c").unwrap().attempt, 0);
    }

    #[test]
    fn unknown_job_type_is_rejected_up_front() {
        let err = Scheduler::new(
            "unknown",
            vec![JobDeclaration::new("a", "evaluate")],
            options(1),
            registry(),
        )
        .unwrap_err();
        assert!(matches!(err, TunedagError::UnknownJobType(_)));
    }

    #[test]
    fn resume_reverts_running_jobs_to_pending() {
        let mut s = Scheduler::new("resume", vec![decl("a", &[]), decl("b", &["a"])], options(1), registry()).unwrap();
        s.start();
        let snapshot = s.execution().clone();
        let decls: Vec<_> = s.declarations().values().cloned().collect();

        let mut resumed = Scheduler::from_parts(snapshot, decls, options(1), registry()).unwrap();
        assert_eq!(status(&resumed, "a"), JobStatus::Pending);

        let step = resumed.start();
        assert_eq!(step.newly_scheduled[0].attempt, 2);
    }

    #[test]
    fn finished_executions_are_not_resumable_but_cancelled_ones_are() {
        let decls = vec![decl("a", &[]), decl("b", &["a"])];
        let mut s = Scheduler::new("done", decls.clone(), options(1), registry()).unwrap();
        s.start();
        s.complete_job("a", 1, json!({}));
        s.complete_job("b", 1, json!({}));
        assert_eq!(s.execution().status, DagStatus::Completed);

        let err = Scheduler::from_parts(s.execution().clone(), decls.clone(), options(1), registry())
            .err()
            .unwrap();
        assert!(matches!(err, TunedagError::Checkpoint(msg) if msg.contains("already finished")));

        let mut s = Scheduler::new("stopped", decls.clone(), options(1), registry()).unwrap();
        s.start();
        s.cancel();
        s.complete_job("a", 1, json!({}));
        assert_eq!(s.execution().status, DagStatus::Cancelled);

        let mut resumed = Scheduler::from_parts(s.execution().clone(), decls, options(1), registry()).unwrap();
        assert!(!resumed.is_finished());
        assert!(resumed.execution().completed_at.is_none());
        let step = resumed.start();
        assert_eq!(step.scheduled_ids(), vec!["b"]);
    }

    #[test]
    fn expansion_refuses_to_replace_a_foreign_job() {
        let mut sweep = JobDeclaration::new("sweep", FAN_OUT_TYPE);
        sweep.fan_out = Some(FanOutSpec {
            template: JobTemplate::new("train"),
            parameters: vec![ParameterSet {
                name: "lr".to_string(),
                values: vec![json!(0.1), json!(0.01)],
            }],
        });
        let mut s = Scheduler::new("clash", vec![sweep, decl("other", &[])], options(4), registry()).unwrap();

        // Only reachable if declarations change after validation.
        let mut foreign = decl("sweep-1", &[]);
        foreign.config.insert("mine".to_string(), json!(true));
        s.declarations.insert(foreign.id.clone(), foreign);

        let step = s.start();
        assert_eq!(step.newly_failed.first().map(String::as_str), Some("sweep"));
        let sweep = s.execution().job("sweep").unwrap();
        assert!(sweep.error.as_deref().unwrap().contains("collides"));
        assert_eq!(s.declarations()["sweep-1"].config["mine"], json!(true));
        assert!(!s.declarations().contains_key("sweep-0"));
    }
}

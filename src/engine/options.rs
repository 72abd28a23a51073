// src/engine/options.rs

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::checkpoint::CheckpointStore;
use crate::config::model::ConfigSection;
use crate::dag::SchedulerOptions;
use crate::dag::execution::JobExecution;
use crate::errors::Result;
use crate::types::{CancelBehaviour, FanInPolicy};

/// Observer called with the job's record after it completes or fails.
pub type JobCallback = Arc<dyn Fn(&JobExecution) + Send + Sync>;

/// Options for one `execute` / `start` / `resume` call.
#[derive(Clone)]
pub struct ExecuteOptions {
    pub parallelism: usize,
    pub enable_cache: bool,
    pub max_attempts: u32,
    pub job_timeout: Option<Duration>,
    pub fan_in_policy: FanInPolicy,
    pub fail_fast: bool,
    pub cancel_behaviour: CancelBehaviour,
    /// Where automatic checkpoints go; `None` disables them.
    pub checkpoint_store: Option<Arc<dyn CheckpointStore>>,
    /// Take a periodic checkpoint after this many job completions.
    pub checkpoint_every: Option<usize>,
    pub on_job_complete: Option<JobCallback>,
    /// Fires for every failed attempt, including ones that will be retried
    /// and failures propagated from a dependency.
    pub on_job_failed: Option<JobCallback>,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        let scheduler = SchedulerOptions::default();
        Self {
            parallelism: scheduler.parallelism,
            enable_cache: scheduler.enable_cache,
            max_attempts: scheduler.max_attempts,
            job_timeout: scheduler.job_timeout,
            fan_in_policy: scheduler.fan_in_policy,
            fail_fast: scheduler.fail_fast,
            cancel_behaviour: scheduler.cancel_behaviour,
            checkpoint_store: None,
            checkpoint_every: None,
            on_job_complete: None,
            on_job_failed: None,
        }
    }
}

impl fmt::Debug for ExecuteOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecuteOptions")
            .field("parallelism", &self.parallelism)
            .field("enable_cache", &self.enable_cache)
            .field("max_attempts", &self.max_attempts)
            .field("job_timeout", &self.job_timeout)
            .field("fan_in_policy", &self.fan_in_policy)
            .field("fail_fast", &self.fail_fast)
            .field("cancel_behaviour", &self.cancel_behaviour)
            .field("checkpoint_store", &self.checkpoint_store)
            .field("checkpoint_every", &self.checkpoint_every)
            .field("on_job_complete", &self.on_job_complete.is_some())
            .field("on_job_failed", &self.on_job_failed.is_some())
            .finish()
    }
}

impl ExecuteOptions {
    /// Options from a pipeline file's `[config]` section.
    ///
    /// The checkpoint store is not built here; see
    /// [`crate::checkpoint::build_store`].
    pub fn from_config(cfg: &ConfigSection) -> Result<Self> {
        let scheduler = SchedulerOptions::from_config(cfg)?;
        Ok(Self {
            checkpoint_every: cfg.checkpoint_every,
            ..Self::default().with_scheduler_options(scheduler)
        })
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    pub fn with_cache(mut self, enable: bool) -> Self {
        self.enable_cache = enable;
        self
    }

    pub fn with_checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoint_store = Some(store);
        self
    }

    pub fn on_job_complete(mut self, f: impl Fn(&JobExecution) + Send + Sync + 'static) -> Self {
        self.on_job_complete = Some(Arc::new(f));
        self
    }

    pub fn on_job_failed(mut self, f: impl Fn(&JobExecution) + Send + Sync + 'static) -> Self {
        self.on_job_failed = Some(Arc::new(f));
        self
    }

    fn with_scheduler_options(mut self, s: SchedulerOptions) -> Self {
        self.parallelism = s.parallelism;
        self.enable_cache = s.enable_cache;
        self.max_attempts = s.max_attempts;
        self.job_timeout = s.job_timeout;
        self.fan_in_policy = s.fan_in_policy;
        self.fail_fast = s.fail_fast;
        self.cancel_behaviour = s.cancel_behaviour;
        self
    }

    pub fn scheduler_options(&self) -> SchedulerOptions {
        SchedulerOptions {
            parallelism: self.parallelism,
            enable_cache: self.enable_cache,
            max_attempts: self.max_attempts,
            job_timeout: self.job_timeout,
            fan_in_policy: self.fan_in_policy,
            fail_fast: self.fail_fast,
            cancel_behaviour: self.cancel_behaviour,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_config_carries_every_knob() {
        let cfg = ConfigSection {
            parallelism: 8,
            enable_cache: true,
            max_attempts: 3,
            job_timeout: Some("90s".to_string()),
            fan_in_policy: FanInPolicy::RequireAll,
            fail_fast: true,
            cancel_behaviour: CancelBehaviour::Abandon,
            checkpoint_every: Some(5),
            ..ConfigSection::default()
        };
        let opts = ExecuteOptions::from_config(&cfg).unwrap();
        let sched = opts.scheduler_options();

        assert_eq!(sched.parallelism, 8);
        assert!(sched.enable_cache);
        assert_eq!(sched.max_attempts, 3);
        assert_eq!(sched.job_timeout, Some(Duration::from_secs(90)));
        assert_eq!(sched.fan_in_policy, FanInPolicy::RequireAll);
        assert!(sched.fail_fast);
        assert_eq!(sched.cancel_behaviour, CancelBehaviour::Abandon);
        assert_eq!(opts.checkpoint_every, Some(5));
    }
}

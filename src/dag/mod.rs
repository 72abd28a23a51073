// src/dag/mod.rs

//! Job graph representation and scheduling.
//!
//! - [`execution`] holds the runtime records of one execution.
//! - [`graph`] is the live adjacency of declared and generated jobs.
//! - [`resolver`] decides which jobs are ready and rejects cycles.
//! - [`fan_out`] / [`fan_in`] implement the two built-in job types.
//! - [`scheduler`] is the per-execution state machine; it returns a
//!   [`SchedulerStep`] describing what changed.
//! - [`state_manager`] applies per-job state transitions.

pub mod cache;
pub mod execution;
pub mod fan_in;
pub mod fan_out;
pub mod graph;
pub mod job_info;
pub mod resolver;
pub mod scheduler;
pub mod scheduler_step;
pub mod state_manager;

pub use execution::{DagExecution, JobExecution};
pub use graph::DagGraph;
pub use job_info::ScheduledJob;
pub use scheduler::{Scheduler, SchedulerOptions};
pub use scheduler_step::SchedulerStep;

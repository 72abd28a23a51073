// src/exec/mod.rs

//! Job execution layer.
//!
//! This module is responsible for actually running job handlers as Tokio
//! tasks and reporting back to the orchestration runtime via
//! `RuntimeEvent`s.
//!
//! - [`registry`] maps job types to handlers and built-in capabilities.
//! - [`handler`] defines the `JobHandler` trait and the `JobContext` a
//!   handler receives.
//! - [`executor_loop`] owns the loop that manages running attempts.
//! - [`job_runner`] runs a single attempt (timeouts, panics).
//! - [`backend`] provides the `ExecutorBackend` trait and the
//!   `TokioExecutorBackend` the runtime uses in production, and which tests
//!   can replace with a fake implementation.
//! - [`shell`] is the built-in `shell` handler used by the CLI.

pub mod backend;
pub mod executor_loop;
pub mod handler;
pub mod job_runner;
pub mod registry;
pub mod shell;

pub use backend::{ExecutorBackend, TokioExecutorBackend};
pub use executor_loop::{ExecutorCommand, spawn_executor};
pub use handler::{HandlerFuture, JobContext, JobHandler};
pub use registry::{Capability, JobRegistry};
pub use shell::{SHELL_JOB_TYPE, ShellHandler};

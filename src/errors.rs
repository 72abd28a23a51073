// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TunedagError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Cycle detected in DAG: {0}")]
    DagCycle(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Unknown job type: {0}")]
    UnknownJobType(String),

    #[error("Fan-out expansion failed: {0}")]
    Expansion(String),

    #[error("Fan-in aggregation failed: {0}")]
    Aggregation(String),

    #[error("Checkpoint rejected: {0}")]
    Checkpoint(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, TunedagError>;

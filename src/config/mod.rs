// src/config/mod.rs

//! Pipeline file loading and validation.
//!
//! Responsibilities:
//! - Define the TOML-backed data model, including job declarations (`model.rs`).
//! - Load a pipeline file from disk (`loader.rs`).
//! - Validate invariants like unique ids and DAG correctness (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path};
pub use model::{
    AggregationSpec, ConfigSection, FanInSpec, FanOutSpec, JobDeclaration, JobTemplate,
    ParameterSet, PipelineFile, RawPipelineFile,
};
pub use validate::{validate_config_section, validate_declarations};

// src/config/mod.rs

//! Configuration loading and validation for ffapipe.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate names, globs and command templates (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{config_root_dir, load_and_validate, load_from_path};
pub use model::{
    ConfigFile, PipelineSection, RawConfigFile, SearchConfig, SourcesSection, StageConfig,
};

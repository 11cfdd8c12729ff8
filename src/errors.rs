// src/errors.rs

//! Crate-wide error aliases and helpers.
//!
//! Per-unit processing failures are not errors: they are recorded as
//! [`crate::engine::UnitFailure`] values so that one unit can never take the
//! whole run down. `PipelineError` is reserved for problems that stop the
//! process itself (bad config, unreadable run root, environment abort).

use thiserror::Error;

use crate::engine::RunSummary;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Manifest error: {0}")]
    ManifestError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerError(#[from] toml::ser::Error),

    /// The very first unit could not even launch its first tool. Raised
    /// before more compute is burnt on a misconfigured environment.
    /// `summary` covers the units that finished before the abort.
    #[error("Environment failure: {reason}")]
    Environment {
        reason: String,
        summary: Box<RunSummary>,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, PipelineError>;

// src/config/model.rs

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::types::Idempotence;

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [pipeline]
/// output_root = "/data/state"
/// workers = 8
/// retry_budget = 2
/// nodes = ["gpu1", "gpu2"]
///
/// [sources]
/// root = "/data/raw"
/// patterns = ["**/*.raw", "**/*.fil"]
/// prefer = ["raw", "fil"]
///
/// [[search]]
/// name = "short"
/// params = { pmin = "0.2", pmax = "0.5" }
///
/// [[stage]]
/// name = "rfi"
/// program = "rfifind"
/// args = ["-o", "{out_dir}/mask", "{input}"]
/// outputs = ["*.mask"]
/// ```
///
/// This is the *unvalidated* shape; use [`ConfigFile::try_from`] (or
/// [`crate::config::load_and_validate`]) to obtain a usable config.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    pub pipeline: PipelineSection,

    #[serde(default)]
    pub sources: SourcesSection,

    /// All search configurations from `[[search]]`.
    #[serde(default, rename = "search")]
    pub searches: Vec<SearchConfig>,

    /// Ordered stage chain from `[[stage]]`. Order in the file is execution order.
    #[serde(default, rename = "stage")]
    pub stages: Vec<StageConfig>,
}

/// Validated configuration.
///
/// Can only be constructed through `TryFrom<RawConfigFile>`, so holding one
/// means every template placeholder resolves and every name is usable as a
/// path component.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pipeline: PipelineSection,
    sources: SourcesSection,
    searches: Vec<SearchConfig>,
    stages: Vec<StageConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(raw: RawConfigFile) -> Self {
        Self {
            pipeline: raw.pipeline,
            sources: raw.sources,
            searches: raw.searches,
            stages: raw.stages,
        }
    }

    pub fn pipeline(&self) -> &PipelineSection {
        &self.pipeline
    }

    pub fn sources(&self) -> &SourcesSection {
        &self.sources
    }

    pub fn searches(&self) -> &[SearchConfig] {
        &self.searches
    }

    pub fn stages(&self) -> &[StageConfig] {
        &self.stages
    }

    /// Anchor relative `output_root` / `sources.root` at `base`
    /// (the directory holding the config file).
    pub fn resolve_relative_paths(&mut self, base: &Path) {
        if self.pipeline.output_root.is_relative() {
            self.pipeline.output_root = base.join(&self.pipeline.output_root);
        }
        if let Some(root) = self.sources.root.as_mut() {
            if root.is_relative() {
                *root = base.join(&*root);
            }
        }
    }

    /// Override the worker count (e.g. from `--workers`).
    pub fn set_workers(&mut self, workers: usize) {
        self.pipeline.workers = workers;
    }
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSection {
    /// Run root: manifest, checkpoints, stage outputs and logs live here.
    pub output_root: PathBuf,

    /// Maximum number of units processed concurrently on this machine.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Extra attempts granted to a `retryable` stage after its first failure.
    #[serde(default = "default_retry_budget")]
    pub retry_budget: u32,

    /// Node identifiers for the static multi-machine partition.
    ///
    /// Empty means "single machine": units carry no node assignment.
    #[serde(default)]
    pub nodes: Vec<String>,
}

fn default_workers() -> usize {
    1
}

fn default_retry_budget() -> u32 {
    2
}

/// `[sources]` section.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct SourcesSection {
    /// Directory the glob patterns are matched under.
    #[serde(default)]
    pub root: Option<PathBuf>,

    /// Globs (relative to `root`) selecting observation files.
    #[serde(default)]
    pub patterns: Vec<String>,

    /// Globs removing files from the selection.
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Extension preference, highest first. Within one directory only files
    /// with the best extension present are kept, so raw recordings win over
    /// filterbanks already converted from them.
    #[serde(default)]
    pub prefer: Vec<String>,
}

/// `[[search]]` entry: one search-parameter configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
    pub name: String,

    /// Values substituted for `{param}` placeholders in stage arguments.
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

/// `[[stage]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct StageConfig {
    pub name: String,

    /// Executable to launch (looked up on `PATH` when not a path).
    pub program: String,

    /// Argument templates, materialized one by one (never through a shell).
    #[serde(default)]
    pub args: Vec<String>,

    /// Globs, relative to the stage output directory, naming the artifacts
    /// the stage must produce. Each must match at least one non-empty file.
    #[serde(default)]
    pub outputs: Vec<String>,

    /// Whether a non-zero exit is worth retrying.
    #[serde(default = "default_retryable")]
    pub retryable: bool,

    #[serde(default)]
    pub idempotence: Idempotence,

    /// Record blake3 digests of the artifacts in the checkpoint.
    #[serde(default)]
    pub checksum: bool,
}

fn default_retryable() -> bool {
    true
}

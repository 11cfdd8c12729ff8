// src/manifest/layout.rs

//! On-disk layout of a run root.
//!
//! ```text
//! <root>/manifest.toml
//! <root>/checkpoints/<unit_id>.toml
//! <root>/units/<unit_id>/<stage>/...          stage outputs (tool cwd)
//! <root>/units/<unit_id>/logs/<NN>-<stage>.log
//! ```
//!
//! Everything below `units/<unit_id>` and `checkpoints/<unit_id>.toml` is
//! owned by exactly one sequencer at a time.

use std::path::{Path, PathBuf};

pub const MANIFEST_FILE: &str = "manifest.toml";
pub const CHECKPOINT_DIR: &str = "checkpoints";
pub const UNITS_DIR: &str = "units";
pub const LOGS_DIR: &str = "logs";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLayout {
    root: PathBuf,
}

impl RunLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    pub fn checkpoint_dir(&self) -> PathBuf {
        self.root.join(CHECKPOINT_DIR)
    }

    pub fn checkpoint_path(&self, unit_id: &str) -> PathBuf {
        self.checkpoint_dir().join(format!("{unit_id}.toml"))
    }

    pub fn units_dir(&self) -> PathBuf {
        self.root.join(UNITS_DIR)
    }

    pub fn unit_dir(&self, unit_id: &str) -> PathBuf {
        self.units_dir().join(unit_id)
    }

    pub fn stage_dir(&self, unit_id: &str, stage: &str) -> PathBuf {
        self.unit_dir(unit_id).join(stage)
    }

    pub fn logs_dir(&self, unit_id: &str) -> PathBuf {
        self.unit_dir(unit_id).join(LOGS_DIR)
    }

    /// Log file of one (unit, stage) pair. The index prefix keeps `ls`
    /// output in execution order.
    pub fn log_path(&self, unit_id: &str, stage_index: usize, stage: &str) -> PathBuf {
        self.logs_dir(unit_id)
            .join(format!("{:02}-{}.log", stage_index, stage))
    }
}

// src/checkpoint/record.rs

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::types::FailureKind;

/// One artifact of a completed stage, as it looked when the stage was
/// checkpointed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactEntry {
    pub stage: String,
    /// Relative to the stage output directory.
    pub path: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blake3: Option<String>,
}

/// The most recent failure of a unit, kept until a later stage succeeds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub stage_index: usize,
    pub stage: String,
    pub kind: FailureKind,
    pub message: String,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_path: Option<PathBuf>,
    pub timestamp: u64,
}

/// Durable progress marker of one unit.
///
/// `last_completed = Some(k)` promises that stages `0..=k` all finished with
/// verified artifacts. The sequencer only ever moves it forward, and only
/// after the artifacts of stage `k` were found on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub unit_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_completed: Option<usize>,

    /// Name of the `last_completed` stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,

    pub timestamp: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_path: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,

    /// Artifacts of every completed stage, in stage order.
    #[serde(default)]
    pub artifacts: Vec<ArtifactEntry>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureRecord>,
}

/// Outcome of one successfully completed stage, to be folded into a record.
#[derive(Debug, Clone)]
pub struct StageCompletion {
    pub index: usize,
    pub stage: String,
    pub exit_code: i32,
    pub log_path: PathBuf,
    pub duration_secs: f64,
    pub artifacts: Vec<ArtifactEntry>,
    pub timestamp: u64,
}

impl CheckpointRecord {
    /// Record of a unit that has not completed anything yet.
    pub fn new(unit_id: impl Into<String>) -> Self {
        Self {
            unit_id: unit_id.into(),
            last_completed: None,
            stage: None,
            timestamp: 0,
            exit_code: None,
            log_path: None,
            duration_secs: None,
            artifacts: Vec::new(),
            failure: None,
        }
    }

    /// Index of the first stage that still has to run.
    pub fn next_stage(&self) -> usize {
        self.last_completed.map_or(0, |k| k + 1)
    }

    pub fn is_complete(&self, stage_count: usize) -> bool {
        self.next_stage() >= stage_count
    }

    /// Artifacts recorded for `stage`.
    pub fn artifacts_for<'a>(&'a self, stage: &'a str) -> impl Iterator<Item = &'a ArtifactEntry> {
        self.artifacts.iter().filter(move |a| a.stage == stage)
    }

    /// Advance to `done.index` and clear any earlier failure.
    pub fn complete_stage(&mut self, done: StageCompletion) {
        self.artifacts.retain(|a| a.stage != done.stage);
        self.artifacts.extend(done.artifacts);
        self.last_completed = Some(done.index);
        self.stage = Some(done.stage);
        self.timestamp = done.timestamp;
        self.exit_code = Some(done.exit_code);
        self.log_path = Some(done.log_path);
        self.duration_secs = Some(done.duration_secs);
        self.failure = None;
    }

    /// Note a failure without touching committed progress.
    pub fn fail(&mut self, failure: FailureRecord) {
        self.timestamp = failure.timestamp;
        self.failure = Some(failure);
    }
}

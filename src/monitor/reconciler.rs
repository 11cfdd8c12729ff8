// src/monitor/reconciler.rs

//! Rebuilds run progress from what is on disk.
//!
//! Three sources are consulted for every unit:
//! - the checkpoint record (committed progress),
//! - the log of the next pending stage (is a tool running right now?),
//! - the stage output directories (artifacts with or without a checkpoint).
//!
//! Nothing here writes. A snapshot taken while a run is active can be a
//! moment out of date; the next poll catches up.

use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

use crate::checkpoint::{CheckpointRecord, CheckpointStore, FailureRecord};
use crate::errors::{PipelineError, Result};
use crate::exec::log::{last_marker, tail, LogMarker};
use crate::fs::hash::compute_file_hash;
use crate::fs::FileSystem;
use crate::manifest::{RunLayout, RunManifest, Unit};
use crate::stages::{collect_artifacts, verify_artifacts, StageTable};
use crate::types::{unix_now, UnitStatus};

/// Lines of log shown for running and failed units.
pub const TAIL_LINES: usize = 8;

/// Disagreement between the checkpoint store and the output tree.
/// Reported only; never repaired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Discrepancy {
    /// Artifacts are present for a stage that has no checkpoint.
    Unverified { stage: String },
    /// A checkpointed stage's artifacts are gone or empty.
    ArtifactMissing { stage: String, detail: String },
    SizeMismatch {
        stage: String,
        path: String,
        recorded: u64,
        actual: u64,
    },
    ChecksumMismatch { stage: String, path: String },
}

impl fmt::Display for Discrepancy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Discrepancy::Unverified { stage } => {
                write!(f, "unverified: '{stage}' has artifacts but no checkpoint")
            }
            Discrepancy::ArtifactMissing { stage, detail } => {
                write!(f, "artifact missing: '{stage}': {detail}")
            }
            Discrepancy::SizeMismatch {
                stage,
                path,
                recorded,
                actual,
            } => write!(
                f,
                "size mismatch: '{stage}'/{path} recorded {recorded} bytes, found {actual}"
            ),
            Discrepancy::ChecksumMismatch { stage, path } => {
                write!(f, "checksum mismatch: '{stage}'/{path}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnitState {
    pub id: String,
    pub node: Option<String>,
    pub status: UnitStatus,
    /// Index of the first stage without a checkpoint (== stage count when done).
    pub next_stage: usize,
    /// Files currently matching each stage's `outputs`, in stage order.
    pub artifact_counts: Vec<usize>,
    pub discrepancies: Vec<Discrepancy>,
    pub failure: Option<FailureRecord>,
    /// Tail of the active log (running) or the failing stage's log (failed).
    pub log_tail: Vec<String>,
    /// Set when the checkpoint record could not be read.
    pub note: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub done: usize,
    pub failed: usize,
    pub running: usize,
    pub pending: usize,
}

impl StatusCounts {
    pub fn total(&self) -> usize {
        self.done + self.failed + self.running + self.pending
    }

    fn add(&mut self, status: UnitStatus) {
        match status {
            UnitStatus::Done => self.done += 1,
            UnitStatus::Failed => self.failed += 1,
            UnitStatus::Running => self.running += 1,
            UnitStatus::Pending => self.pending += 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunState {
    pub root: PathBuf,
    pub taken_at: u64,
    pub workers: usize,
    pub retry_budget: u32,
    pub nodes: Vec<String>,
    pub stages: Vec<String>,
    pub units: Vec<UnitState>,
    pub counts: StatusCounts,
    /// Checkpoints whose unit is not part of the manifest.
    pub orphans: Vec<String>,
}

/// Read-only view over a run root.
#[derive(Debug, Clone)]
pub struct Reconciler {
    fs: Arc<dyn FileSystem>,
    layout: RunLayout,
    store: CheckpointStore,
}

impl Reconciler {
    pub fn new(fs: Arc<dyn FileSystem>, layout: RunLayout) -> Self {
        let store = CheckpointStore::new(fs.clone(), layout.clone());
        Self { fs, layout, store }
    }

    /// Current state of every unit in the run's manifest.
    pub fn snapshot(&self) -> Result<RunState> {
        let manifest = RunManifest::load(self.fs.as_ref(), &self.layout)?.ok_or_else(|| {
            PipelineError::ManifestError(format!(
                "no run manifest under {:?}",
                self.layout.root()
            ))
        })?;
        let table = manifest.stage_table();

        let mut counts = StatusCounts::default();
        let mut units = Vec::with_capacity(manifest.units.len());
        for unit in &manifest.units {
            let state = self.unit_state(&table, unit);
            counts.add(state.status);
            units.push(state);
        }

        let orphans = self.orphans(&manifest);

        debug!(units = units.len(), ?counts, orphans = orphans.len(), "snapshot taken");
        Ok(RunState {
            root: self.layout.root().to_path_buf(),
            taken_at: unix_now(),
            workers: manifest.workers,
            retry_budget: manifest.retry_budget,
            nodes: manifest.nodes.clone(),
            stages: table.iter().map(|s| s.name.clone()).collect(),
            units,
            counts,
            orphans,
        })
    }

    fn unit_state(&self, table: &StageTable, unit: &Unit) -> UnitState {
        let (record, note) = match self.store.load(&unit.id) {
            Ok(record) => (record.unwrap_or_else(|| CheckpointRecord::new(&unit.id)), None),
            Err(err) => (
                CheckpointRecord::new(&unit.id),
                Some(format!("unreadable checkpoint: {err:#}")),
            ),
        };
        let next = record.next_stage().min(table.len());

        let active_log = table
            .get(next)
            .map(|def| self.layout.log_path(&unit.id, next, &def.name));
        let active_text = active_log
            .as_ref()
            .and_then(|path| self.fs.read_to_string(path).ok());
        let running = is_running(active_text.as_deref(), record.failure.as_ref());

        let status = if next >= table.len() {
            UnitStatus::Done
        } else if running {
            UnitStatus::Running
        } else if record.failure.is_some() {
            UnitStatus::Failed
        } else {
            UnitStatus::Pending
        };

        let mut discrepancies = Vec::new();
        let mut artifact_counts = Vec::with_capacity(table.len());
        for (index, def) in table.iter().enumerate() {
            let dir = self.layout.stage_dir(&unit.id, &def.name);
            let found = collect_artifacts(self.fs.as_ref(), &dir, &def.outputs).unwrap_or_default();
            artifact_counts.push(found.len());

            if index < next {
                self.check_recorded(&record, &def.name, &dir, &def.outputs, &mut discrepancies);
            } else if !(index == next && running)
                && verify_artifacts(self.fs.as_ref(), &dir, &def.outputs)
                    .map(|c| c.is_complete())
                    .unwrap_or(false)
            {
                discrepancies.push(Discrepancy::Unverified {
                    stage: def.name.clone(),
                });
            }
        }

        let log_tail = match status {
            UnitStatus::Running => active_text.map(|t| tail(&t, TAIL_LINES)).unwrap_or_default(),
            // Failures raised before any launch have no log of their own;
            // the interrupted attempt's log is the closest context.
            UnitStatus::Failed => record
                .failure
                .as_ref()
                .and_then(|f| f.log_path.as_ref())
                .and_then(|p| self.fs.read_to_string(p).ok())
                .or(active_text)
                .map(|t| tail(&t, TAIL_LINES))
                .unwrap_or_default(),
            _ => Vec::new(),
        };

        UnitState {
            id: unit.id.clone(),
            node: unit.node.clone(),
            status,
            next_stage: next,
            artifact_counts,
            discrepancies,
            failure: if status == UnitStatus::Failed {
                record.failure.clone()
            } else {
                None
            },
            log_tail,
            note,
        }
    }

    /// Checkpoint ids with no unit in the manifest.
    fn orphans(&self, manifest: &RunManifest) -> Vec<String> {
        let known: HashSet<&str> = manifest.units.iter().map(|u| u.id.as_str()).collect();
        match self.store.list() {
            Ok(records) => records
                .into_iter()
                .map(|r| r.unit_id)
                .filter(|id| !known.contains(id.as_str()))
                .collect(),
            Err(err) => {
                debug!(error = %err, "could not list checkpoints");
                Vec::new()
            }
        }
    }

    /// Compare a checkpointed stage's directory with what its record says.
    fn check_recorded(
        &self,
        record: &CheckpointRecord,
        stage: &str,
        dir: &std::path::Path,
        outputs: &[String],
        out: &mut Vec<Discrepancy>,
    ) {
        let problem = match verify_artifacts(self.fs.as_ref(), dir, outputs) {
            Ok(check) => check.problem(),
            Err(err) => Some(format!("{err:#}")),
        };
        if let Some(detail) = problem {
            out.push(Discrepancy::ArtifactMissing {
                stage: stage.to_string(),
                detail,
            });
            return;
        }

        for entry in record.artifacts_for(stage) {
            let path = dir.join(&entry.path);
            let actual = match self.fs.file_len(&path) {
                Ok(len) => len,
                Err(_) => {
                    out.push(Discrepancy::ArtifactMissing {
                        stage: stage.to_string(),
                        detail: format!("{} is gone", entry.path),
                    });
                    continue;
                }
            };
            if actual != entry.size {
                out.push(Discrepancy::SizeMismatch {
                    stage: stage.to_string(),
                    path: entry.path.clone(),
                    recorded: entry.size,
                    actual,
                });
                continue;
            }
            if let Some(recorded) = &entry.blake3 {
                if let Ok(hash) = compute_file_hash(self.fs.as_ref(), &path) {
                    if &hash != recorded {
                        out.push(Discrepancy::ChecksumMismatch {
                            stage: stage.to_string(),
                            path: entry.path.clone(),
                        });
                    }
                }
            }
        }
    }
}

/// A tool is running when the next stage's log ends in a start marker
/// written after the last recorded failure. A start marker older than the
/// failure belongs to an attempt killed with its process.
fn is_running(log: Option<&str>, failure: Option<&FailureRecord>) -> bool {
    match log.and_then(last_marker) {
        Some(LogMarker::Start { at, .. }) => failure.is_none_or(|f| at > f.timestamp),
        _ => false,
    }
}

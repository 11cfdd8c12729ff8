// src/engine/mod.rs

//! Orchestration core.
//!
//! - [`sequencer`] advances a single unit through the stage chain, resuming
//!   from its checkpoint.
//! - [`distributor`] fans units out over a bounded worker pool.
//! - [`summary`] aggregates per-unit reports into the end-of-run summary.

use std::path::PathBuf;

use crate::manifest::UnitId;
use crate::types::FailureKind;

pub mod distributor;
pub mod sequencer;
pub mod summary;

pub use distributor::WorkDistributor;
pub use sequencer::StageSequencer;
pub use summary::RunSummary;

/// Why a unit stopped. A value, not an error: it is recorded and the run
/// carries on with other units.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitFailure {
    pub unit_id: UnitId,
    pub stage_index: usize,
    pub stage: String,
    pub kind: FailureKind,
    pub message: String,
    /// Launches of the failing stage during this run (0 if it never started).
    pub attempts: u32,
    pub log_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UnitOutcome {
    Done,
    Failed(UnitFailure),
}

/// What one `advance` call did.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitReport {
    pub unit_id: UnitId,
    pub outcome: UnitOutcome,
    /// First stage that was pending when the call started.
    pub resumed_from: usize,
    /// Stages checkpointed during this call, in order.
    pub completed: Vec<String>,
}

impl UnitReport {
    pub(crate) fn new(unit_id: &str) -> Self {
        Self {
            unit_id: unit_id.to_string(),
            outcome: UnitOutcome::Done,
            resumed_from: 0,
            completed: Vec::new(),
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self.outcome, UnitOutcome::Done)
    }

    pub fn failure(&self) -> Option<&UnitFailure> {
        match &self.outcome {
            UnitOutcome::Failed(failure) => Some(failure),
            UnitOutcome::Done => None,
        }
    }
}

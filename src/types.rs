use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// What to do with a stage's output directory before (re-)executing it.
///
/// - `Rerun`: the tool is safe to run again on top of whatever a previous,
///   interrupted attempt left behind.
/// - `Clear`: partial output must not survive; the stage directory is wiped
///   before every execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Idempotence {
    Rerun,
    Clear,
}

impl Default for Idempotence {
    fn default() -> Self {
        Idempotence::Rerun
    }
}

/// Why a unit stopped short of completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Upstream output absent or empty. Never retried.
    ArtifactMissing,
    /// The tool ran and exited unsuccessfully (after the retry budget).
    ToolFailure,
    /// The tool could not be launched at all. Never retried.
    RunnerFailure,
    /// The checkpoint store itself could not be read or written.
    CheckpointFailure,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::ArtifactMissing => "artifact-missing",
            FailureKind::ToolFailure => "tool-failure",
            FailureKind::RunnerFailure => "runner-failure",
            FailureKind::CheckpointFailure => "checkpoint-failure",
        };
        f.write_str(s)
    }
}

/// Terminal (or current) status of a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum UnitStatus {
    Pending,
    Running,
    Done,
    Failed,
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UnitStatus::Pending => "pending",
            UnitStatus::Running => "running",
            UnitStatus::Done => "done",
            UnitStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Seconds since the Unix epoch; 0 if the clock is before it.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

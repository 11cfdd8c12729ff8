// src/exec/mod.rs

//! Process execution layer.
//!
//! The sequencer talks to a [`ProcessRunner`] instead of spawning processes
//! itself, so tests can swap in a scripted runner that never touches a real
//! tool.
//!
//! - [`runner`] holds [`RealProcessRunner`], the `tokio::process` backend.
//! - [`log`] formats and parses the marker lines framing each invocation in
//!   a stage log.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::time::Duration;

use crate::stages::StageCommand;

pub mod log;
pub mod runner;

pub use runner::RealProcessRunner;

/// How one tool invocation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Exit code 0. Artifact verification is the sequencer's job.
    Success,
    /// The tool ran and exited non-zero (`-1` when killed by a signal).
    ToolFailure { code: i32 },
    /// The tool could not be started at all (missing binary, unwritable log,
    /// bad working directory). Never worth retrying.
    RunnerFailure { reason: String },
}

impl ExitOutcome {
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ExitOutcome::Success => Some(0),
            ExitOutcome::ToolFailure { code } => Some(*code),
            ExitOutcome::RunnerFailure { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub outcome: ExitOutcome,
    /// Wall-clock time from launch to exit.
    pub duration: Duration,
}

/// Trait abstracting how one stage command is executed.
///
/// `run` resolves only once the tool has terminated; the calling worker is
/// blocked for the full duration of the tool.
pub trait ProcessRunner: Send + Sync {
    /// Execute `cmd` with its output appended to `log_path`.
    fn run<'a>(
        &'a self,
        cmd: &'a StageCommand,
        log_path: &'a Path,
    ) -> Pin<Box<dyn Future<Output = RunReport> + Send + 'a>>;
}

// src/exec/runner.rs

//! Real process runner built on `tokio::process`.

use std::fs::{self, File, OpenOptions};
use std::future::Future;
use std::io::Write;
use std::path::Path;
use std::pin::Pin;
use std::process::Stdio;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::stages::StageCommand;
use crate::types::unix_now;

use super::log::{exit_line, launch_failed_line, start_line};
use super::{ExitOutcome, ProcessRunner, RunReport};

/// Launches the stage tool directly (no shell) with its combined output
/// appended to the stage log.
#[derive(Debug, Clone, Default)]
pub struct RealProcessRunner;

impl RealProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

impl ProcessRunner for RealProcessRunner {
    fn run<'a>(
        &'a self,
        cmd: &'a StageCommand,
        log_path: &'a Path,
    ) -> Pin<Box<dyn Future<Output = RunReport> + Send + 'a>> {
        Box::pin(run_command(cmd, log_path))
    }
}

async fn run_command(cmd: &StageCommand, log_path: &Path) -> RunReport {
    let started = Instant::now();

    let mut log = match prepare(cmd, log_path) {
        Ok(log) => log,
        Err(err) => {
            warn!(
                unit = %cmd.unit_id,
                stage = %cmd.stage,
                error = %err,
                "could not prepare stage directories or log"
            );
            return RunReport {
                outcome: ExitOutcome::RunnerFailure {
                    reason: format!("{err:#}"),
                },
                duration: started.elapsed(),
            };
        }
    };

    let outcome = match spawn_and_wait(cmd, &mut log, started).await {
        Ok(outcome) => outcome,
        Err(err) => {
            let reason = format!("{err:#}");
            let _ = log.write_all(launch_failed_line(unix_now(), &reason).as_bytes());
            warn!(
                unit = %cmd.unit_id,
                stage = %cmd.stage,
                program = %cmd.program,
                error = %reason,
                "could not launch stage tool"
            );
            ExitOutcome::RunnerFailure { reason }
        }
    };

    RunReport {
        outcome,
        duration: started.elapsed(),
    }
}

/// Create the working directory and open the log in append mode.
fn prepare(cmd: &StageCommand, log_path: &Path) -> Result<File> {
    fs::create_dir_all(&cmd.cwd)
        .with_context(|| format!("creating stage directory {:?}", cmd.cwd))?;
    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating log dir {:?}", parent))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .with_context(|| format!("opening stage log {:?}", log_path))
}

async fn spawn_and_wait(cmd: &StageCommand, log: &mut File, started: Instant) -> Result<ExitOutcome> {
    log.write_all(start_line(unix_now(), cmd.attempt, &cmd.to_string()).as_bytes())
        .context("writing start marker")?;
    log.flush().context("flushing stage log")?;

    let stdout = log.try_clone().context("duplicating log handle")?;
    let stderr = log.try_clone().context("duplicating log handle")?;

    info!(
        unit = %cmd.unit_id,
        stage = %cmd.stage,
        attempt = cmd.attempt,
        cmd = %cmd,
        "starting stage tool"
    );

    let mut child = Command::new(&cmd.program)
        .args(&cmd.args)
        .current_dir(&cmd.cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr))
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("spawning '{}'", cmd.program))?;

    let status = child
        .wait()
        .await
        .with_context(|| format!("waiting for '{}'", cmd.program))?;

    // Killed by a signal: no exit code.
    let code = status.code().unwrap_or(-1);
    let duration = started.elapsed();
    if let Err(err) = log.write_all(exit_line(unix_now(), code, duration).as_bytes()) {
        debug!(unit = %cmd.unit_id, error = %err, "could not write exit marker");
    }

    info!(
        unit = %cmd.unit_id,
        stage = %cmd.stage,
        attempt = cmd.attempt,
        exit_code = code,
        duration_secs = duration.as_secs_f64(),
        "stage tool exited"
    );

    Ok(if status.success() {
        ExitOutcome::Success
    } else {
        ExitOutcome::ToolFailure { code }
    })
}

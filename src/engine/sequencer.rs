// src/engine/sequencer.rs

//! Drives one unit through the stage chain.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::checkpoint::{ArtifactEntry, CheckpointRecord, CheckpointStore, FailureRecord, StageCompletion};
use crate::exec::{ExitOutcome, ProcessRunner};
use crate::fs::hash::compute_file_hash;
use crate::fs::FileSystem;
use crate::manifest::{RunLayout, Unit};
use crate::stages::{verify_artifacts, verify_input, ArtifactCheck, ArtifactFile, StageDef, StageTable};
use crate::types::{unix_now, FailureKind, Idempotence};

use super::{UnitFailure, UnitOutcome, UnitReport};

/// Advances units from their last checkpoint to completion.
///
/// One sequencer is shared by all workers; it holds no per-unit state, and
/// the distributor guarantees that a given unit is only ever advanced by one
/// caller at a time, which makes that caller the sole writer of the unit's
/// checkpoint record and output directory.
pub struct StageSequencer {
    table: StageTable,
    layout: RunLayout,
    store: CheckpointStore,
    fs: Arc<dyn FileSystem>,
    runner: Arc<dyn ProcessRunner>,
    retry_budget: u32,
}

impl StageSequencer {
    pub fn new(
        table: StageTable,
        layout: RunLayout,
        fs: Arc<dyn FileSystem>,
        runner: Arc<dyn ProcessRunner>,
        retry_budget: u32,
    ) -> Self {
        let store = CheckpointStore::new(fs.clone(), layout.clone());
        Self {
            table,
            layout,
            store,
            fs,
            runner,
            retry_budget,
        }
    }

    /// Run every pending stage of `unit`, stopping at the first failure.
    pub async fn advance(&self, unit: &Unit) -> UnitReport {
        let mut report = UnitReport::new(&unit.id);

        let mut record = match self.store.load(&unit.id) {
            Ok(record) => record.unwrap_or_else(|| CheckpointRecord::new(&unit.id)),
            Err(err) => {
                // An unreadable record must not be overwritten with a fresh one.
                let failure = self.failure(
                    unit,
                    0,
                    FailureKind::CheckpointFailure,
                    format!("reading checkpoint: {err:#}"),
                    0,
                );
                warn!(unit = %unit.id, error = %err, "checkpoint unreadable");
                report.outcome = UnitOutcome::Failed(failure);
                return report;
            }
        };

        let start = record.next_stage();
        report.resumed_from = start;
        if start >= self.table.len() {
            info!(unit = %unit.id, "already complete, skipping");
            report.outcome = UnitOutcome::Done;
            return report;
        }
        if start > 0 {
            info!(unit = %unit.id, resume_at = start, "resuming from checkpoint");
        }

        // Stages before `start - 1` are checked here; `start - 1` itself is
        // the upstream of the first stage run below.
        for index in 0..start.saturating_sub(1) {
            if let Err(failure) = self.check_stage_artifacts(unit, index, start) {
                return self.fail(unit, &mut record, failure, report);
            }
        }

        for index in start..self.table.len() {
            if let Err(failure) = self.check_upstream(unit, index) {
                return self.fail(unit, &mut record, failure, report);
            }

            let completion = match self.execute_stage(unit, index).await {
                Ok(completion) => completion,
                Err(failure) => return self.fail(unit, &mut record, failure, report),
            };

            let stage = completion.stage.clone();
            record.complete_stage(completion);
            if let Err(err) = self.store.commit(&record) {
                let failure = self.failure(
                    unit,
                    index,
                    FailureKind::CheckpointFailure,
                    format!("committing checkpoint: {err:#}"),
                    0,
                );
                report.outcome = UnitOutcome::Failed(failure);
                return report;
            }
            info!(unit = %unit.id, stage = %stage, index, "stage checkpointed");
            report.completed.push(stage);
        }

        info!(unit = %unit.id, "unit done");
        report.outcome = UnitOutcome::Done;
        report
    }

    /// Execute stage `index` with its retry budget. On success the returned
    /// completion already carries the verified artifact list.
    async fn execute_stage(&self, unit: &Unit, index: usize) -> Result<StageCompletion, UnitFailure> {
        let Some(def) = self.table.get(index) else {
            return Err(self.failure(
                unit,
                index,
                FailureKind::RunnerFailure,
                format!("no stage #{index}"),
                0,
            ));
        };
        let log_path = self.layout.log_path(&unit.id, index, &def.name);
        let stage_dir = self.layout.stage_dir(&unit.id, &def.name);

        let mut cmd = self.table.command_for(index, unit, &self.layout).map_err(|err| {
            self.failure(
                unit,
                index,
                FailureKind::RunnerFailure,
                format!("materializing arguments: {err}"),
                0,
            )
        })?;

        let max_attempts = if def.retryable { 1 + self.retry_budget } else { 1 };
        let mut last_problem = String::new();

        for attempt in 1..=max_attempts {
            if def.idempotence == Idempotence::Clear && self.fs.is_dir(&stage_dir) {
                debug!(unit = %unit.id, stage = %def.name, "clearing partial output");
                if let Err(err) = self.fs.remove_dir_all(&stage_dir) {
                    return Err(self.failure(
                        unit,
                        index,
                        FailureKind::RunnerFailure,
                        format!("clearing {:?}: {err:#}", stage_dir),
                        attempt - 1,
                    ));
                }
            }

            cmd.attempt = attempt;
            let report = self.runner.run(&cmd, &log_path).await;

            match report.outcome {
                ExitOutcome::Success => match verify_artifacts(self.fs.as_ref(), &stage_dir, &def.outputs) {
                    Ok(ArtifactCheck::Complete(files)) => {
                        let artifacts = self.artifact_entries(def, files).map_err(|msg| {
                            self.failure(unit, index, FailureKind::ToolFailure, msg, attempt)
                        })?;
                        return Ok(StageCompletion {
                            index,
                            stage: def.name.clone(),
                            exit_code: 0,
                            log_path,
                            duration_secs: report.duration.as_secs_f64(),
                            artifacts,
                            timestamp: unix_now(),
                        });
                    }
                    Ok(check) => {
                        last_problem = format!(
                            "exited 0 but {}",
                            check.problem().unwrap_or_else(|| "artifacts are incomplete".to_string())
                        );
                    }
                    Err(err) => {
                        last_problem = format!("exited 0 but artifacts could not be read: {err:#}");
                    }
                },
                ExitOutcome::ToolFailure { code } => {
                    last_problem = format!("exited with code {code}");
                }
                ExitOutcome::RunnerFailure { reason } => {
                    return Err(self.failure(
                        unit,
                        index,
                        FailureKind::RunnerFailure,
                        reason,
                        attempt,
                    ));
                }
            }

            warn!(
                unit = %unit.id,
                stage = %def.name,
                attempt,
                max_attempts,
                problem = %last_problem,
                "stage attempt failed"
            );
        }

        Err(self.failure(
            unit,
            index,
            FailureKind::ToolFailure,
            last_problem,
            max_attempts,
        ))
    }

    fn artifact_entries(&self, def: &StageDef, files: Vec<ArtifactFile>) -> Result<Vec<ArtifactEntry>, String> {
        files
            .into_iter()
            .map(|file| {
                let blake3 = if def.checksum {
                    let digest = compute_file_hash(self.fs.as_ref(), &file.path)
                        .map_err(|err| format!("hashing {:?}: {err:#}", file.path))?;
                    Some(digest)
                } else {
                    None
                };
                Ok(ArtifactEntry {
                    stage: def.name.clone(),
                    path: file.rel_path,
                    size: file.size,
                    blake3,
                })
            })
            .collect()
    }

    /// Stage `index` consumes the input file (first stage) or the artifacts
    /// of stage `index - 1`.
    fn check_upstream(&self, unit: &Unit, index: usize) -> Result<(), UnitFailure> {
        if index == 0 {
            let check = verify_input(self.fs.as_ref(), &unit.input).map_err(|err| {
                self.failure(
                    unit,
                    0,
                    FailureKind::ArtifactMissing,
                    format!("checking input {:?}: {err:#}", unit.input),
                    0,
                )
            })?;
            return match check.problem() {
                None => Ok(()),
                Some(problem) => Err(self.failure(
                    unit,
                    0,
                    FailureKind::ArtifactMissing,
                    format!("input {:?}: {problem}", unit.input),
                    0,
                )),
            };
        }
        self.check_stage_artifacts(unit, index - 1, index)
    }

    /// Verify that checkpointed stage `produced_by` still has its artifacts;
    /// a problem is charged to stage `needed_by`.
    fn check_stage_artifacts(
        &self,
        unit: &Unit,
        produced_by: usize,
        needed_by: usize,
    ) -> Result<(), UnitFailure> {
        let Some(def) = self.table.get(produced_by) else {
            return Ok(());
        };
        let dir = self.layout.stage_dir(&unit.id, &def.name);
        let problem = match verify_artifacts(self.fs.as_ref(), &dir, &def.outputs) {
            Ok(check) => check.problem(),
            Err(err) => Some(format!("{err:#}")),
        };
        match problem {
            None => Ok(()),
            Some(problem) => Err(self.failure(
                unit,
                needed_by,
                FailureKind::ArtifactMissing,
                format!("output of completed stage '{}': {problem}", def.name),
                0,
            )),
        }
    }

    fn failure(
        &self,
        unit: &Unit,
        index: usize,
        kind: FailureKind,
        message: String,
        attempts: u32,
    ) -> UnitFailure {
        let stage = self
            .table
            .get(index)
            .map(|s| s.name.clone())
            .unwrap_or_default();
        let log_path: Option<PathBuf> = (attempts > 0).then(|| self.layout.log_path(&unit.id, index, &stage));
        UnitFailure {
            unit_id: unit.id.clone(),
            stage_index: index,
            stage,
            kind,
            message,
            attempts,
            log_path,
        }
    }

    /// Persist the failure in the unit's record (best effort) and finish the
    /// report.
    fn fail(
        &self,
        unit: &Unit,
        record: &mut CheckpointRecord,
        failure: UnitFailure,
        mut report: UnitReport,
    ) -> UnitReport {
        warn!(
            unit = %unit.id,
            stage = %failure.stage,
            kind = %failure.kind,
            attempts = failure.attempts,
            message = %failure.message,
            "unit failed"
        );
        record.fail(FailureRecord {
            stage_index: failure.stage_index,
            stage: failure.stage.clone(),
            kind: failure.kind,
            message: failure.message.clone(),
            attempts: failure.attempts,
            log_path: failure.log_path.clone(),
            timestamp: unix_now(),
        });
        if let Err(err) = self.store.commit(record) {
            warn!(unit = %unit.id, error = %err, "could not record failure in checkpoint");
        }
        report.outcome = UnitOutcome::Failed(failure);
        report
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::future::Future;
    use std::path::Path;
    use std::pin::Pin;
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::exec::RunReport;
    use crate::fs::mock::MockFileSystem;
    use crate::stages::StageCommand;

    /// Writes `<stage>.out` into the stage directory unless told otherwise.
    struct FakeRunner {
        fs: MockFileSystem,
        failing: Option<&'static str>,
        silent: Option<&'static str>,
        calls: Mutex<Vec<(String, u32)>>,
    }

    impl FakeRunner {
        fn new(fs: &MockFileSystem) -> Self {
            Self {
                fs: fs.clone(),
                failing: None,
                silent: None,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<(String, u32)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl ProcessRunner for FakeRunner {
        fn run<'a>(
            &'a self,
            cmd: &'a StageCommand,
            _log_path: &'a Path,
        ) -> Pin<Box<dyn Future<Output = RunReport> + Send + 'a>> {
            Box::pin(async move {
                self.calls.lock().unwrap().push((cmd.stage.clone(), cmd.attempt));
                let outcome = if self.failing == Some(cmd.stage.as_str()) {
                    ExitOutcome::ToolFailure { code: 1 }
                } else {
                    if self.silent != Some(cmd.stage.as_str()) {
                        self.fs.add_file(cmd.cwd.join(format!("{}.out", cmd.stage)), "data");
                    }
                    ExitOutcome::Success
                };
                RunReport {
                    outcome,
                    duration: Duration::from_millis(5),
                }
            })
        }
    }

    fn def(name: &str, retryable: bool, idempotence: Idempotence) -> StageDef {
        StageDef {
            name: name.to_string(),
            program: name.to_string(),
            args: vec!["{prev_dir}".to_string()],
            outputs: vec!["*.out".to_string()],
            retryable,
            idempotence,
            checksum: true,
        }
    }

    fn setup(runner: FakeRunner, fs: &MockFileSystem, stages: Vec<StageDef>) -> (StageSequencer, Arc<FakeRunner>) {
        let runner = Arc::new(runner);
        let seq = StageSequencer::new(
            StageTable::new(stages),
            RunLayout::new("/run"),
            Arc::new(fs.clone()),
            runner.clone(),
            2,
        );
        (seq, runner)
    }

    fn abc() -> Vec<StageDef> {
        vec![
            def("a", true, Idempotence::Rerun),
            def("b", true, Idempotence::Rerun),
            def("c", false, Idempotence::Rerun),
        ]
    }

    fn unit(fs: &MockFileSystem) -> Unit {
        fs.add_file("/raw/obs.raw", "raw bytes");
        Unit::new(PathBuf::from("/raw/obs.raw"), "short", BTreeMap::new())
    }

    fn stage_names(calls: &[(String, u32)]) -> Vec<&str> {
        calls.iter().map(|(s, _)| s.as_str()).collect()
    }

    #[tokio::test]
    async fn fresh_unit_runs_every_stage_and_checkpoints() {
        let fs = MockFileSystem::new();
        let unit = unit(&fs);
        let (seq, runner) = setup(FakeRunner::new(&fs), &fs, abc());

        let report = seq.advance(&unit).await;

        assert!(report.is_done());
        assert_eq!(report.completed, vec!["a", "b", "c"]);
        assert_eq!(stage_names(&runner.calls()), vec!["a", "b", "c"]);

        let record = seq.store.load(&unit.id).unwrap().unwrap();
        assert_eq!(record.last_completed, Some(2));
        assert_eq!(record.artifacts.len(), 3);
        assert!(record.artifacts.iter().all(|a| a.blake3.is_some()));
    }

    #[tokio::test]
    async fn resume_skips_checkpointed_stages_and_done_units() {
        let fs = MockFileSystem::new();
        let unit = unit(&fs);
        let (seq, runner) = setup(FakeRunner::new(&fs), &fs, abc());

        // Stage "a" finished in an earlier run.
        fs.add_file(seq.layout.stage_dir(&unit.id, "a").join("a.out"), "data");
        let mut record = CheckpointRecord::new(&unit.id);
        record.last_completed = Some(0);
        seq.store.commit(&record).unwrap();

        let report = seq.advance(&unit).await;
        assert_eq!(report.resumed_from, 1);
        assert_eq!(stage_names(&runner.calls()), vec!["b", "c"]);

        let again = seq.advance(&unit).await;
        assert!(again.is_done());
        assert!(again.completed.is_empty());
        assert_eq!(runner.calls().len(), 2);
    }

    #[tokio::test]
    async fn vanished_upstream_artifact_fails_without_rerunning() {
        let fs = MockFileSystem::new();
        let unit = unit(&fs);
        let (seq, runner) = setup(FakeRunner::new(&fs), &fs, abc());

        // Checkpoint claims "a" and "b" are done but only "b" output exists.
        fs.add_file(seq.layout.stage_dir(&unit.id, "b").join("b.out"), "data");
        let mut record = CheckpointRecord::new(&unit.id);
        record.last_completed = Some(1);
        seq.store.commit(&record).unwrap();

        let report = seq.advance(&unit).await;
        let failure = report.failure().unwrap();
        assert_eq!(failure.kind, FailureKind::ArtifactMissing);
        assert!(failure.message.contains("'a'"), "{}", failure.message);
        assert!(runner.calls().is_empty());

        let record = seq.store.load(&unit.id).unwrap().unwrap();
        assert_eq!(record.last_completed, Some(1));
        assert_eq!(record.failure.unwrap().kind, FailureKind::ArtifactMissing);
    }

    #[tokio::test]
    async fn retryable_stage_uses_full_budget_non_retryable_does_not() {
        let fs = MockFileSystem::new();
        let unit = unit(&fs);
        let mut runner = FakeRunner::new(&fs);
        runner.failing = Some("b");
        let (seq, runner) = setup(runner, &fs, abc());

        let report = seq.advance(&unit).await;
        let failure = report.failure().unwrap();
        assert_eq!(failure.kind, FailureKind::ToolFailure);
        assert_eq!(failure.attempts, 3);
        assert_eq!(
            runner.calls(),
            vec![
                ("a".to_string(), 1),
                ("b".to_string(), 1),
                ("b".to_string(), 2),
                ("b".to_string(), 3)
            ]
        );

        let fs = MockFileSystem::new();
        let unit = self::unit(&fs);
        let mut runner = FakeRunner::new(&fs);
        runner.failing = Some("c");
        let (seq, runner) = setup(runner, &fs, abc());
        let report = seq.advance(&unit).await;
        assert_eq!(report.failure().unwrap().attempts, 1);
        assert_eq!(stage_names(&runner.calls()), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn exit_zero_without_artifacts_is_a_tool_failure() {
        let fs = MockFileSystem::new();
        let unit = unit(&fs);
        let mut runner = FakeRunner::new(&fs);
        runner.silent = Some("a");
        let (seq, _runner) = setup(runner, &fs, abc());

        let report = seq.advance(&unit).await;
        let failure = report.failure().unwrap();
        assert_eq!(failure.kind, FailureKind::ToolFailure);
        assert!(failure.message.contains("exited 0"), "{}", failure.message);
        assert!(seq.store.load(&unit.id).unwrap().unwrap().last_completed.is_none());
    }

    #[tokio::test]
    async fn clear_stage_drops_partial_output_before_running() {
        let fs = MockFileSystem::new();
        let unit = unit(&fs);
        let (seq, _runner) = setup(
            FakeRunner::new(&fs),
            &fs,
            vec![def("a", true, Idempotence::Clear)],
        );
        let partial = seq.layout.stage_dir(&unit.id, "a").join("half-written.tmp");
        fs.add_file(&partial, "junk");

        assert!(seq.advance(&unit).await.is_done());
        assert!(!fs.exists(&partial));
    }

    #[tokio::test]
    async fn missing_input_is_artifact_missing() {
        let fs = MockFileSystem::new();
        let unit = Unit::new(PathBuf::from("/raw/gone.raw"), "short", BTreeMap::new());
        let (seq, runner) = setup(FakeRunner::new(&fs), &fs, abc());

        let report = seq.advance(&unit).await;
        assert_eq!(report.failure().unwrap().kind, FailureKind::ArtifactMissing);
        assert!(runner.calls().is_empty());
    }
}

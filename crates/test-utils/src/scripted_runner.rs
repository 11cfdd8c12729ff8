use std::collections::HashMap;
use std::fs::OpenOptions;
use std::future::Future;
use std::io::Write;
use std::path::Path;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ffapipe::exec::log::{exit_line, launch_failed_line, start_line};
use ffapipe::exec::{ExitOutcome, ProcessRunner, RunReport};
use ffapipe::stages::StageCommand;
use tokio::sync::Notify;

/// What the fake tool does when a rule matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Behaviour {
    /// Write `<stage>.out` into the stage directory and exit 0.
    Succeed,
    /// Exit with `code` without writing anything.
    Fail(i32),
    /// Pretend the binary does not exist.
    LaunchFail,
    /// Exit 0 without writing any artifact.
    SucceedEmpty,
    /// Never finish (a run killed mid-stage).
    Block,
    /// Write the artifact, then never finish (killed between the artifact
    /// write and the checkpoint commit).
    WriteThenHang,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub unit_id: String,
    pub stage: String,
    pub attempt: u32,
}

struct Rule {
    /// Matches units whose id starts with `<stem>.`; `None` matches all.
    unit_stem: Option<String>,
    stage: String,
    behaviour: Behaviour,
}

/// A fake [`ProcessRunner`] that:
/// - records every invocation,
/// - writes artifacts and log markers to the real filesystem,
/// - fails, blocks or hangs on the stages it is told to,
/// - tracks how many invocations run concurrently, per unit and overall.
#[derive(Default)]
pub struct ScriptedRunner {
    rules: Vec<Rule>,
    delay: Option<Duration>,
    calls: Mutex<Vec<Invocation>>,
    active_per_unit: Mutex<HashMap<String, usize>>,
    max_per_unit: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    parked: AtomicUsize,
    parked_notify: Notify,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `behaviour` to `stage` of every unit.
    pub fn on(mut self, stage: &str, behaviour: Behaviour) -> Self {
        self.rules.push(Rule {
            unit_stem: None,
            stage: stage.to_string(),
            behaviour,
        });
        self
    }

    /// Apply `behaviour` to `stage` of units built from inputs named `<stem>.*`.
    /// Unit-specific rules win over `on` rules regardless of order.
    pub fn on_unit(mut self, stem: &str, stage: &str, behaviour: Behaviour) -> Self {
        self.rules.push(Rule {
            unit_stem: Some(stem.to_string()),
            stage: stage.to_string(),
            behaviour,
        });
        self
    }

    /// Sleep this long inside every invocation.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }

    /// Stages launched for units built from `<stem>.*`, in order.
    pub fn stages_for(&self, stem: &str) -> Vec<String> {
        let prefix = format!("{stem}.");
        self.invocations()
            .into_iter()
            .filter(|i| i.unit_id.starts_with(&prefix))
            .map(|i| i.stage)
            .collect()
    }

    /// Highest number of simultaneous invocations seen for any single unit.
    pub fn max_concurrent_per_unit(&self) -> usize {
        self.max_per_unit.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous invocations overall.
    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    /// Wait until `n` invocations are parked in `Block` / `WriteThenHang`.
    pub async fn wait_for_parked(&self, n: usize) {
        loop {
            let notified = self.parked_notify.notified();
            if self.parked.load(Ordering::SeqCst) >= n {
                return;
            }
            notified.await;
        }
    }

    fn behaviour_for(&self, cmd: &StageCommand) -> Behaviour {
        let specific = self.rules.iter().find(|r| {
            r.stage == cmd.stage
                && r.unit_stem
                    .as_ref()
                    .is_some_and(|stem| cmd.unit_id.starts_with(&format!("{stem}.")))
        });
        let general = self
            .rules
            .iter()
            .find(|r| r.stage == cmd.stage && r.unit_stem.is_none());
        specific
            .or(general)
            .map(|r| r.behaviour.clone())
            .unwrap_or(Behaviour::Succeed)
    }

    fn enter(&self, unit: &str) -> ActiveGuard<'_> {
        {
            let mut map = self.active_per_unit.lock().unwrap();
            let count = map.entry(unit.to_string()).or_insert(0);
            *count += 1;
            self.max_per_unit.fetch_max(*count, Ordering::SeqCst);
        }
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        ActiveGuard {
            runner: self,
            unit: unit.to_string(),
        }
    }

    async fn park(&self) {
        self.parked.fetch_add(1, Ordering::SeqCst);
        self.parked_notify.notify_waiters();
        std::future::pending::<()>().await;
    }
}

/// Decrements the concurrency counters even when the invocation future is
/// dropped (aborted run).
struct ActiveGuard<'a> {
    runner: &'a ScriptedRunner,
    unit: String,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut map) = self.runner.active_per_unit.lock() {
            if let Some(count) = map.get_mut(&self.unit) {
                *count = count.saturating_sub(1);
            }
        }
        self.runner.active.fetch_sub(1, Ordering::SeqCst);
    }
}

fn append_log(log_path: &Path, text: &str) {
    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(log_path) {
        let _ = file.write_all(text.as_bytes());
    }
}

fn write_artifact(cmd: &StageCommand) {
    std::fs::create_dir_all(&cmd.cwd).expect("creating stage dir");
    std::fs::write(
        cmd.cwd.join(format!("{}.out", cmd.stage)),
        format!("{} {}\n", cmd.unit_id, cmd.stage),
    )
    .expect("writing artifact");
}

impl ProcessRunner for ScriptedRunner {
    fn run<'a>(
        &'a self,
        cmd: &'a StageCommand,
        log_path: &'a Path,
    ) -> Pin<Box<dyn Future<Output = RunReport> + Send + 'a>> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(Invocation {
                unit_id: cmd.unit_id.clone(),
                stage: cmd.stage.clone(),
                attempt: cmd.attempt,
            });
            let _guard = self.enter(&cmd.unit_id);
            let behaviour = self.behaviour_for(cmd);

            if behaviour == Behaviour::LaunchFail {
                append_log(log_path, &launch_failed_line(0, "No such file or directory"));
                return RunReport {
                    outcome: ExitOutcome::RunnerFailure {
                        reason: format!("spawning '{}': No such file or directory", cmd.program),
                    },
                    duration: Duration::ZERO,
                };
            }

            append_log(log_path, &start_line(0, cmd.attempt, &cmd.to_string()));
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            let outcome = match behaviour {
                Behaviour::Succeed => {
                    write_artifact(cmd);
                    ExitOutcome::Success
                }
                Behaviour::SucceedEmpty => {
                    std::fs::create_dir_all(&cmd.cwd).expect("creating stage dir");
                    ExitOutcome::Success
                }
                Behaviour::Fail(code) => ExitOutcome::ToolFailure { code },
                Behaviour::Block => {
                    self.park().await;
                    unreachable!()
                }
                Behaviour::WriteThenHang => {
                    write_artifact(cmd);
                    self.park().await;
                    unreachable!()
                }
                Behaviour::LaunchFail => unreachable!(),
            };

            let code = outcome.exit_code().unwrap_or(-1);
            append_log(log_path, &exit_line(0, code, Duration::ZERO));
            RunReport {
                outcome,
                duration: Duration::ZERO,
            }
        })
    }
}

// src/engine/distributor.rs

//! Bounded worker pool over a shared FIFO of units.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::errors::{PipelineError, Result};
use crate::manifest::Unit;
use crate::types::FailureKind;

use super::{RunSummary, StageSequencer, UnitReport};

type Queue = Arc<Mutex<VecDeque<(usize, Unit)>>>;

/// Hands units to at most `workers` concurrent sequencer calls.
///
/// Each unit is popped from the queue exactly once, so no two workers ever
/// hold the same unit. A failed unit is recorded and the worker moves on.
pub struct WorkDistributor {
    sequencer: Arc<StageSequencer>,
    workers: usize,
}

/// Shared between workers; set once an environment-level failure is seen.
#[derive(Default)]
struct AbortSignal {
    raised: AtomicBool,
    reason: Mutex<Option<String>>,
}

impl AbortSignal {
    fn raise(&self, reason: String) {
        let mut slot = self.reason.lock().unwrap_or_else(|e| e.into_inner());
        slot.get_or_insert(reason);
        self.raised.store(true, Ordering::SeqCst);
    }

    fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }

    fn reason(&self) -> Option<String> {
        self.reason.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl WorkDistributor {
    pub fn new(sequencer: Arc<StageSequencer>, workers: usize) -> Self {
        Self {
            sequencer,
            workers: workers.max(1),
        }
    }

    /// Process `units` (already filtered to this node) to completion.
    ///
    /// Returns [`PipelineError::Environment`] if the first queued unit could
    /// not launch a tool before any stage succeeded: the environment is
    /// broken and every other unit would fail the same way. Units already in
    /// flight are allowed to finish; nothing new is started.
    pub async fn run(&self, units: Vec<Unit>) -> Result<RunSummary> {
        let total = units.len();
        let all_ids: Vec<String> = units.iter().map(|u| u.id.clone()).collect();
        let queue: Queue = Arc::new(Mutex::new(units.into_iter().enumerate().collect()));
        let abort = Arc::new(AbortSignal::default());

        let pool = self.workers.min(total);
        info!(units = total, workers = pool, "starting worker pool");

        let mut set = JoinSet::new();
        for worker in 0..pool {
            let queue = queue.clone();
            let abort = abort.clone();
            let sequencer = self.sequencer.clone();
            set.spawn(async move { worker_loop(worker, queue, abort, sequencer).await });
        }

        let mut reports = Vec::with_capacity(total);
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(mut batch) => reports.append(&mut batch),
                Err(err) => {
                    error!(error = %err, "worker task panicked");
                    return Err(PipelineError::Other(anyhow::anyhow!("worker task failed: {err}")));
                }
            }
        }

        let summary = RunSummary::from_reports(&all_ids, reports);
        if let Some(reason) = abort.reason() {
            error!(%reason, "run aborted");
            return Err(PipelineError::Environment {
                reason,
                summary: Box::new(summary),
            });
        }
        Ok(summary)
    }
}

async fn worker_loop(
    worker: usize,
    queue: Queue,
    abort: Arc<AbortSignal>,
    sequencer: Arc<StageSequencer>,
) -> Vec<UnitReport> {
    let mut reports = Vec::new();
    loop {
        if abort.is_raised() {
            debug!(worker, "abort raised, worker stopping");
            break;
        }
        // The guard is dropped before the await below.
        let next = queue.lock().unwrap_or_else(|e| e.into_inner()).pop_front();
        let Some((position, unit)) = next else {
            break;
        };

        debug!(worker, unit = %unit.id, position, "worker picked unit");
        let report = sequencer.advance(&unit).await;

        if position == 0 && report.completed.is_empty() {
            if let Some(failure) = report.failure() {
                if failure.kind == FailureKind::RunnerFailure && failure.stage_index == 0 {
                    abort.raise(format!(
                        "first unit '{}' could not run stage '{}': {}",
                        failure.unit_id, failure.stage, failure.message
                    ));
                }
            }
        }
        reports.push(report);
    }
    reports
}

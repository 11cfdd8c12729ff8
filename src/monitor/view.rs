// src/monitor/view.rs

//! Plain-text rendering of a [`RunState`].

use std::fmt::Write as _;

use crate::types::UnitStatus;

use super::reconciler::{RunState, UnitState};

/// Render a snapshot as a fixed-width table followed by discrepancies and
/// log tails. Pure: the same state always renders the same text.
pub fn render(state: &RunState) -> String {
    let mut out = String::new();
    let c = &state.counts;
    let _ = writeln!(out, "run {}", state.root.display());
    let nodes = if state.nodes.is_empty() {
        "-".to_string()
    } else {
        state.nodes.join(", ")
    };
    let _ = writeln!(
        out,
        "workers {} per node, retry budget {}, nodes: {}",
        state.workers, state.retry_budget, nodes
    );
    let _ = writeln!(out, "stages: {}", state.stages.join(" -> "));
    let _ = writeln!(
        out,
        "{} units: {} done, {} running, {} failed, {} pending",
        c.total(),
        c.done,
        c.running,
        c.failed,
        c.pending
    );
    let _ = writeln!(out);

    let id_width = state
        .units
        .iter()
        .map(|u| u.id.len())
        .max()
        .unwrap_or(4)
        .max(4);
    let stage_width = state.stages.iter().map(|s| s.len()).max().unwrap_or(5).max(5);

    let _ = write!(out, "{:<id_width$}  {:<8}  {:<stage_width$}  {:>5}", "UNIT", "STATUS", "STAGE", "POS");
    for stage in &state.stages {
        let _ = write!(out, "  {:>w$}", stage, w = stage.len().max(3));
    }
    let _ = writeln!(out);

    for unit in &state.units {
        let current = state
            .stages
            .get(unit.next_stage)
            .map(String::as_str)
            .unwrap_or("-");
        let pos = format!("{}/{}", unit.next_stage.min(state.stages.len()), state.stages.len());
        let _ = write!(
            out,
            "{:<id_width$}  {:<8}  {:<stage_width$}  {:>5}",
            unit.id,
            unit.status.to_string(),
            current,
            pos
        );
        for (stage, count) in state.stages.iter().zip(&unit.artifact_counts) {
            let _ = write!(out, "  {:>w$}", count, w = stage.len().max(3));
        }
        let _ = writeln!(out);
    }

    let flagged: Vec<&UnitState> = state
        .units
        .iter()
        .filter(|u| !u.discrepancies.is_empty() || u.note.is_some())
        .collect();
    if !flagged.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "discrepancies:");
        for unit in flagged {
            if let Some(note) = &unit.note {
                let _ = writeln!(out, "  {}: {}", unit.id, note);
            }
            for d in &unit.discrepancies {
                let _ = writeln!(out, "  {}: {}", unit.id, d);
            }
        }
    }

    if !state.orphans.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "checkpoints not in the manifest:");
        for id in &state.orphans {
            let _ = writeln!(out, "  {id}");
        }
    }

    for unit in &state.units {
        match unit.status {
            UnitStatus::Running | UnitStatus::Failed => {}
            _ => continue,
        }
        let _ = writeln!(out);
        match (&unit.status, &unit.failure) {
            (UnitStatus::Failed, Some(f)) => {
                let _ = writeln!(
                    out,
                    "== {} failed at '{}' [{}]: {}",
                    unit.id, f.stage, f.kind, f.message
                );
            }
            _ => {
                let _ = writeln!(out, "== {} {}", unit.id, unit.status);
            }
        }
        for line in &unit.log_tail {
            let _ = writeln!(out, "   | {line}");
        }
    }

    out
}

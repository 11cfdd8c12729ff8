// src/engine/summary.rs

use std::collections::HashSet;
use std::fmt;

use crate::manifest::UnitId;

use super::{UnitFailure, UnitReport};

/// End-of-run tally.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub done: Vec<UnitId>,
    pub failed: Vec<UnitFailure>,
    /// Units never picked up (only after an abort).
    pub not_started: Vec<UnitId>,
}

impl RunSummary {
    /// Fold `reports` into a summary; ids in `all` without a report count as
    /// not started.
    pub fn from_reports(all: &[UnitId], reports: Vec<UnitReport>) -> Self {
        let mut summary = RunSummary::default();
        let mut seen = HashSet::new();
        for report in reports {
            seen.insert(report.unit_id.clone());
            match report.failure() {
                Some(failure) => summary.failed.push(failure.clone()),
                None => summary.done.push(report.unit_id),
            }
        }
        summary.not_started = all.iter().filter(|id| !seen.contains(*id)).cloned().collect();

        summary.done.sort();
        summary.failed.sort_by(|a, b| a.unit_id.cmp(&b.unit_id));
        summary
    }

    pub fn total(&self) -> usize {
        self.done.len() + self.failed.len() + self.not_started.len()
    }

    pub fn all_done(&self) -> bool {
        self.failed.is_empty() && self.not_started.is_empty()
    }

    pub fn failed_ids(&self) -> Vec<&str> {
        self.failed.iter().map(|f| f.unit_id.as_str()).collect()
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} units: {} done, {} failed, {} not started",
            self.total(),
            self.done.len(),
            self.failed.len(),
            self.not_started.len()
        )?;
        if !self.failed.is_empty() {
            writeln!(f, "failed units:")?;
            for failure in &self.failed {
                writeln!(
                    f,
                    "  {} [{}] at stage '{}': {}",
                    failure.unit_id, failure.kind, failure.stage, failure.message
                )?;
                if let Some(log) = &failure.log_path {
                    writeln!(f, "      log: {}", log.display())?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::UnitOutcome;
    use crate::types::FailureKind;
    use std::path::PathBuf;

    fn report(id: &str, failed: bool) -> UnitReport {
        let mut report = UnitReport::new(id);
        if failed {
            report.outcome = UnitOutcome::Failed(UnitFailure {
                unit_id: id.to_string(),
                stage_index: 1,
                stage: "search".to_string(),
                kind: FailureKind::ToolFailure,
                message: "exited with code 2".to_string(),
                attempts: 3,
                log_path: Some(PathBuf::from("/run/units/x/logs/01-search.log")),
            });
        }
        report
    }

    #[test]
    fn summary_counts_and_lists_failures() {
        let all = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let summary = RunSummary::from_reports(&all, vec![report("b", true), report("a", false)]);

        assert_eq!(summary.done, vec!["a"]);
        assert_eq!(summary.failed_ids(), vec!["b"]);
        assert_eq!(summary.not_started, vec!["c"]);
        assert!(!summary.all_done());

        let text = summary.to_string();
        assert!(text.starts_with("3 units: 1 done, 1 failed, 1 not started"));
        assert!(text.contains("b [tool-failure] at stage 'search'"));
        assert!(text.contains("log: /run/units/x/logs/01-search.log"));
    }
}

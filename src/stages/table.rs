// src/stages/table.rs

//! The ordered stage chain every unit walks through.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::{ConfigFile, StageConfig};
use crate::manifest::{RunLayout, Unit};
use crate::types::Idempotence;

use super::template::{materialize, TemplateContext, TemplateError};

/// Static description of one stage, as frozen into the run manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageDef {
    pub name: String,
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub outputs: Vec<String>,
    pub retryable: bool,
    #[serde(default)]
    pub idempotence: Idempotence,
    #[serde(default)]
    pub checksum: bool,
}

impl From<&StageConfig> for StageDef {
    fn from(cfg: &StageConfig) -> Self {
        Self {
            name: cfg.name.clone(),
            program: cfg.program.clone(),
            args: cfg.args.clone(),
            outputs: cfg.outputs.clone(),
            retryable: cfg.retryable,
            idempotence: cfg.idempotence,
            checksum: cfg.checksum,
        }
    }
}

/// A fully materialized invocation, ready for the process runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageCommand {
    pub unit_id: String,
    pub stage_index: usize,
    pub stage: String,
    pub program: String,
    pub args: Vec<String>,
    /// Working directory; the stage's own output directory.
    pub cwd: PathBuf,
    /// 1-based attempt number, set by the sequencer before each launch.
    pub attempt: u32,
}

impl fmt::Display for StageCommand {
    /// Shell-like rendering for logs only; never executed through a shell.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", quote(&self.program))?;
        for arg in &self.args {
            write!(f, " {}", quote(arg))?;
        }
        Ok(())
    }
}

fn quote(s: &str) -> String {
    if !s.is_empty() && !s.contains(|c: char| c.is_whitespace() || c == '\'' || c == '"') {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', r"'\''"))
    }
}

/// Ordered, immutable stage chain. Stage `i + 1` consumes stage `i`'s
/// artifacts; there is no branching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageTable {
    stages: Vec<StageDef>,
}

impl StageTable {
    pub fn new(stages: Vec<StageDef>) -> Self {
        Self { stages }
    }

    pub fn from_config(cfg: &ConfigFile) -> Self {
        Self::new(cfg.stages().iter().map(StageDef::from).collect())
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&StageDef> {
        self.stages.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &StageDef> {
        self.stages.iter()
    }

    pub fn defs(&self) -> &[StageDef] {
        &self.stages
    }

    /// Build the command for stage `index` of `unit`.
    pub fn command_for(
        &self,
        index: usize,
        unit: &Unit,
        layout: &RunLayout,
    ) -> Result<StageCommand, TemplateError> {
        let stage = self
            .stages
            .get(index)
            .ok_or_else(|| TemplateError::UnknownStage(format!("#{index}")))?;

        let unit_dir = layout.unit_dir(&unit.id);
        let out_dir = layout.stage_dir(&unit.id, &stage.name);
        let input_dir = unit
            .input
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let earlier: Vec<(&str, PathBuf)> = self.stages[..index]
            .iter()
            .map(|s| (s.name.as_str(), layout.stage_dir(&unit.id, &s.name)))
            .collect();
        let prev_dir = earlier
            .last()
            .map(|(_, dir)| dir.clone())
            .unwrap_or(input_dir);

        let ctx = TemplateContext {
            input: &unit.input,
            unit_id: &unit.id,
            unit_dir: &unit_dir,
            out_dir: &out_dir,
            prev_dir: &prev_dir,
            search: &unit.search,
            earlier_stage_dirs: earlier
                .iter()
                .map(|(name, dir)| (*name, dir.as_path()))
                .collect::<BTreeMap<_, _>>(),
            params: &unit.params,
        };

        let args = stage
            .args
            .iter()
            .map(|a| materialize(a, &ctx))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(StageCommand {
            unit_id: unit.id.clone(),
            stage_index: index,
            stage: stage.name.clone(),
            program: stage.program.clone(),
            args,
            cwd: out_dir,
            attempt: 1,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(name: &str, args: &[&str]) -> StageDef {
        StageDef {
            name: name.to_string(),
            program: format!("{name}-tool"),
            args: args.iter().map(|s| s.to_string()).collect(),
            outputs: vec!["*".to_string()],
            retryable: true,
            idempotence: Idempotence::Rerun,
            checksum: false,
        }
    }

    #[test]
    fn command_wires_previous_stage_directories() {
        let table = StageTable::new(vec![
            def("rfi", &["{input}", "-o", "{out_dir}"]),
            def("dedisp", &["-mask", "{prev_dir}/m.mask", "{dir:rfi}", "-dm", "{dm}"]),
        ]);
        let mut params = BTreeMap::new();
        params.insert("dm".to_string(), "30".to_string());
        let unit = Unit::new(PathBuf::from("/raw/obs.raw"), "short", params);
        let layout = RunLayout::new("/run");

        let first = table.command_for(0, &unit, &layout).unwrap();
        assert_eq!(first.args[0], "/raw/obs.raw");
        assert_eq!(first.cwd, layout.stage_dir(&unit.id, "rfi"));

        let second = table.command_for(1, &unit, &layout).unwrap();
        let rfi_dir = layout.stage_dir(&unit.id, "rfi");
        assert_eq!(
            second.args,
            vec![
                "-mask".to_string(),
                format!("{}/m.mask", rfi_dir.display()),
                rfi_dir.display().to_string(),
                "-dm".to_string(),
                "30".to_string(),
            ]
        );
    }

    #[test]
    fn display_quotes_arguments_with_spaces() {
        let cmd = StageCommand {
            unit_id: "u".to_string(),
            stage_index: 0,
            stage: "rfi".to_string(),
            program: "rfifind".to_string(),
            args: vec!["-o".to_string(), "my mask".to_string()],
            cwd: PathBuf::from("/tmp"),
            attempt: 1,
        };
        assert_eq!(cmd.to_string(), "rfifind -o 'my mask'");
    }
}

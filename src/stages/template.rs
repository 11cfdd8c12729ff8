// src/stages/template.rs

//! Argument templates for stage commands.
//!
//! Every `args` entry of a stage is a string with `{placeholder}` holes.
//! Each entry is materialized on its own into exactly one argv element, so
//! a path containing spaces or shell metacharacters is passed through
//! verbatim and never re-split or interpreted.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use thiserror::Error;

static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*(?::[A-Za-z0-9_.\-]+)?)\}")
        .expect("placeholder pattern is a valid regex")
});

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("unknown placeholder '{{{0}}}'")]
    UnknownPlaceholder(String),

    #[error("search parameter '{0}' is not defined")]
    MissingParam(String),

    #[error("'{{dir:{0}}}' does not name an earlier stage")]
    UnknownStage(String),
}

/// A parsed `{...}` hole.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placeholder {
    /// Path of the observation file.
    Input,
    /// Observation file name without its extension.
    InputStem,
    /// Directory holding the observation file.
    InputDir,
    UnitId,
    /// `units/<unit_id>` under the run root.
    UnitDir,
    /// Output (and working) directory of the stage being run.
    OutDir,
    /// Output directory of the previous stage, or `InputDir` for the first.
    PrevDir,
    /// Name of the search configuration.
    Search,
    /// `{dir:<stage>}`: output directory of a named earlier stage.
    StageDir(String),
    /// Anything else: looked up in the search parameters.
    Param(String),
}

impl Placeholder {
    pub fn parse(token: &str) -> Result<Self, TemplateError> {
        if let Some((prefix, rest)) = token.split_once(':') {
            return match prefix {
                "dir" => Ok(Placeholder::StageDir(rest.to_string())),
                _ => Err(TemplateError::UnknownPlaceholder(token.to_string())),
            };
        }

        Ok(match token {
            "input" => Placeholder::Input,
            "input_stem" => Placeholder::InputStem,
            "input_dir" => Placeholder::InputDir,
            "unit_id" => Placeholder::UnitId,
            "unit_dir" => Placeholder::UnitDir,
            "out_dir" => Placeholder::OutDir,
            "prev_dir" => Placeholder::PrevDir,
            "search" => Placeholder::Search,
            other => Placeholder::Param(other.to_string()),
        })
    }
}

/// All placeholders appearing in `template`, in order of appearance.
pub fn placeholders(template: &str) -> Result<Vec<Placeholder>, TemplateError> {
    PLACEHOLDER_RE
        .captures_iter(template)
        .map(|caps| Placeholder::parse(&caps[1]))
        .collect()
}

/// Values available while materializing one stage command.
#[derive(Debug, Clone)]
pub struct TemplateContext<'a> {
    pub input: &'a Path,
    pub unit_id: &'a str,
    pub unit_dir: &'a Path,
    pub out_dir: &'a Path,
    pub prev_dir: &'a Path,
    pub search: &'a str,
    /// Output directories of the stages *before* the one being run.
    pub earlier_stage_dirs: BTreeMap<&'a str, &'a Path>,
    pub params: &'a BTreeMap<String, String>,
}

impl TemplateContext<'_> {
    fn resolve(&self, placeholder: &Placeholder) -> Result<String, TemplateError> {
        let text = match placeholder {
            Placeholder::Input => path_text(self.input),
            Placeholder::InputStem => self
                .input
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default(),
            Placeholder::InputDir => self
                .input
                .parent()
                .map(path_text)
                .unwrap_or_else(|| ".".to_string()),
            Placeholder::UnitId => self.unit_id.to_string(),
            Placeholder::UnitDir => path_text(self.unit_dir),
            Placeholder::OutDir => path_text(self.out_dir),
            Placeholder::PrevDir => path_text(self.prev_dir),
            Placeholder::Search => self.search.to_string(),
            Placeholder::StageDir(stage) => self
                .earlier_stage_dirs
                .get(stage.as_str())
                .map(|p| path_text(p))
                .ok_or_else(|| TemplateError::UnknownStage(stage.clone()))?,
            Placeholder::Param(name) => self
                .params
                .get(name)
                .cloned()
                .ok_or_else(|| TemplateError::MissingParam(name.clone()))?,
        };
        Ok(text)
    }
}

/// Materialize one argument template into a single argv element.
pub fn materialize(template: &str, ctx: &TemplateContext<'_>) -> Result<String, TemplateError> {
    let mut failure = None;
    let out = PLACEHOLDER_RE.replace_all(template, |caps: &Captures<'_>| {
        match Placeholder::parse(&caps[1]).and_then(|p| ctx.resolve(&p)) {
            Ok(text) => text,
            Err(e) => {
                failure.get_or_insert(e);
                String::new()
            }
        }
    });

    match failure {
        Some(e) => Err(e),
        None => Ok(out.into_owned()),
    }
}

fn path_text(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

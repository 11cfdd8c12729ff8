// src/config/validate.rs

use std::collections::HashSet;

use globset::Glob;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{PipelineError, Result};
use crate::stages::template::{placeholders, Placeholder};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = PipelineError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_stages_and_searches(cfg)?;
    validate_pipeline_section(cfg)?;
    validate_names(cfg)?;
    validate_outputs(cfg)?;
    validate_templates(cfg)?;
    Ok(())
}

fn config_error(msg: impl Into<String>) -> PipelineError {
    PipelineError::ConfigError(msg.into())
}

fn ensure_has_stages_and_searches(cfg: &RawConfigFile) -> Result<()> {
    if cfg.stages.is_empty() {
        return Err(config_error(
            "config must contain at least one [[stage]] section",
        ));
    }
    if cfg.searches.is_empty() {
        return Err(config_error(
            "config must contain at least one [[search]] section",
        ));
    }
    Ok(())
}

fn validate_pipeline_section(cfg: &RawConfigFile) -> Result<()> {
    if cfg.pipeline.workers == 0 {
        return Err(config_error("[pipeline].workers must be >= 1 (got 0)"));
    }

    let mut seen = HashSet::new();
    for node in &cfg.pipeline.nodes {
        if node.trim().is_empty() {
            return Err(config_error("[pipeline].nodes contains an empty name"));
        }
        if !seen.insert(node.as_str()) {
            return Err(config_error(format!(
                "[pipeline].nodes lists '{}' more than once",
                node
            )));
        }
    }
    Ok(())
}

/// Stage and search names end up as path components and inside unit ids.
fn is_safe_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn validate_names(cfg: &RawConfigFile) -> Result<()> {
    let mut stages = HashSet::new();
    for stage in &cfg.stages {
        if !is_safe_name(&stage.name) {
            return Err(config_error(format!(
                "stage name '{}' may only contain letters, digits, '_' and '-'",
                stage.name
            )));
        }
        if stage.name == crate::manifest::layout::LOGS_DIR {
            return Err(config_error(format!(
                "stage name '{}' is reserved",
                stage.name
            )));
        }
        if !stages.insert(stage.name.as_str()) {
            return Err(config_error(format!(
                "duplicate stage name '{}'",
                stage.name
            )));
        }
        if stage.program.trim().is_empty() {
            return Err(config_error(format!(
                "stage '{}' has an empty `program`",
                stage.name
            )));
        }
    }

    let mut searches = HashSet::new();
    for search in &cfg.searches {
        if !is_safe_name(&search.name) {
            return Err(config_error(format!(
                "search name '{}' may only contain letters, digits, '_' and '-'",
                search.name
            )));
        }
        if !searches.insert(search.name.as_str()) {
            return Err(config_error(format!(
                "duplicate search name '{}'",
                search.name
            )));
        }
    }
    Ok(())
}

fn validate_outputs(cfg: &RawConfigFile) -> Result<()> {
    for stage in &cfg.stages {
        if stage.outputs.is_empty() {
            return Err(config_error(format!(
                "stage '{}' must declare at least one `outputs` pattern",
                stage.name
            )));
        }
        for pattern in &stage.outputs {
            Glob::new(pattern).map_err(|e| {
                config_error(format!(
                    "stage '{}' has invalid output pattern '{}': {}",
                    stage.name, pattern, e
                ))
            })?;
        }
    }
    Ok(())
}

/// Every placeholder must resolve for every unit: built-ins always do,
/// `{dir:X}` needs X to be an earlier stage, and a parameter must be
/// defined by every search (any search can be paired with any source).
fn validate_templates(cfg: &RawConfigFile) -> Result<()> {
    for (index, stage) in cfg.stages.iter().enumerate() {
        for arg in &stage.args {
            let found = placeholders(arg).map_err(|e| {
                config_error(format!("stage '{}', argument '{}': {}", stage.name, arg, e))
            })?;

            for placeholder in found {
                match placeholder {
                    Placeholder::StageDir(target) => {
                        let earlier = cfg.stages[..index].iter().any(|s| s.name == target);
                        if !earlier {
                            return Err(config_error(format!(
                                "stage '{}': '{{dir:{}}}' does not name an earlier stage",
                                stage.name, target
                            )));
                        }
                    }
                    Placeholder::Param(name) => {
                        if let Some(search) =
                            cfg.searches.iter().find(|s| !s.params.contains_key(&name))
                        {
                            return Err(config_error(format!(
                                "stage '{}' uses '{{{}}}' but search '{}' does not define it",
                                stage.name, name, search.name
                            )));
                        }
                    }
                    _ => {}
                }
            }
        }
    }
    Ok(())
}

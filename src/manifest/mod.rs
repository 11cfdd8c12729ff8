// src/manifest/mod.rs

//! Run manifest: the immutable list of units plus the settings a run was
//! started with.
//!
//! - [`unit`] defines a unit and how its id is derived.
//! - [`sources`] resolves the observation files.
//! - [`layout`] maps units and stages onto paths under the run root.

pub mod layout;
pub mod sources;
pub mod unit;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::ConfigFile;
use crate::errors::{PipelineError, Result};
use crate::fs::FileSystem;
use crate::stages::{StageDef, StageTable};
use crate::types::unix_now;

pub use layout::RunLayout;
pub use sources::resolve_sources;
pub use unit::{unit_id, Unit, UnitId};

pub const MANIFEST_VERSION: u32 = 1;

/// Everything a run needs to be reproduced or resumed.
///
/// Written once when a fresh run starts and only ever read afterwards.
/// The stage table is frozen in here too, so the monitor can interpret a run
/// root without access to the original config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    pub version: u32,
    pub created_at: u64,
    pub output_root: PathBuf,
    pub workers: usize,
    pub retry_budget: u32,
    #[serde(default)]
    pub nodes: Vec<String>,
    #[serde(rename = "stage")]
    pub stages: Vec<StageDef>,
    #[serde(default, rename = "unit")]
    pub units: Vec<Unit>,
}

impl RunManifest {
    /// Enumerate one unit per (source, search) pair.
    ///
    /// Units are ordered source-major; with `[pipeline].nodes` set, they are
    /// dealt round-robin onto the nodes in that order. The partition is fixed
    /// here and never rebalanced.
    pub fn build(cfg: &ConfigFile, sources: &[PathBuf]) -> Result<Self> {
        if sources.is_empty() {
            return Err(PipelineError::ManifestError(
                "no observation files to process".to_string(),
            ));
        }

        let nodes = &cfg.pipeline().nodes;
        let mut units = Vec::with_capacity(sources.len() * cfg.searches().len());
        for source in sources {
            for search in cfg.searches() {
                let mut unit = Unit::new(source.clone(), &search.name, search.params.clone());
                if !nodes.is_empty() {
                    unit.node = Some(nodes[units.len() % nodes.len()].clone());
                }
                units.push(unit);
            }
        }

        let mut seen = HashSet::new();
        for unit in &units {
            if !seen.insert(unit.id.as_str()) {
                return Err(PipelineError::ManifestError(format!(
                    "duplicate unit id '{}' (source {:?}, search '{}')",
                    unit.id, unit.input, unit.search
                )));
            }
        }

        info!(
            units = units.len(),
            sources = sources.len(),
            searches = cfg.searches().len(),
            "built run manifest"
        );

        Ok(Self {
            version: MANIFEST_VERSION,
            created_at: unix_now(),
            output_root: cfg.pipeline().output_root.clone(),
            workers: cfg.pipeline().workers,
            retry_budget: cfg.pipeline().retry_budget,
            nodes: nodes.clone(),
            stages: StageTable::from_config(cfg).defs().to_vec(),
            units,
        })
    }

    /// Load the manifest stored under `layout`, if any.
    pub fn load(fs: &dyn FileSystem, layout: &RunLayout) -> Result<Option<Self>> {
        let path = layout.manifest_path();
        if !fs.exists(&path) {
            return Ok(None);
        }
        let text = fs.read_to_string(&path)?;
        let manifest: RunManifest = toml::from_str(&text)?;
        if manifest.version != MANIFEST_VERSION {
            return Err(PipelineError::ManifestError(format!(
                "{:?} has version {}, expected {}",
                path, manifest.version, MANIFEST_VERSION
            )));
        }
        debug!(path = ?path, units = manifest.units.len(), "loaded run manifest");
        Ok(Some(manifest))
    }

    /// Persist the manifest (temp file + rename).
    ///
    /// Several nodes may create the manifest of a shared run root at the
    /// same moment, so each process writes its own temp file.
    pub fn persist(&self, fs: &dyn FileSystem, layout: &RunLayout) -> Result<()> {
        let path = layout.manifest_path();
        let mut tmp = tmp_path(&path).into_os_string();
        tmp.push(format!(".{}", std::process::id()));
        let tmp = PathBuf::from(tmp);
        let text = toml::to_string(self)?;
        fs.write(&tmp, text.as_bytes())?;
        fs.rename(&tmp, &path)?;
        info!(path = ?path, "persisted run manifest");
        Ok(())
    }

    pub fn stage_table(&self) -> StageTable {
        StageTable::new(self.stages.clone())
    }

    /// Units this machine is responsible for.
    ///
    /// `None` selects every unit (single-machine operation).
    pub fn units_for_node(&self, node: Option<&str>) -> Result<Vec<Unit>> {
        let Some(node) = node else {
            return Ok(self.units.clone());
        };
        if !self.nodes.iter().any(|n| n == node) {
            return Err(PipelineError::ConfigError(format!(
                "node '{}' is not part of this run (nodes: {:?})",
                node, self.nodes
            )));
        }
        Ok(self
            .units
            .iter()
            .filter(|u| u.node.as_deref() == Some(node))
            .cloned()
            .collect())
    }

    /// Whether `other` assigns the same units to the same nodes and runs
    /// them through the same stages. Nodes sharing a run root must agree on
    /// this before any of them starts work.
    pub fn same_partition(&self, other: &RunManifest) -> bool {
        let mine: HashSet<(&str, Option<&str>)> =
            self.units.iter().map(|u| (u.id.as_str(), u.node.as_deref())).collect();
        let theirs: HashSet<(&str, Option<&str>)> =
            other.units.iter().map(|u| (u.id.as_str(), u.node.as_deref())).collect();
        mine == theirs && self.stages == other.stages
    }

    /// Whether `other` describes the same set of unit ids.
    pub fn same_units(&self, other: &RunManifest) -> bool {
        let mine: HashSet<&str> = self.units.iter().map(|u| u.id.as_str()).collect();
        let theirs: HashSet<&str> = other.units.iter().map(|u| u.id.as_str()).collect();
        mine == theirs
    }
}

/// Sibling path used for write-then-rename.
pub fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

// src/manifest/unit.rs

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::fs::hash::short_digest;

/// Canonical unit identifier type.
pub type UnitId = String;

/// One (observation file, search configuration) pair.
///
/// Progress through the stage chain is not stored here: the unit is an
/// immutable manifest entry, and its progress lives in its checkpoint record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    pub id: UnitId,
    pub input: PathBuf,
    pub search: String,

    /// Node this unit is statically assigned to (multi-machine runs only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,

    /// Search parameters, frozen into the manifest at build time.
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl Unit {
    pub fn new(
        input: PathBuf,
        search: impl Into<String>,
        params: BTreeMap<String, String>,
    ) -> Self {
        let search = search.into();
        Self {
            id: unit_id(&input, &search),
            input,
            search,
            node: None,
            params,
        }
    }
}

/// Derive the identifier of the unit processing `input` with `search`.
///
/// `<stem>.<search>.<digest8>`: readable in directory listings, and the
/// digest over the full path keeps two `obs.raw` files from different
/// directories apart. The same path and search always map to the same id,
/// which is what lets a resumed run find its checkpoints again.
pub fn unit_id(input: &Path, search: &str) -> UnitId {
    let stem = input
        .file_stem()
        .map(|s| sanitize(&s.to_string_lossy()))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "input".to_string());
    let digest = short_digest(&[&input.to_string_lossy(), search], 8);
    format!("{stem}.{search}.{digest}")
}

fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

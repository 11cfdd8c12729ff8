// src/stages/artifacts.rs

//! Locating and verifying the files a stage produced.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use globset::{GlobBuilder, GlobMatcher};

use crate::fs::{walk_files, FileSystem};

/// One file produced by a stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactFile {
    pub path: PathBuf,
    /// Path relative to the stage directory, `/`-separated.
    pub rel_path: String,
    pub size: u64,
}

/// Result of checking a stage directory against its `outputs` patterns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactCheck {
    /// Every pattern matched at least one file and no matched file is empty.
    Complete(Vec<ArtifactFile>),
    /// A pattern matched nothing.
    Missing { pattern: String },
    /// A matched file has zero length (typically a truncated write).
    Empty { path: PathBuf },
}

impl ArtifactCheck {
    pub fn is_complete(&self) -> bool {
        matches!(self, ArtifactCheck::Complete(_))
    }

    /// Human-readable reason when the check did not pass.
    pub fn problem(&self) -> Option<String> {
        match self {
            ArtifactCheck::Complete(_) => None,
            ArtifactCheck::Missing { pattern } => {
                Some(format!("no artifact matches '{pattern}'"))
            }
            ArtifactCheck::Empty { path } => Some(format!("artifact {:?} is empty", path)),
        }
    }
}

/// `*` does not cross directory separators; use `**` for nested outputs.
fn compile(pattern: &str) -> Result<GlobMatcher> {
    Ok(GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .with_context(|| format!("invalid output pattern: {pattern}"))?
        .compile_matcher())
}

/// All files in `dir` matched by any of `patterns`, sorted by path.
///
/// A missing directory yields an empty list.
pub fn collect_artifacts(
    fs: &dyn FileSystem,
    dir: &Path,
    patterns: &[String],
) -> Result<Vec<ArtifactFile>> {
    let matchers = patterns
        .iter()
        .map(|p| compile(p))
        .collect::<Result<Vec<_>>>()?;

    let mut found = Vec::new();
    for path in walk_files(fs, dir)? {
        let Ok(rel) = path.strip_prefix(dir) else {
            continue;
        };
        let rel_path = rel.to_string_lossy().replace('\\', "/");
        if matchers.iter().any(|m| m.is_match(&rel_path)) {
            let size = fs.file_len(&path)?;
            found.push(ArtifactFile {
                path,
                rel_path,
                size,
            });
        }
    }
    Ok(found)
}

/// Check that `dir` holds a complete, non-empty artifact set for `patterns`.
pub fn verify_artifacts(
    fs: &dyn FileSystem,
    dir: &Path,
    patterns: &[String],
) -> Result<ArtifactCheck> {
    let found = collect_artifacts(fs, dir, patterns)?;

    for pattern in patterns {
        let matcher = compile(pattern)?;
        if !found.iter().any(|a| matcher.is_match(&a.rel_path)) {
            return Ok(ArtifactCheck::Missing {
                pattern: pattern.clone(),
            });
        }
    }

    if let Some(empty) = found.iter().find(|a| a.size == 0) {
        return Ok(ArtifactCheck::Empty {
            path: empty.path.clone(),
        });
    }

    Ok(ArtifactCheck::Complete(found))
}

/// Check the raw observation file feeding the first stage.
pub fn verify_input(fs: &dyn FileSystem, input: &Path) -> Result<ArtifactCheck> {
    if !fs.is_file(input) {
        return Ok(ArtifactCheck::Missing {
            pattern: input.to_string_lossy().into_owned(),
        });
    }
    let size = fs.file_len(input)?;
    if size == 0 {
        return Ok(ArtifactCheck::Empty {
            path: input.to_path_buf(),
        });
    }
    let rel_path = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(ArtifactCheck::Complete(vec![ArtifactFile {
        path: input.to_path_buf(),
        rel_path,
        size,
    }]))
}

// src/manifest/sources.rs

//! Resolution of the observation files a run processes.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::{debug, info};

use crate::config::SourcesSection;
use crate::fs::{walk_files, FileSystem};

/// Collect every observation file for a run.
///
/// Sources are merged from three places:
/// - files named explicitly on the command line,
/// - a source-list file (one path per line, `#` comments),
/// - `[sources]` glob patterns under `[sources].root`.
///
/// The result is canonicalized, deduplicated and sorted, so the same inputs
/// always produce the same unit order and the same unit ids.
pub fn resolve_sources(
    fs: &dyn FileSystem,
    cfg: &SourcesSection,
    explicit: &[PathBuf],
    list_file: Option<&Path>,
) -> Result<Vec<PathBuf>> {
    let mut candidates: Vec<PathBuf> = explicit.to_vec();

    if let Some(list) = list_file {
        let listed = read_source_list(fs, list)?;
        debug!(count = listed.len(), list = ?list, "read source list");
        candidates.extend(listed);
    }

    if !cfg.patterns.is_empty() {
        let root = cfg.root.clone().unwrap_or_else(|| PathBuf::from("."));
        let globbed = glob_sources(fs, &root, &cfg.patterns, &cfg.exclude)?;
        let preferred = apply_extension_preference(globbed, &cfg.prefer);
        debug!(count = preferred.len(), root = ?root, "globbed sources");
        candidates.extend(preferred);
    }

    let mut resolved = BTreeSet::new();
    for path in candidates {
        if !fs.is_file(&path) {
            anyhow::bail!("source {:?} does not exist or is not a file", path);
        }
        let canonical = fs
            .canonicalize(&path)
            .with_context(|| format!("resolving source {:?}", path))?;
        resolved.insert(canonical);
    }

    info!(count = resolved.len(), "resolved observation files");
    Ok(resolved.into_iter().collect())
}

/// Read a source list: one path per line, blank lines and `#` comments skipped.
///
/// Relative entries are taken relative to the list file's directory.
pub fn read_source_list(fs: &dyn FileSystem, path: &Path) -> Result<Vec<PathBuf>> {
    let contents = fs
        .read_to_string(path)
        .with_context(|| format!("reading source list {:?}", path))?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));

    Ok(contents
        .lines()
        .map(|line| line.split('#').next().unwrap_or("").trim())
        .filter(|line| !line.is_empty())
        .map(|line| {
            let p = PathBuf::from(line);
            if p.is_relative() { base.join(p) } else { p }
        })
        .collect())
}

fn glob_sources(
    fs: &dyn FileSystem,
    root: &Path,
    patterns: &[String],
    exclude: &[String],
) -> Result<Vec<PathBuf>> {
    let include = build_globset(patterns)?;
    let exclude = build_globset(exclude)?;

    let mut files = Vec::new();
    for path in walk_files(fs, root)? {
        if let Ok(rel) = path.strip_prefix(root) {
            let rel_str = rel.to_string_lossy().replace('\\', "/");
            if include.is_match(&rel_str) && !exclude.is_match(&rel_str) {
                files.push(path);
            }
        }
    }
    Ok(files)
}

/// Within each directory keep only files carrying the best-ranked extension
/// present there. Files whose extension is not ranked are always kept.
fn apply_extension_preference(files: Vec<PathBuf>, prefer: &[String]) -> Vec<PathBuf> {
    if prefer.is_empty() {
        return files;
    }

    let rank_of = |path: &Path| -> Option<usize> {
        let ext = path.extension()?.to_string_lossy().to_lowercase();
        prefer
            .iter()
            .position(|p| p.trim_start_matches('.').eq_ignore_ascii_case(&ext))
    };

    let mut best_per_dir: BTreeMap<PathBuf, usize> = BTreeMap::new();
    for file in &files {
        if let (Some(rank), Some(dir)) = (rank_of(file), file.parent()) {
            let best = best_per_dir.entry(dir.to_path_buf()).or_insert(rank);
            *best = (*best).min(rank);
        }
    }

    files
        .into_iter()
        .filter(|file| match (rank_of(file), file.parent()) {
            (Some(rank), Some(dir)) => best_per_dir.get(dir) == Some(&rank),
            _ => true,
        })
        .collect()
}

/// Build a GlobSet from simple string patterns.
fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        let glob = Glob::new(pat).with_context(|| format!("invalid glob pattern: {pat}"))?;
        builder.add(glob);
    }
    Ok(builder.build()?)
}

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use ffapipe::checkpoint::{CheckpointRecord, CheckpointStore};
use ffapipe::cli::RunArgs;
use ffapipe::fs::RealFileSystem;
use ffapipe::manifest::{unit_id, RunLayout};
use ffapipe::monitor::Reconciler;

pub use ffapipe_test_utils::{
    init_tracing, tree_digest, with_timeout, Behaviour, ConfigFileBuilder, ScriptedRunner,
    StageConfigBuilder,
};

/// Scratch workspace: `raw/` holds observations, `run/` is the run root and
/// `ffapipe.toml` the config.
pub struct Fixture {
    _dir: TempDir,
    pub base: PathBuf,
    pub raw: PathBuf,
    pub run_root: PathBuf,
    pub config: PathBuf,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("creating tempdir");
        // Canonical, so unit ids match what source resolution produces.
        let base = dir.path().canonicalize().expect("canonicalizing tempdir");
        let raw = base.join("raw");
        std::fs::create_dir_all(&raw).expect("creating raw dir");
        Self {
            _dir: dir,
            run_root: base.join("run"),
            config: base.join("ffapipe.toml"),
            raw,
            base,
        }
    }

    /// Create `raw/<name>` with some bytes and return its path.
    pub fn observation(&self, name: &str) -> PathBuf {
        let path = self.raw.join(name);
        std::fs::write(&path, format!("samples of {name}")).expect("writing observation");
        path
    }

    /// Config builder preset with this fixture's run root, `raw/*.raw`
    /// sources and a single search named `s`.
    pub fn builder(&self) -> ConfigFileBuilder {
        ConfigFileBuilder::new(&self.run_root)
            .source_glob(&self.raw, "*.raw")
            .search("s", &[])
    }

    pub fn write_config(&self, builder: &ConfigFileBuilder) {
        builder.write_to(&self.config);
    }

    pub fn args(&self, resume: bool) -> RunArgs {
        RunArgs {
            config: self.config.clone(),
            sources: Vec::new(),
            source_list: None,
            resume,
            workers: None,
            node: None,
            dry_run: false,
        }
    }

    pub fn layout(&self) -> RunLayout {
        RunLayout::new(&self.run_root)
    }

    pub fn store(&self) -> CheckpointStore {
        CheckpointStore::new(Arc::new(RealFileSystem), self.layout())
    }

    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(Arc::new(RealFileSystem), self.layout())
    }

    /// Id of the unit for `raw/<file>` under search `s`.
    pub fn unit(&self, file: &str) -> String {
        unit_id(&self.raw.join(file), "s")
    }

    pub fn checkpoint(&self, file: &str) -> Option<CheckpointRecord> {
        self.store().load(&self.unit(file)).expect("reading checkpoint")
    }

    pub fn stage_dir(&self, file: &str, stage: &str) -> PathBuf {
        self.layout().stage_dir(&self.unit(file), stage)
    }
}

/// Relative path and contents of every artifact below `units/`, logs excluded.
pub fn artifact_set(run_root: &Path) -> Vec<(String, String)> {
    let mut out = Vec::new();
    walk(&run_root.join("units"), run_root, &mut out);
    out.sort();
    out
}

fn walk(dir: &Path, root: &Path, out: &mut Vec<(String, String)>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if path.file_name().is_some_and(|n| n == "logs") {
                continue;
            }
            walk(&path, root, out);
        } else {
            let rel = path.strip_prefix(root).unwrap_or(&path).to_string_lossy().into_owned();
            let contents = std::fs::read_to_string(&path).unwrap_or_default();
            out.push((rel, contents));
        }
    }
}

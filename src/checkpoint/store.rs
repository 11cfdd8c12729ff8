// src/checkpoint/store.rs

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::fs::FileSystem;
use crate::manifest::{tmp_path, RunLayout};

use super::record::CheckpointRecord;

/// Checkpoint records on disk, one file per unit.
///
/// Records are partitioned by unit id and each has a single writer (the
/// sequencer currently holding that unit), so no locking is needed; every
/// commit is a write to `<id>.toml.tmp` followed by a rename, and readers
/// see either the previous or the new record, never a torn one.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    fs: Arc<dyn FileSystem>,
    layout: RunLayout,
}

impl CheckpointStore {
    pub fn new(fs: Arc<dyn FileSystem>, layout: RunLayout) -> Self {
        Self { fs, layout }
    }

    pub fn layout(&self) -> &RunLayout {
        &self.layout
    }

    /// Record of `unit_id`, or `None` if it never committed anything.
    pub fn load(&self, unit_id: &str) -> Result<Option<CheckpointRecord>> {
        let path = self.layout.checkpoint_path(unit_id);
        if !self.fs.exists(&path) {
            return Ok(None);
        }
        let text = self.fs.read_to_string(&path)?;
        let record: CheckpointRecord = toml::from_str(&text)
            .with_context(|| format!("parsing checkpoint {:?}", path))?;
        if record.unit_id != unit_id {
            anyhow::bail!(
                "checkpoint {:?} belongs to unit '{}', not '{}'",
                path,
                record.unit_id,
                unit_id
            );
        }
        Ok(Some(record))
    }

    /// Durably replace the record of `record.unit_id`.
    pub fn commit(&self, record: &CheckpointRecord) -> Result<()> {
        let path = self.layout.checkpoint_path(&record.unit_id);
        let tmp = tmp_path(&path);
        let text = toml::to_string(record)
            .with_context(|| format!("serializing checkpoint of '{}'", record.unit_id))?;

        self.fs.write(&tmp, text.as_bytes())?;
        self.fs.rename(&tmp, &path)?;

        debug!(
            unit = %record.unit_id,
            last_completed = ?record.last_completed,
            failed = record.failure.is_some(),
            "checkpoint committed"
        );
        Ok(())
    }

    /// Every readable record in the store. Leftover `.tmp` files from an
    /// interrupted commit are ignored.
    pub fn list(&self) -> Result<Vec<CheckpointRecord>> {
        let dir = self.layout.checkpoint_dir();
        if !self.fs.is_dir(&dir) {
            return Ok(Vec::new());
        }

        let mut records = Vec::new();
        for path in self.fs.read_dir(&dir)? {
            if path.extension().and_then(|e| e.to_str()) != Some("toml") {
                continue;
            }
            let Some(unit_id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match self.load(unit_id) {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(err) => warn!(path = ?path, error = %err, "skipping unreadable checkpoint"),
            }
        }
        records.sort_by(|a, b| a.unit_id.cmp(&b.unit_id));
        Ok(records)
    }
}

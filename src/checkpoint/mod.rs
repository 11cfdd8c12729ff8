// src/checkpoint/mod.rs

//! Durable per-unit progress.
//!
//! - [`record`] defines the checkpoint record and how stages fold into it.
//! - [`store`] persists records atomically under `<run root>/checkpoints`.

pub mod record;
pub mod store;

pub use record::{ArtifactEntry, CheckpointRecord, FailureRecord, StageCompletion};
pub use store::CheckpointStore;

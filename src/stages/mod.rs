// src/stages/mod.rs

//! Stage definition table.
//!
//! - [`table`] holds the ordered stage chain and builds concrete commands.
//! - [`template`] materializes `{placeholder}` argument templates.
//! - [`artifacts`] finds and verifies the files a stage produced.

pub mod artifacts;
pub mod table;
pub mod template;

pub use artifacts::{collect_artifacts, verify_artifacts, verify_input, ArtifactCheck, ArtifactFile};
pub use table::{StageCommand, StageDef, StageTable};
pub use template::{Placeholder, TemplateError};

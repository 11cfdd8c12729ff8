pub mod builders;
pub mod scripted_runner;

use std::path::Path;
use std::sync::Once;

use tracing_subscriber::{fmt, EnvFilter};

pub use builders::{ConfigFileBuilder, StageConfigBuilder};
pub use scripted_runner::{Behaviour, Invocation, ScriptedRunner};

static INIT: Once = Once::new();

/// Initialise tracing for tests.
///
/// - Uses `with_test_writer()`, so logs are captured per-test.
/// - The Rust test harness only prints captured output for **failing** tests
///   (unless you run with `-- --nocapture`).
///
/// Enable levels with e.g.:
/// `RUST_LOG=debug cargo test`
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .init();
    });
}

/// Run a future with a 10-second timeout.
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(std::time::Duration::from_secs(10), f)
        .await
        .expect("Test timed out after 10 seconds")
}

/// blake3 digest over every file below `root`: relative paths, sizes and
/// contents, in sorted order. Two equal digests mean an unchanged tree.
pub fn tree_digest(root: &Path) -> String {
    let mut files = Vec::new();
    collect(root, &mut files);
    files.sort();

    let mut hasher = blake3::Hasher::new();
    for path in files {
        let rel = path.strip_prefix(root).unwrap_or(&path);
        let contents = std::fs::read(&path).expect("reading file for digest");
        hasher.update(rel.to_string_lossy().as_bytes());
        hasher.update(&(contents.len() as u64).to_le_bytes());
        hasher.update(&contents);
    }
    hasher.finalize().to_hex().to_string()
}

fn collect(dir: &Path, out: &mut Vec<std::path::PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect(&path, out);
        } else {
            out.push(path);
        }
    }
}

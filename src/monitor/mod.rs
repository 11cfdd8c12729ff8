// src/monitor/mod.rs

//! Live, read-only monitoring of a run root.
//!
//! - [`reconciler`] turns checkpoints, logs and the output tree into a
//!   [`RunState`].
//! - [`view`] renders a `RunState` as text.
//!
//! The monitor polls; the pipeline process never pushes anything to it and
//! does not even need to be alive.

pub mod reconciler;
pub mod view;

use std::io::Write;
use std::time::Duration;

use tracing::{info, warn};

use crate::errors::Result;

pub use reconciler::{Discrepancy, Reconciler, RunState, StatusCounts, UnitState};
pub use view::render;

const CLEAR_SCREEN: &str = "\x1b[2J\x1b[H";

/// Print snapshots of the run every `interval` until Ctrl-C.
///
/// With `once`, a single snapshot is printed without clearing the terminal.
pub async fn watch(reconciler: &Reconciler, interval: Duration, once: bool) -> Result<()> {
    if once {
        let state = reconciler.snapshot()?;
        print!("{}", render(&state));
        return Ok(());
    }

    // A run root without a manifest is an error up front; later snapshot
    // failures are treated as transient.
    reconciler.snapshot()?;

    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(100)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    info!(interval_secs = interval.as_secs_f64(), "monitoring run");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match reconciler.snapshot() {
                    Ok(state) => {
                        print!("{CLEAR_SCREEN}{}", render(&state));
                        let _ = std::io::stdout().flush();
                    }
                    Err(err) => warn!(error = %err, "snapshot failed"),
                }
            }
            res = &mut ctrl_c => {
                if let Err(e) = res {
                    warn!(error = %e, "failed to listen for Ctrl+C");
                }
                info!("monitor stopped");
                return Ok(());
            }
        }
    }
}

// src/lib.rs

pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod logging;
pub mod manifest;
pub mod monitor;
pub mod stages;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::cli::{MonitorArgs, RunArgs};
use crate::config::{load_and_validate, ConfigFile};
use crate::engine::{RunSummary, StageSequencer, WorkDistributor};
use crate::errors::{PipelineError, Result};
use crate::exec::{ProcessRunner, RealProcessRunner};
use crate::fs::{FileSystem, RealFileSystem};
use crate::manifest::{resolve_sources, RunLayout, RunManifest};
use crate::monitor::Reconciler;

/// High-level entry point for `ffapipe run`.
///
/// This wires together:
/// - config loading and `--workers` override
/// - source resolution and the run manifest (fresh or resumed)
/// - the node filter
/// - sequencer + worker pool over the real process runner
pub async fn run(args: &RunArgs) -> Result<RunSummary> {
    run_with_runner(args, Arc::new(RealProcessRunner::new())).await
}

/// Same as [`run`], with the process runner supplied by the caller.
pub async fn run_with_runner(args: &RunArgs, runner: Arc<dyn ProcessRunner>) -> Result<RunSummary> {
    let mut cfg = load_and_validate(&args.config)?;
    if let Some(workers) = args.workers {
        if workers == 0 {
            return Err(PipelineError::ConfigError("--workers must be >= 1".to_string()));
        }
        cfg.set_workers(workers);
    }

    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);
    let layout = RunLayout::new(cfg.pipeline().output_root.clone());

    if args.dry_run {
        let manifest = build_manifest(fs.as_ref(), &cfg, args)?;
        print_dry_run(&cfg, &manifest, &layout);
        return Ok(RunSummary::default());
    }

    let manifest = open_manifest(fs.as_ref(), &cfg, &layout, args)?;
    let units = manifest.units_for_node(args.node.as_deref())?;
    info!(
        units = units.len(),
        total = manifest.units.len(),
        node = args.node.as_deref().unwrap_or("-"),
        "units selected for this machine"
    );

    let sequencer = StageSequencer::new(
        manifest.stage_table(),
        layout,
        fs,
        runner,
        manifest.retry_budget,
    );
    let distributor = WorkDistributor::new(Arc::new(sequencer), cfg.pipeline().workers);
    let summary = distributor.run(units).await?;

    info!(
        done = summary.done.len(),
        failed = summary.failed.len(),
        "run finished"
    );
    Ok(summary)
}

/// Entry point for `ffapipe monitor`.
pub async fn run_monitor(args: &MonitorArgs) -> Result<()> {
    let reconciler = Reconciler::new(Arc::new(RealFileSystem), RunLayout::new(args.run_root.clone()));
    monitor::watch(&reconciler, Duration::from_secs(args.interval), args.once).await
}

fn build_manifest(fs: &dyn FileSystem, cfg: &ConfigFile, args: &RunArgs) -> Result<RunManifest> {
    let sources = resolve_sources(fs, cfg.sources(), &args.sources, args.source_list.as_deref())?;
    RunManifest::build(cfg, &sources)
}

/// Fresh runs create the manifest; resumed runs reuse the persisted one.
fn open_manifest(
    fs: &dyn FileSystem,
    cfg: &ConfigFile,
    layout: &RunLayout,
    args: &RunArgs,
) -> Result<RunManifest> {
    let existing = RunManifest::load(fs, layout)?;

    match (args.resume, existing) {
        // Another node of the same run got here first.
        (false, Some(persisted)) if args.node.is_some() => {
            let rebuilt = build_manifest(fs, cfg, args)?;
            if !rebuilt.same_partition(&persisted) {
                return Err(PipelineError::ManifestError(format!(
                    "{:?} holds a run with different units, nodes or stages; \
                     check that every node uses the same config and sources",
                    layout.root()
                )));
            }
            info!(
                node = args.node.as_deref().unwrap_or("-"),
                units = persisted.units.len(),
                "joining run started by another node"
            );
            Ok(persisted)
        }
        (false, Some(_)) => Err(PipelineError::ManifestError(format!(
            "{:?} already holds a run; pass --resume to continue it or choose another output_root",
            layout.root()
        ))),
        (true, Some(persisted)) => {
            // The persisted manifest is authoritative; a rebuild is only
            // used to tell the operator that inputs have drifted.
            match build_manifest(fs, cfg, args) {
                Ok(rebuilt) if !rebuilt.same_units(&persisted) => warn!(
                    "sources or searches changed since the run started; resuming the original unit set"
                ),
                Ok(_) => {}
                Err(err) => debug!(error = %err, "could not rebuild manifest for comparison"),
            }
            info!(units = persisted.units.len(), "resuming run");
            Ok(persisted)
        }
        (resume, None) => {
            if resume {
                warn!(root = ?layout.root(), "nothing to resume, starting a fresh run");
            }
            let manifest = build_manifest(fs, cfg, args)?;
            manifest.persist(fs, layout)?;
            Ok(manifest)
        }
    }
}

/// Simple dry-run output: print settings, stages and units with their first command.
fn print_dry_run(cfg: &ConfigFile, manifest: &RunManifest, layout: &RunLayout) {
    println!("ffapipe dry-run");
    println!("  output_root = {}", cfg.pipeline().output_root.display());
    println!("  workers = {}", cfg.pipeline().workers);
    println!("  retry_budget = {}", cfg.pipeline().retry_budget);
    if !manifest.nodes.is_empty() {
        println!("  nodes = {:?}", manifest.nodes);
    }
    println!();

    let table = manifest.stage_table();
    println!("stages ({}):", table.len());
    for (index, stage) in table.iter().enumerate() {
        println!("  {index}. {}", stage.name);
        println!("      program: {}", stage.program);
        println!("      outputs: {:?}", stage.outputs);
        println!(
            "      retryable: {}, idempotence: {:?}",
            stage.retryable, stage.idempotence
        );
        if stage.checksum {
            println!("      checksum: true");
        }
    }
    println!();

    println!("units ({}):", manifest.units.len());
    for unit in &manifest.units {
        match &unit.node {
            Some(node) => println!("  - {} (node {node})", unit.id),
            None => println!("  - {}", unit.id),
        }
        match table.command_for(0, unit, layout) {
            Ok(cmd) => println!("      {cmd}"),
            Err(err) => println!("      <cannot materialize: {err}>"),
        }
    }

    debug!("dry-run complete (no execution)");
}

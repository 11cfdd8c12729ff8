// tests/monitor_reconciler.rs

mod common;
use crate::common::{init_tracing, tree_digest, with_timeout, Behaviour, Fixture, ScriptedRunner};

use ffapipe::monitor::{render, Discrepancy};
use ffapipe::run_with_runner;
use ffapipe::types::UnitStatus;

#[tokio::test]
async fn snapshots_during_an_active_run_do_not_touch_the_run_root() {
    init_tracing();
    let fx = Fixture::new();
    fx.observation("obs1.raw");
    fx.observation("obs2.raw");
    fx.write_config(&fx.builder().workers(2).simple_stages(&["a", "b"]));

    let runner = ScriptedRunner::new()
        .on_unit("obs1", "b", Behaviour::Block)
        .on_unit("obs2", "a", Behaviour::Block)
        .into_arc();
    let args = fx.args(false);
    let handle = {
        let runner = runner.clone();
        tokio::spawn(async move { run_with_runner(&args, runner).await })
    };
    with_timeout(runner.wait_for_parked(2)).await;

    let before = tree_digest(&fx.run_root);
    let reconciler = fx.reconciler();
    let mut last = None;
    for _ in 0..25 {
        last = Some(reconciler.snapshot().unwrap());
    }
    let after = tree_digest(&fx.run_root);
    handle.abort();

    assert_eq!(before, after);

    let state = last.unwrap();
    assert_eq!(state.counts.running, 2);
    let obs1 = state.units.iter().find(|u| u.id == fx.unit("obs1.raw")).unwrap();
    assert_eq!(obs1.status, UnitStatus::Running);
    assert_eq!(obs1.next_stage, 1);
    assert_eq!(obs1.artifact_counts, vec![1, 0]);
    assert!(obs1.log_tail.iter().any(|l| l.starts_with("#> start")));
}

#[tokio::test]
async fn artifacts_without_checkpoint_are_reported_unverified() {
    init_tracing();
    let fx = Fixture::new();
    fx.observation("obs1.raw");
    fx.write_config(&fx.builder().simple_stages(&["a", "b", "c"]));

    let runner = ScriptedRunner::new().on("b", Behaviour::Fail(1)).into_arc();
    with_timeout(run_with_runner(&fx.args(false), runner)).await.unwrap();

    // Someone dropped c's output in place by hand.
    let c_dir = fx.stage_dir("obs1.raw", "c");
    std::fs::create_dir_all(&c_dir).unwrap();
    std::fs::write(c_dir.join("c.out"), "hand made").unwrap();

    let state = fx.reconciler().snapshot().unwrap();
    let unit = &state.units[0];
    assert_eq!(unit.status, UnitStatus::Failed);
    assert_eq!(
        unit.discrepancies,
        vec![Discrepancy::Unverified {
            stage: "c".to_string()
        }]
    );
    // Reported, never repaired.
    assert_eq!(fx.checkpoint("obs1.raw").unwrap().last_completed, Some(0));

    let text = render(&state);
    assert!(text.contains("unverified: 'c'"), "{text}");
    assert!(text.contains("failed at 'b'"), "{text}");
}

#[tokio::test]
async fn checksum_changes_are_detected() {
    init_tracing();
    let fx = Fixture::new();
    fx.observation("obs1.raw");
    fx.write_config(
        &fx.builder().stage(
            common::StageConfigBuilder::new("a")
                .output("a.out")
                .checksum(true)
                .build(),
        ),
    );
    with_timeout(run_with_runner(&fx.args(false), ScriptedRunner::new().into_arc()))
        .await
        .unwrap();

    // Same length, different bytes.
    let artifact = fx.stage_dir("obs1.raw", "a").join("a.out");
    let original = std::fs::read_to_string(&artifact).unwrap();
    std::fs::write(&artifact, original.to_uppercase()).unwrap();

    let state = fx.reconciler().snapshot().unwrap();
    assert_eq!(state.units[0].status, UnitStatus::Done);
    assert_eq!(
        state.units[0].discrepancies,
        vec![Discrepancy::ChecksumMismatch {
            stage: "a".to_string(),
            path: "a.out".to_string()
        }]
    );
}

#[tokio::test]
async fn monitor_once_requires_a_run_root() {
    init_tracing();
    let fx = Fixture::new();
    let args = ffapipe::cli::MonitorArgs {
        run_root: fx.run_root.clone(),
        interval: 1,
        once: true,
    };
    assert!(ffapipe::run_monitor(&args).await.is_err());
}

#[tokio::test]
async fn unit_failing_after_a_crash_is_not_reported_running() {
    init_tracing();
    let fx = Fixture::new();
    fx.observation("obs1.raw");
    fx.write_config(&fx.builder().simple_stages(&["a", "b", "c"]));

    // Killed while b runs: b's log ends in a start marker.
    let first = ScriptedRunner::new()
        .on_unit("obs1", "b", Behaviour::Block)
        .into_arc();
    let args = fx.args(false);
    let handle = {
        let runner = first.clone();
        tokio::spawn(async move { run_with_runner(&args, runner).await })
    };
    with_timeout(first.wait_for_parked(1)).await;
    handle.abort();
    let _ = handle.await;

    std::fs::remove_dir_all(fx.stage_dir("obs1.raw", "a")).unwrap();
    let summary = with_timeout(run_with_runner(&fx.args(true), ScriptedRunner::new().into_arc()))
        .await
        .unwrap();
    assert_eq!(summary.failed[0].kind, ffapipe::types::FailureKind::ArtifactMissing);

    let state = fx.reconciler().snapshot().unwrap();
    let unit = &state.units[0];
    assert_eq!(unit.status, UnitStatus::Failed);
    assert_eq!(state.counts.running, 0);
    assert_eq!(state.counts.failed, 1);
    assert!(unit.log_tail.iter().any(|l| l.starts_with("#> start")));

    let text = render(&state);
    assert!(text.contains("failed at 'b' [artifact-missing]"), "{text}");
}

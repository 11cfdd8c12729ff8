// tests/failure_handling.rs

mod common;
use crate::common::{init_tracing, with_timeout, Behaviour, Fixture, ScriptedRunner, StageConfigBuilder};

use ffapipe::errors::PipelineError;
use ffapipe::run_with_runner;
use ffapipe::types::{FailureKind, UnitStatus};

fn fixture_with(stages: &[&str], workers: usize) -> Fixture {
    let fx = Fixture::new();
    for name in ["obs1.raw", "obs2.raw", "obs3.raw"] {
        fx.observation(name);
    }
    fx.write_config(&fx.builder().workers(workers).simple_stages(stages));
    fx
}

#[tokio::test]
async fn failing_stage_is_attempted_one_plus_budget_times() {
    init_tracing();
    let fx = fixture_with(&["a", "b", "c"], 2);

    let runner = ScriptedRunner::new()
        .on_unit("obs1", "b", Behaviour::Fail(1))
        .into_arc();
    let summary = with_timeout(run_with_runner(&fx.args(false), runner.clone()))
        .await
        .unwrap();

    let attempts: Vec<u32> = runner
        .invocations()
        .into_iter()
        .filter(|i| i.unit_id == fx.unit("obs1.raw") && i.stage == "b")
        .map(|i| i.attempt)
        .collect();
    assert_eq!(attempts, vec![1, 2, 3]);
    assert_eq!(runner.stages_for("obs1"), vec!["a", "b", "b", "b"]);

    assert_eq!(summary.failed_ids(), vec![fx.unit("obs1.raw").as_str()]);
    assert_eq!(summary.failed[0].kind, FailureKind::ToolFailure);
    assert_eq!(summary.failed[0].attempts, 3);
    assert_eq!(summary.done.len(), 2);

    let record = fx.checkpoint("obs1.raw").unwrap();
    assert_eq!(record.last_completed, Some(0));
    let failure = record.failure.unwrap();
    assert_eq!(failure.stage, "b");
    assert!(failure.log_path.unwrap().ends_with("logs/01-b.log"));

    let state = fx.reconciler().snapshot().unwrap();
    assert_eq!(state.counts.failed, 1);
    assert_eq!(state.counts.done, 2);
}

#[tokio::test]
async fn one_units_failure_leaves_other_units_alone() {
    init_tracing();
    let fx = Fixture::new();
    for name in ["obs1.raw", "obs2.raw", "obs3.raw"] {
        fx.observation(name);
    }
    fx.write_config(
        &fx.builder()
            .workers(2)
            .stage(StageConfigBuilder::new("a").output("a.out").build())
            .stage(StageConfigBuilder::new("b").output("b.out").retryable(false).build())
            .stage(StageConfigBuilder::new("c").output("c.out").build()),
    );

    let runner = ScriptedRunner::new()
        .on_unit("obs2", "b", Behaviour::Fail(2))
        .on_unit("obs3", "c", Behaviour::LaunchFail)
        .into_arc();
    let summary = with_timeout(run_with_runner(&fx.args(false), runner.clone()))
        .await
        .unwrap();

    assert_eq!(runner.stages_for("obs1"), vec!["a", "b", "c"]);
    assert_eq!(runner.stages_for("obs2"), vec!["a", "b"]);
    assert_eq!(summary.done, vec![fx.unit("obs1.raw")]);

    let kinds: Vec<_> = summary.failed.iter().map(|f| (f.unit_id.clone(), f.kind)).collect();
    assert!(kinds.contains(&(fx.unit("obs2.raw"), FailureKind::ToolFailure)));
    assert!(kinds.contains(&(fx.unit("obs3.raw"), FailureKind::RunnerFailure)));
    assert!(!summary.all_done());
}

#[tokio::test]
async fn exit_zero_without_outputs_counts_as_tool_failure() {
    init_tracing();
    let fx = fixture_with(&["a"], 1);
    let runner = ScriptedRunner::new()
        .on_unit("obs1", "a", Behaviour::SucceedEmpty)
        .into_arc();

    let summary = with_timeout(run_with_runner(&fx.args(false), runner.clone()))
        .await
        .unwrap();
    let failure = summary.failed.iter().find(|f| f.unit_id == fx.unit("obs1.raw")).unwrap();
    assert_eq!(failure.kind, FailureKind::ToolFailure);
    assert!(failure.message.contains("exited 0"), "{}", failure.message);
    assert_eq!(runner.stages_for("obs1").len(), 3);
}

#[tokio::test]
async fn launch_failure_on_the_first_unit_aborts_the_run() {
    init_tracing();
    let fx = fixture_with(&["a", "b"], 1);
    let runner = ScriptedRunner::new().on("a", Behaviour::LaunchFail).into_arc();

    let err = with_timeout(run_with_runner(&fx.args(false), runner.clone()))
        .await
        .unwrap_err();

    let PipelineError::Environment { summary, .. } = err else {
        panic!("expected an environment abort");
    };
    assert_eq!(runner.invocations().len(), 1);
    assert!(fx.checkpoint("obs2.raw").is_none());

    // What ran before the abort is still reported.
    assert_eq!(summary.failed_ids(), vec![fx.unit("obs1.raw").as_str()]);
    assert_eq!(summary.failed[0].kind, FailureKind::RunnerFailure);
    assert!(summary.failed[0].log_path.as_ref().unwrap().ends_with("logs/00-a.log"));
    assert_eq!(summary.not_started.len(), 2);
    let text = summary.to_string();
    assert!(text.contains("log:"), "{text}");
}

#[tokio::test]
async fn launch_failure_past_the_first_stage_does_not_abort() {
    init_tracing();
    let fx = fixture_with(&["a", "b"], 1);
    let first = ScriptedRunner::new()
        .on_unit("obs1", "b", Behaviour::Fail(1))
        .on_unit("obs2", "b", Behaviour::Fail(1))
        .into_arc();
    with_timeout(run_with_runner(&fx.args(false), first)).await.unwrap();

    // On resume the first unit starts at b, which can no longer launch.
    let second = ScriptedRunner::new().on("b", Behaviour::LaunchFail).into_arc();
    let summary = with_timeout(run_with_runner(&fx.args(true), second.clone()))
        .await
        .unwrap();

    assert_eq!(second.stages_for("obs1"), vec!["b"]);
    assert_eq!(second.stages_for("obs2"), vec!["b"]);
    assert!(summary.failed.iter().all(|f| f.kind == FailureKind::RunnerFailure));
    assert_eq!(summary.failed.len(), 2);
    assert_eq!(summary.done, vec![fx.unit("obs3.raw")]);
}

#[tokio::test]
async fn deleted_upstream_output_fails_with_artifact_missing() {
    init_tracing();
    let fx = fixture_with(&["a", "b", "c"], 1);
    let first = ScriptedRunner::new().on("b", Behaviour::Fail(1)).into_arc();
    with_timeout(run_with_runner(&fx.args(false), first)).await.unwrap();

    std::fs::remove_dir_all(fx.stage_dir("obs2.raw", "a")).unwrap();

    let second = ScriptedRunner::new().into_arc();
    let summary = with_timeout(run_with_runner(&fx.args(true), second.clone()))
        .await
        .unwrap();

    // obs2 is not silently re-run from a; the others carry on.
    assert!(second.stages_for("obs2").is_empty());
    let failure = summary.failed.iter().find(|f| f.unit_id == fx.unit("obs2.raw")).unwrap();
    assert_eq!(failure.kind, FailureKind::ArtifactMissing);
    assert_eq!(second.stages_for("obs1"), vec!["b", "c"]);
    assert_eq!(summary.done.len(), 2);

    let state = fx.reconciler().snapshot().unwrap();
    let obs2 = state.units.iter().find(|u| u.id == fx.unit("obs2.raw")).unwrap();
    assert_eq!(obs2.status, UnitStatus::Failed);
    assert!(!obs2.discrepancies.is_empty());
}

#[tokio::test]
async fn node_filter_runs_only_the_assigned_partition() {
    init_tracing();
    let fx = Fixture::new();
    for name in ["obs1.raw", "obs2.raw", "obs3.raw"] {
        fx.observation(name);
    }
    fx.write_config(&fx.builder().nodes(&["n1", "n2"]).simple_stages(&["a"]));

    let runner = ScriptedRunner::new().into_arc();
    let mut args = fx.args(false);
    args.node = Some("n2".to_string());
    let summary = with_timeout(run_with_runner(&args, runner.clone())).await.unwrap();

    // Round-robin: obs1 -> n1, obs2 -> n2, obs3 -> n1.
    assert_eq!(summary.done, vec![fx.unit("obs2.raw")]);
    assert!(runner.stages_for("obs1").is_empty());

    let mut args = fx.args(true);
    args.node = Some("n9".to_string());
    assert!(run_with_runner(&args, runner).await.is_err());
}

#[tokio::test]
async fn nodes_sharing_a_run_root_each_start_fresh() {
    init_tracing();
    let fx = Fixture::new();
    for name in ["obs1.raw", "obs2.raw", "obs3.raw"] {
        fx.observation(name);
    }
    fx.write_config(&fx.builder().nodes(&["n1", "n2"]).simple_stages(&["a", "b"]));

    let mut n1 = fx.args(false);
    n1.node = Some("n1".to_string());
    let first = with_timeout(run_with_runner(&n1, ScriptedRunner::new().into_arc()))
        .await
        .unwrap();

    let mut n2 = fx.args(false);
    n2.node = Some("n2".to_string());
    let runner = ScriptedRunner::new().into_arc();
    let second = with_timeout(run_with_runner(&n2, runner.clone())).await.unwrap();

    assert_eq!(first.done, vec![fx.unit("obs1.raw"), fx.unit("obs3.raw")]);
    assert_eq!(second.done, vec![fx.unit("obs2.raw")]);
    assert!(runner.stages_for("obs1").is_empty());

    let state = fx.reconciler().snapshot().unwrap();
    assert_eq!(state.counts.done, 3);

    // A node with a different partition must not join.
    fx.write_config(&fx.builder().nodes(&["n1", "n2", "n3"]).simple_stages(&["a", "b"]));
    let mut n3 = fx.args(false);
    n3.node = Some("n3".to_string());
    let err = run_with_runner(&n3, ScriptedRunner::new().into_arc())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("different units, nodes or stages"), "{err}");
}

// tests/no_double_processing.rs

mod common;
use crate::common::{Behaviour, Fixture, ScriptedRunner};

use std::time::Duration;

use proptest::prelude::*;

use ffapipe::run_with_runner;

// A failure plan: (observation index, stage index) pairs whose tool exits 1.
fn scenario() -> impl Strategy<Value = (usize, usize, usize, usize, Vec<(usize, usize)>)> {
    (1..=5usize, 1..=3usize, 1..=4usize, 1..=4usize).prop_flat_map(|(obs, searches, stages, workers)| {
        let failures = proptest::collection::vec((0..obs, 0..stages), 0..3);
        (
            Just(obs),
            Just(searches),
            Just(stages),
            Just(workers),
            failures,
        )
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn units_never_overlap_and_stages_run_in_order(
        (obs, searches, stages, workers, failures) in scenario()
    ) {
        let fx = Fixture::new();
        let stage_names: Vec<String> = (0..stages).map(|i| format!("st{i}")).collect();
        let stage_refs: Vec<&str> = stage_names.iter().map(String::as_str).collect();

        let mut builder = ffapipe_test_utils::ConfigFileBuilder::new(&fx.run_root)
            .source_glob(&fx.raw, "*.raw")
            .workers(workers)
            .retry_budget(0)
            .simple_stages(&stage_refs);
        for s in 0..searches {
            builder = builder.search(&format!("s{s}"), &[]);
        }
        fx.write_config(&builder);
        for o in 0..obs {
            fx.observation(&format!("obs{o}.raw"));
        }

        let mut runner = ScriptedRunner::new().with_delay(Duration::from_millis(2));
        for &(o, st) in &failures {
            runner = runner.on_unit(&format!("obs{o}"), &stage_names[st], Behaviour::Fail(1));
        }
        let runner = runner.into_arc();

        let rt = tokio::runtime::Runtime::new().unwrap();
        let summary = rt
            .block_on(run_with_runner(&fx.args(false), runner.clone()))
            .unwrap();

        prop_assert!(runner.max_concurrent_per_unit() <= 1);
        prop_assert!(runner.max_concurrent() <= workers);
        prop_assert_eq!(summary.total(), obs * searches);
        prop_assert_eq!(summary.not_started.len(), 0);

        for o in 0..obs {
            let first_failure = failures
                .iter()
                .filter(|(fo, _)| *fo == o)
                .map(|(_, st)| *st)
                .min();
            let expected: Vec<&str> = match first_failure {
                Some(st) => stage_refs[..=st].to_vec(),
                None => stage_refs.clone(),
            };
            for s in 0..searches {
                let id = ffapipe::manifest::unit_id(&fx.raw.join(format!("obs{o}.raw")), &format!("s{s}"));
                let seen: Vec<String> = runner
                    .invocations()
                    .into_iter()
                    .filter(|i| i.unit_id == id)
                    .map(|i| i.stage)
                    .collect();
                prop_assert_eq!(&seen, &expected);
            }
        }
    }
}

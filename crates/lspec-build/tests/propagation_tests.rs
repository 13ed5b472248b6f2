//! Failure propagation over arbitrary stage graphs

mod common;

use common::*;
#[allow(unused_imports)]
use common::{assert_eq, assert_ne};
use lspec_build::{BuildError, Pipeline, PipelineOptions, StageGraph, StageNode, StageState};
use proptest::prelude::*;
use std::collections::HashMap;

const MAX_STAGES: usize = 8;

fn stage_name(i: usize) -> String {
    format!("s{}", i)
}

/// Stage `i` depends on every `j < i` with `edges[i][j]`
fn graph(n: usize, edges: &[Vec<bool>], failing: &[bool]) -> StageGraph {
    let mut graph = StageGraph::new();
    for i in 0..n {
        let name = stage_name(i);
        let fails = failing[i];
        let stage_label = name.clone();
        let node = StageNode::from_fn(name, move |_ctx| {
            if fails {
                Err(BuildError::stage(stage_label.as_str(), "injected"))
            } else {
                Ok(())
            }
        })
        .after((0..i).filter(|&j| edges[i][j]).map(stage_name));
        graph.add_stage(node).unwrap();
    }
    graph
}

fn expected_states(n: usize, edges: &[Vec<bool>], failing: &[bool]) -> Vec<&'static str> {
    let mut states: Vec<&'static str> = Vec::with_capacity(n);
    for i in 0..n {
        let blocked = (0..i).any(|j| edges[i][j] && states[j] != "succeeded");
        states.push(if blocked {
            "not-executed"
        } else if failing[i] {
            "failed"
        } else {
            "succeeded"
        });
    }
    states
}

fn kind(state: &StageState) -> &'static str {
    match state {
        StageState::Succeeded => "succeeded",
        StageState::Failed(_) => "failed",
        StageState::NotExecuted { .. } => "not-executed",
        StageState::Skipped(_) => "skipped",
        StageState::Pending => "pending",
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_failures_block_exactly_their_dependents(
        n in 1..=MAX_STAGES,
        edges in prop::collection::vec(prop::collection::vec(any::<bool>(), MAX_STAGES), MAX_STAGES),
        failing in prop::collection::vec(prop::bool::weighted(0.25), MAX_STAGES),
    ) {
        let dir = project_dir(FOO_TOML);
        let recorder = Recorder::new();
        let session = session(&recorder);
        let mut ctx = session.project(load(dir.path()), Vec::new());

        let pipeline = Pipeline::new(graph(n, &edges, &failing), PipelineOptions::default());
        let report = pipeline.run(&mut ctx);

        let expected = expected_states(n, &edges, &failing);
        for (i, want) in expected.iter().enumerate() {
            let state = report.state_of(&stage_name(i)).unwrap();
            prop_assert_eq!(kind(state), *want, "stage {}", i);
        }

        // Every stage is reported after its predecessors
        let position: HashMap<&str, usize> = report
            .outcomes
            .iter()
            .enumerate()
            .map(|(p, o)| (o.name.as_str(), p))
            .collect();
        for i in 0..n {
            for j in (0..i).filter(|&j| edges[i][j]) {
                prop_assert!(position[stage_name(j).as_str()] < position[stage_name(i).as_str()]);
            }
        }

        // The primary failure is the first failed stage in execution order
        let first_failed = report
            .outcomes
            .iter()
            .find(|o| matches!(o.state, StageState::Failed(_)))
            .map(|o| o.name.clone());
        match (report.primary_failure(), first_failed) {
            (Some(BuildError::StageExecution { stage, .. }), Some(name)) => prop_assert_eq!(stage, &name),
            (None, None) => {}
            (failure, name) => prop_assert!(false, "mismatch: {:?} vs {:?}", failure, name),
        }

        // A blocked stage names a stage that actually failed
        for outcome in &report.outcomes {
            if let StageState::NotExecuted { blocked_by } = &outcome.state {
                prop_assert!(matches!(report.state_of(blocked_by), Some(StageState::Failed(_))));
            }
        }

        ctx.close();
        session.finish();
    }
}

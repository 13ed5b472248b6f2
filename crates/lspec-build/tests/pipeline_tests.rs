//! Pipeline integration tests
//!
//! Full builds of a temporary project against the recording engine.

mod common;

use common::*;
#[allow(unused_imports)]
use common::{assert_eq, assert_ne};
use lspec_build::{
    AbortSignal, BuildError, BuildResult, EngineMessage, FingerprintPolicy, Pipeline,
    PipelineOptions, PipelineReport, SkipReason, StageContext, StageGraph, StageKind, StageNode,
    StageState, StageWork,
};
use lspec_config::{ConfigOverride, Layout};
use std::fs;
use std::path::Path;
use std::sync::Arc;

fn pipeline(options: PipelineOptions) -> Pipeline {
    Pipeline::standard(&Layout::default(), options).unwrap()
}

/// One build invocation with a fresh session
fn build(root: &Path, recorder: &Arc<Recorder>, options: PipelineOptions) -> PipelineReport {
    let session = session(recorder);
    let mut ctx = session.project(load(root), Vec::new());
    let report = pipeline(options).run(&mut ctx);
    ctx.close();
    session.finish();
    report
}

fn all_stages() -> Vec<&'static str> {
    StageKind::all().iter().map(StageKind::name).collect()
}

#[test]
fn test_full_build_runs_every_stage_in_order() {
    let dir = project_dir(FOO_TOML);
    let recorder = Recorder::new();
    let session = session(&recorder);
    let mut ctx = session.project(load(dir.path()), Vec::new());

    let report = pipeline(PipelineOptions::default()).run(&mut ctx);

    assert!(report.succeeded(), "{:?}", report.failure);
    assert_eq!(report.executed(), all_stages());
    assert_eq!(report.project, "acme:foo:1.0.0");
    assert_eq!(
        fs::read_to_string(dir.path().join("target/test-result")).unwrap(),
        "passed"
    );

    let archive = ctx.archive().unwrap();
    assert_eq!(archive.producing_stage, "archive");
    assert!(archive.path.ends_with("target/archive/foo-1.0.0.lspec-lang"));

    // One engine for the whole project, set up once
    assert_eq!(recorder.created(), 1);
    assert_eq!(recorder.count("initialize"), 1);
    assert_eq!(recorder.count("load-dialects"), 1);

    ctx.close();
    assert_eq!(recorder.disposed(), 1);
    session.finish();
}

#[test]
fn test_second_build_skips_everything() {
    let dir = project_dir(FOO_TOML);
    let recorder = Recorder::new();
    assert!(build(dir.path(), &recorder, PipelineOptions::default()).succeeded());

    recorder.clear();
    let report = build(dir.path(), &recorder, PipelineOptions::default());

    assert!(report.succeeded());
    for stage in all_stages() {
        assert_eq!(
            report.state_of(stage),
            Some(&StageState::Skipped(SkipReason::UpToDate)),
            "{} should be up to date",
            stage
        );
    }
    // Nothing ran, so the engine was never started
    assert!(recorder.calls().is_empty());
    assert_eq!(recorder.created(), 1);
}

#[test]
fn test_source_change_reruns_only_affected_stages() {
    let dir = project_dir(FOO_TOML);
    let recorder = Recorder::new();
    assert!(build(dir.path(), &recorder, PipelineOptions::default()).succeeded());

    fs::write(dir.path().join("src/syntax.sdf3"), "module syntax imports common").unwrap();
    let report = build(dir.path(), &recorder, PipelineOptions::default());

    assert!(report.succeeded());
    assert_eq!(report.executed(), vec!["generate-sources", "build"]);
    assert_eq!(
        report.state_of("compile"),
        Some(&StageState::Skipped(SkipReason::UpToDate))
    );
}

#[test]
fn test_deleted_output_forces_rerun() {
    let dir = project_dir(FOO_TOML);
    let recorder = Recorder::new();
    assert!(build(dir.path(), &recorder, PipelineOptions::default()).succeeded());

    fs::remove_dir_all(dir.path().join("target/classes")).unwrap();
    let report = build(dir.path(), &recorder, PipelineOptions::default());

    assert_eq!(report.state_of("compile"), Some(&StageState::Succeeded));
    assert_eq!(
        report.state_of("build"),
        Some(&StageState::Skipped(SkipReason::UpToDate))
    );
}

#[test]
fn test_force_ignores_fingerprints() {
    let dir = project_dir(FOO_TOML);
    let recorder = Recorder::new();
    assert!(build(dir.path(), &recorder, PipelineOptions::default()).succeeded());

    let report = build(dir.path(), &recorder, PipelineOptions::default().with_force(true));
    assert_eq!(report.executed(), all_stages());
}

#[test]
fn test_override_change_reruns_everything() {
    let dir = project_dir(FOO_TOML);
    let recorder = Recorder::new();
    assert!(build(dir.path(), &recorder, PipelineOptions::default()).succeeded());

    let session = session(&recorder);
    let overrides = vec![ConfigOverride::new().with_version("2.0.0")];
    let mut ctx = session.project(load(dir.path()), overrides);
    let report = pipeline(PipelineOptions::default()).run(&mut ctx);

    assert_eq!(report.executed(), all_stages());
    assert!(dir.path().join("target/archive/foo-2.0.0.lspec-lang").exists());
}

#[test]
fn test_settings_digest_tracks_overrides() {
    let dir = project_dir(FOO_TOML);
    let recorder = Recorder::new();
    let session = session(&recorder);

    let plain = session.project(load(dir.path()), Vec::new()).settings_digest().unwrap();
    let again = session.project(load(dir.path()), Vec::new()).settings_digest().unwrap();
    let bumped = session
        .project(load(dir.path()), vec![ConfigOverride::new().with_version("2.0.0")])
        .settings_digest()
        .unwrap();

    assert_eq!(plain, again);
    assert_ne!(plain, bumped);
    assert_eq!(plain.len(), 64);
}

#[test]
fn test_switching_policy_reruns_everything() {
    let dir = project_dir(FOO_TOML);
    let recorder = Recorder::new();
    assert!(build(dir.path(), &recorder, PipelineOptions::default()).succeeded());

    let conservative = PipelineOptions::default().with_policy(FingerprintPolicy::Conservative);
    let report = build(dir.path(), &recorder, conservative.clone());
    assert_eq!(report.executed(), all_stages());

    // Stable under the conservative policy as well
    let report = build(dir.path(), &recorder, conservative);
    assert!(report.executed().is_empty());
}

#[test]
fn test_conservative_policy_sees_any_project_file() {
    let dir = project_dir(FOO_TOML);
    let recorder = Recorder::new();
    let conservative = PipelineOptions::default().with_policy(FingerprintPolicy::Conservative);
    assert!(build(dir.path(), &recorder, conservative.clone()).succeeded());

    // Outside every approximate allow-list
    fs::write(dir.path().join("NOTES.md"), "new file").unwrap();

    let report = build(dir.path(), &recorder, conservative);
    assert_eq!(report.executed(), all_stages());
}

#[test]
fn test_failure_blocks_dependents() {
    let dir = project_dir(FOO_TOML);
    let recorder = Recorder::new();
    recorder.behave(|b| b.fail_operation = Some("compile"));
    let session = session(&recorder);
    let mut ctx = session.project(load(dir.path()), Vec::new());

    let report = pipeline(PipelineOptions::default()).run(&mut ctx);

    assert!(!report.succeeded());
    assert_eq!(report.state_of("generate-sources"), Some(&StageState::Succeeded));
    assert_eq!(report.state_of("build"), Some(&StageState::Succeeded));
    assert!(matches!(report.state_of("compile"), Some(StageState::Failed(_))));
    for stage in ["package", "archive", "build-examples", "test"] {
        assert_eq!(
            report.state_of(stage),
            Some(&StageState::NotExecuted {
                blocked_by: "compile".to_string()
            })
        );
    }
    match report.primary_failure() {
        Some(BuildError::StageExecution { stage, .. }) => assert_eq!(stage, "compile"),
        other => panic!("expected compile failure, got {:?}", other),
    }
    assert_eq!(recorder.count("package"), 0);
}

#[test]
fn test_failed_stage_is_not_trusted_next_time() {
    let dir = project_dir(FOO_TOML);
    let recorder = Recorder::new();
    assert!(build(dir.path(), &recorder, PipelineOptions::default()).succeeded());

    recorder.behave(|b| b.fail_operation = Some("package"));
    let report = build(dir.path(), &recorder, PipelineOptions::default().with_force(true));
    assert!(matches!(report.state_of("package"), Some(StageState::Failed(_))));

    recorder.behave(|b| b.fail_operation = None);
    let report = build(dir.path(), &recorder, PipelineOptions::default());
    assert_eq!(report.state_of("package"), Some(&StageState::Succeeded));
}

#[test]
fn test_engine_construction_failure_aborts() {
    let dir = project_dir(FOO_TOML);
    let recorder = Recorder::new();
    recorder.behave(|b| b.fail_construction = true);
    let session = session(&recorder);
    let mut ctx = session.project(load(dir.path()), Vec::new());
    let abort = AbortSignal::new();

    let report = pipeline(PipelineOptions::default()).run_with_abort(&mut ctx, &abort);

    assert!(matches!(
        report.primary_failure(),
        Some(BuildError::EngineConstruction(_))
    ));
    assert!(matches!(
        report.state_of("generate-sources"),
        Some(StageState::Failed(_))
    ));
    assert_eq!(
        report.count(|s| matches!(s, StageState::NotExecuted { .. })),
        6
    );
    assert!(abort.is_triggered());
    assert_eq!(abort.origin().as_deref(), Some("acme:foo:1.0.0:generate-sources"));
}

#[test]
fn test_triggered_abort_stops_before_first_stage() {
    let dir = project_dir(FOO_TOML);
    let recorder = Recorder::new();
    let session = session(&recorder);
    let mut ctx = session.project(load(dir.path()), Vec::new());
    let abort = AbortSignal::new();
    abort.trigger("other:generate-sources");

    let report = pipeline(PipelineOptions::default()).run_with_abort(&mut ctx, &abort);

    assert_eq!(
        report.state_of("generate-sources"),
        Some(&StageState::NotExecuted {
            blocked_by: "other:generate-sources".to_string()
        })
    );
    assert_eq!(recorder.created(), 0);
}

#[test]
fn test_aborted_project_is_not_successful() {
    let dir = project_dir(FOO_TOML);
    let recorder = Recorder::new();
    let session = session(&recorder);
    let mut ctx = session.project(load(dir.path()), Vec::new());
    let abort = AbortSignal::new();
    abort.trigger("other:generate-sources");

    let report = pipeline(PipelineOptions::default()).run_with_abort(&mut ctx, &abort);

    assert!(report.primary_failure().is_none());
    assert_eq!(
        report.count(|s| matches!(s, StageState::NotExecuted { .. })),
        all_stages().len()
    );
    assert!(!report.succeeded());
    assert_eq!(report.blocked_by(), Some("other:generate-sources"));
    match report.into_result() {
        Err(BuildError::Aborted(reason)) => assert!(reason.contains("other:generate-sources")),
        other => panic!("Expected Aborted, got {:?}", other.map(|r| r.project)),
    }
}

#[test]
fn test_pardoned_errors_do_not_fail_build() {
    let dir = project_dir(FOO_TOML);
    let recorder = Recorder::new();
    recorder.behave(|b| {
        b.messages = vec![
            EngineMessage::error("ambiguous strategy").in_language("Stratego"),
            EngineMessage::warning("unused import"),
        ]
    });
    let session = session(&recorder);
    let mut ctx = session.project(load(dir.path()), Vec::new());

    let report = pipeline(PipelineOptions::default()).run(&mut ctx);
    assert!(report.succeeded(), "{:?}", report.failure);
}

#[test]
fn test_unpardoned_errors_fail_build() {
    let dir = project_dir(FOO_TOML);
    let recorder = Recorder::new();
    recorder.behave(|b| {
        b.messages = vec![EngineMessage::error("missing sort")
            .in_language("SDF3")
            .in_file("src/syntax.sdf3")]
    });
    let session = session(&recorder);
    let mut ctx = session.project(load(dir.path()), Vec::new());

    let report = pipeline(PipelineOptions::default()).run(&mut ctx);
    match report.state_of("build") {
        Some(StageState::Failed(message)) => assert!(message.contains("missing sort")),
        other => panic!("expected build failure, got {:?}", other),
    }
}

#[test]
fn test_missing_archive_fails_self_check() {
    let dir = project_dir(FOO_TOML);
    let recorder = Recorder::new();
    recorder.behave(|b| b.skip_archive_write = true);
    let session = session(&recorder);
    let mut ctx = session.project(load(dir.path()), Vec::new());

    let report = pipeline(PipelineOptions::default()).run(&mut ctx);
    assert!(matches!(
        report.primary_failure(),
        Some(BuildError::ArchiveSelfCheck { .. })
    ));
    assert!(matches!(
        report.state_of("test"),
        Some(StageState::NotExecuted { .. })
    ));
}

#[test]
fn test_archive_outside_archive_dir_fails_self_check() {
    let dir = project_dir(FOO_TOML);
    let recorder = Recorder::new();
    recorder.behave(|b| b.archive_elsewhere = true);
    let session = session(&recorder);
    let mut ctx = session.project(load(dir.path()), Vec::new());

    let report = pipeline(PipelineOptions::default()).run(&mut ctx);
    match report.primary_failure() {
        Some(BuildError::ArchiveSelfCheck { path, reason }) => {
            assert!(path.ends_with("target/foo.lspec-lang"), "{}", path.display());
            assert!(reason.contains("foo-1.0.0.lspec-lang"), "{}", reason);
        }
        other => panic!("expected self-check failure, got {:?}", other),
    }
    assert_eq!(recorder.count("load-language foo"), 0);
    assert!(ctx.archive().is_none());
    assert!(matches!(
        report.state_of("test"),
        Some(StageState::NotExecuted { .. })
    ));
}

#[test]
fn test_unloadable_archive_fails_self_check() {
    let dir = project_dir(FOO_TOML);
    let recorder = Recorder::new();
    recorder.behave(|b| b.fail_operation = Some("load-language"));
    let session = session(&recorder);
    let mut ctx = session.project(load(dir.path()), Vec::new());

    let report = pipeline(PipelineOptions::default()).run(&mut ctx);
    match report.primary_failure() {
        Some(BuildError::ArchiveSelfCheck { path, .. }) => {
            assert!(path.ends_with("foo-1.0.0.lspec-lang"))
        }
        other => panic!("expected self-check failure, got {:?}", other),
    }
}

#[test]
fn test_failing_tests_write_marker() {
    let dir = project_dir(FOO_TOML);
    let recorder = Recorder::new();
    recorder.behave(|b| b.tests_fail = true);
    let session = session(&recorder);
    let mut ctx = session.project(load(dir.path()), Vec::new());

    let report = pipeline(PipelineOptions::default()).run(&mut ctx);

    assert!(matches!(report.state_of("test"), Some(StageState::Failed(_))));
    // Sibling of the test stage, unaffected
    assert_eq!(report.state_of("build-examples"), Some(&StageState::Succeeded));
    assert_eq!(
        fs::read_to_string(dir.path().join("target/test-result")).unwrap(),
        "failed"
    );
}

#[test]
fn test_disabled_terminal_stages() {
    let dir = project_dir(FOO_TOML);
    let recorder = Recorder::new();
    let session = session(&recorder);
    let mut ctx = session.project(load(dir.path()), Vec::new());

    let options = PipelineOptions::default();
    options.run_tests.set(false);
    options.build_examples.set(false);
    let report = pipeline(options).run(&mut ctx);

    assert!(report.succeeded());
    assert_eq!(
        report.state_of("test"),
        Some(&StageState::Skipped(SkipReason::Disabled))
    );
    assert_eq!(
        report.state_of("build-examples"),
        Some(&StageState::Skipped(SkipReason::Disabled))
    );
    assert_eq!(recorder.count("test"), 0);
    assert!(!dir.path().join("target/test-result").exists());
}

#[test]
fn test_tests_against_previous_archive() {
    let dir = project_dir(FOO_TOML);
    let recorder = Recorder::new();

    let options = PipelineOptions::default();
    options.run_tests.set(false);
    assert!(build(dir.path(), &recorder, options.clone()).succeeded());

    options.run_tests.set(true);
    recorder.clear();
    let report = build(dir.path(), &recorder, options);

    assert_eq!(report.executed(), vec!["test"]);
    assert_eq!(recorder.count("load-language foo-1.0.0.lspec-lang"), 1);
}

#[test]
fn test_reconfigure_rebuilds_engine() {
    let dir = project_dir(FOO_TOML);
    let recorder = Recorder::new();
    let session = session(&recorder);
    let mut ctx = session.project(load(dir.path()), Vec::new());

    assert!(pipeline(PipelineOptions::default()).run(&mut ctx).succeeded());
    assert_eq!(ctx.engine().generation(), 1);

    ctx.reconfigure(vec![ConfigOverride::new().with_version("1.1.0")]);
    assert!(ctx.effective().is_none());

    let report = pipeline(PipelineOptions::default()).run(&mut ctx);
    assert!(report.succeeded());
    assert_eq!(report.project, "acme:foo:1.1.0");
    assert_eq!(ctx.engine().generation(), 2);
    assert_eq!(recorder.disposed(), 1);
    assert_eq!(recorder.count("load-dialects"), 2);
    assert!(ctx.archive().unwrap().path.ends_with("foo-1.1.0.lspec-lang"));
}

#[test]
fn test_clean_removes_outputs() {
    let dir = project_dir(FOO_TOML);
    let recorder = Recorder::new();
    let session = session(&recorder);
    let mut ctx = session.project(load(dir.path()), Vec::new());
    assert!(pipeline(PipelineOptions::default()).run(&mut ctx).succeeded());

    ctx.clean().unwrap();

    assert!(!dir.path().join("target/archive").exists());
    assert!(!dir.path().join("target/test-result").exists());
    assert!(!dir.path().join("target/.lspec/fingerprints.json").exists());
    assert!(!dir.path().join("src-gen").exists());
    assert!(dir.path().join("src/syntax.sdf3").exists());
}

/// Gated like the test stage, but without touching the engine
struct Gated;

impl StageWork for Gated {
    fn run(&self, _ctx: &mut StageContext<'_>) -> BuildResult<()> {
        Ok(())
    }

    fn enabled(&self, options: &PipelineOptions) -> bool {
        options.run_tests.get()
    }
}

#[test]
fn test_switch_is_read_when_stage_is_reached() {
    let dir = project_dir(FOO_TOML);
    let recorder = Recorder::new();
    let session = session(&recorder);
    let mut ctx = session.project(load(dir.path()), Vec::new());

    let options = PipelineOptions::default();
    let switch = options.run_tests.clone();
    let mut graph = StageGraph::new();
    graph
        .add_stage(StageNode::from_fn("flip", move |_ctx| {
            switch.set(false);
            Ok(())
        }))
        .unwrap();
    graph.add_stage(StageNode::new("gated", Gated).after(["flip"])).unwrap();

    let report = Pipeline::new(graph, options).run(&mut ctx);

    assert_eq!(report.state_of("flip"), Some(&StageState::Succeeded));
    assert_eq!(
        report.state_of("gated"),
        Some(&StageState::Skipped(SkipReason::Disabled))
    );
}

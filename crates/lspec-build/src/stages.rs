//! Standard stages of a language specification build
//!
//! ```text
//! generate-sources -> build -> compile -> package -> archive -> { build-examples, test }
//! ```
//!
//! Each stage delegates one call to the engine. The stage itself only checks
//! the result: build messages against the pardoned languages, the archive by
//! loading it back, and the test outcome by writing the result marker.

use crate::artifact::ArchiveArtifact;
use crate::context::StageContext;
use crate::engine::{Severity, TestOutcome};
use crate::error::{BuildError, BuildResult};
use crate::fingerprint::FileSet;
use crate::graph::{StageGraph, StageNode};
use crate::pipeline::PipelineOptions;
use lspec_config::{Layout, CONFIG_FILE_NAME};
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::{debug, error, info, warn};

/// Marker contents written by the test stage
pub const TEST_PASSED: &str = "passed";
pub const TEST_FAILED: &str = "failed";

/// Unit of work behind a stage
pub trait StageWork: Send + Sync {
    fn run(&self, ctx: &mut StageContext<'_>) -> BuildResult<()>;

    /// Whether the stage runs at all; read when the stage is reached
    fn enabled(&self, _options: &PipelineOptions) -> bool {
        true
    }
}

/// Stage work from a closure
pub struct FnWork<F>(F);

impl<F> FnWork<F>
where
    F: Fn(&mut StageContext<'_>) -> BuildResult<()> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> StageWork for FnWork<F>
where
    F: Fn(&mut StageContext<'_>) -> BuildResult<()> + Send + Sync,
{
    fn run(&self, ctx: &mut StageContext<'_>) -> BuildResult<()> {
        (self.0)(ctx)
    }
}

/// The standard stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    GenerateSources,
    Build,
    Compile,
    Package,
    Archive,
    BuildExamples,
    Test,
}

impl StageKind {
    /// All stages in declaration order
    pub fn all() -> [StageKind; 7] {
        [
            Self::GenerateSources,
            Self::Build,
            Self::Compile,
            Self::Package,
            Self::Archive,
            Self::BuildExamples,
            Self::Test,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::GenerateSources => "generate-sources",
            Self::Build => "build",
            Self::Compile => "compile",
            Self::Package => "package",
            Self::Archive => "archive",
            Self::BuildExamples => "build-examples",
            Self::Test => "test",
        }
    }

    pub fn predecessors(&self) -> &'static [StageKind] {
        match self {
            Self::GenerateSources => &[],
            Self::Build => &[Self::GenerateSources],
            Self::Compile => &[Self::Build],
            Self::Package => &[Self::Compile],
            Self::Archive => &[Self::Package],
            Self::BuildExamples | Self::Test => &[Self::Archive],
        }
    }

    /// Approximate input allow-list, relative to the project root
    pub fn inputs(&self, layout: &Layout) -> FileSet {
        let target = &layout.target;
        match self {
            Self::GenerateSources => FileSet::new().path(CONFIG_FILE_NAME).path(&layout.source),
            Self::Build => FileSet::new()
                .path(CONFIG_FILE_NAME)
                .path(&layout.source)
                .path(&layout.generated),
            Self::Compile => FileSet::new()
                .path(&layout.generated)
                .path(target.join("build")),
            Self::Package => FileSet::new()
                .path(target.join("build"))
                .path(target.join("classes")),
            Self::Archive => FileSet::new()
                .path(CONFIG_FILE_NAME)
                .path(target.join("package")),
            Self::BuildExamples => FileSet::new()
                .path(target.join("archive"))
                .path(&layout.examples),
            Self::Test => FileSet::new()
                .path(target.join("archive"))
                .path(&layout.tests),
        }
    }

    /// Approximate output locations, relative to the project root
    pub fn outputs(&self, layout: &Layout) -> FileSet {
        let target = &layout.target;
        match self {
            Self::GenerateSources => FileSet::new().path(&layout.generated),
            Self::Build => FileSet::new().path(target.join("build")),
            Self::Compile => FileSet::new().path(target.join("classes")),
            Self::Package => FileSet::new().path(target.join("package")),
            Self::Archive => FileSet::new().path(target.join("archive")),
            Self::BuildExamples => FileSet::new(),
            Self::Test => FileSet::new().path(target.join("test-result")),
        }
    }

    /// Graph node for this stage
    pub fn node(self, layout: &Layout) -> StageNode {
        StageNode::new(self.name(), self)
            .after(self.predecessors().iter().map(StageKind::name))
            .with_inputs(self.inputs(layout))
            .with_outputs(self.outputs(layout))
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl StageWork for StageKind {
    fn run(&self, ctx: &mut StageContext<'_>) -> BuildResult<()> {
        let name = self.name();
        let fail = |e| BuildError::stage(name, e);

        match self {
            Self::GenerateSources => ctx.engine.generate_sources(ctx.config).map_err(fail),
            Self::Build => meta_build(ctx),
            Self::Compile => ctx.engine.compile(ctx.config).map_err(fail),
            Self::Package => ctx.engine.package(ctx.config).map_err(fail),
            Self::Archive => archive(ctx),
            Self::BuildExamples => {
                let artifact = ctx.archive_artifact(name)?;
                ctx.engine
                    .build_examples(ctx.config, &artifact.path)
                    .map_err(fail)
            }
            Self::Test => run_tests(ctx),
        }
    }

    fn enabled(&self, options: &PipelineOptions) -> bool {
        match self {
            Self::BuildExamples => options.build_examples.get(),
            Self::Test => options.run_tests.get(),
            _ => true,
        }
    }
}

fn meta_build(ctx: &mut StageContext<'_>) -> BuildResult<()> {
    let output = ctx
        .engine
        .build(ctx.config)
        .map_err(|e| BuildError::stage(StageKind::Build.name(), e))?;

    let mut errors = Vec::new();
    for message in &output.messages {
        match message.severity {
            Severity::Error => match &message.language {
                Some(language) if ctx.config.is_pardoned(language) => {
                    warn!("pardoned {}", message);
                }
                _ => {
                    error!("{}", message);
                    errors.push(message.to_string());
                }
            },
            Severity::Warning => warn!("{}", message),
            Severity::Note => debug!("{}", message),
        }
    }

    if errors.is_empty() {
        return Ok(());
    }
    Err(BuildError::stage(
        StageKind::Build.name(),
        format!("{} error(s): {}", errors.len(), errors.join("; ")),
    ))
}

fn archive(ctx: &mut StageContext<'_>) -> BuildResult<()> {
    let name = StageKind::Archive.name();
    let path = ctx
        .engine
        .archive(ctx.config)
        .map_err(|e| BuildError::stage(name, e))?;

    if !path.exists() {
        return Err(BuildError::archive_self_check(&path, "archive was not written"));
    }
    let expected = ArchiveArtifact::expected(ctx.config, ctx.paths, name);
    if !same_file(&path, &expected.path) {
        return Err(BuildError::archive_self_check(
            &path,
            format!("archive must be written to {}", expected.path.display()),
        ));
    }
    ctx.engine
        .load_language_archive(&expected.path)
        .map_err(|e| BuildError::archive_self_check(&expected.path, e))?;

    info!(language = %ctx.config.identifier(), "archived {}", expected.path.display());
    ctx.set_archive(expected);
    Ok(())
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

fn run_tests(ctx: &mut StageContext<'_>) -> BuildResult<()> {
    let name = StageKind::Test.name();
    let marker = ctx.paths.test_result.clone();
    let artifact = ctx.archive_artifact(name)?;

    match ctx.engine.run_tests(ctx.config, &artifact.path) {
        Ok(TestOutcome::Passed) => write_marker(&marker, TEST_PASSED),
        Ok(TestOutcome::Failed { summary }) => {
            write_marker(&marker, TEST_FAILED)?;
            Err(BuildError::stage(name, format!("tests failed: {}", summary)))
        }
        Err(e) => {
            if marker.exists() {
                fs::remove_file(&marker).map_err(|io| BuildError::io(&marker, io))?;
            }
            Err(BuildError::stage(name, e))
        }
    }
}

fn write_marker(path: &Path, content: &str) -> BuildResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| BuildError::io(parent, e))?;
    }
    fs::write(path, content).map_err(|e| BuildError::io(path, e))
}

/// The standard stage graph for `layout`
pub fn standard_graph(layout: &Layout) -> BuildResult<StageGraph> {
    let mut graph = StageGraph::new();
    for kind in StageKind::all() {
        graph.add_stage(kind.node(layout))?;
    }
    graph.validate()?;
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_standard_order() {
        let graph = standard_graph(&Layout::default()).unwrap();
        assert_eq!(
            graph.compute_order().unwrap(),
            vec![
                "generate-sources",
                "build",
                "compile",
                "package",
                "archive",
                "build-examples",
                "test",
            ]
        );
    }

    #[test]
    fn test_terminal_stages_follow_archive() {
        let graph = standard_graph(&Layout::default()).unwrap();
        let dependents = graph.dependents_of("archive");
        assert_eq!(dependents.len(), 2);
        assert!(dependents.contains("test"));
        assert!(dependents.contains("build-examples"));
    }

    #[test]
    fn test_switches_gate_terminal_stages() {
        let options = PipelineOptions::default();
        assert!(StageKind::Test.enabled(&options));

        options.run_tests.set(false);
        assert!(!StageKind::Test.enabled(&options));
        assert!(StageKind::BuildExamples.enabled(&options));
        assert!(StageKind::Compile.enabled(&options));
    }

    #[test]
    fn test_build_examples_declares_no_outputs() {
        assert!(StageKind::BuildExamples.outputs(&Layout::default()).is_empty());
        assert!(!StageKind::Test.outputs(&Layout::default()).is_empty());
    }
}

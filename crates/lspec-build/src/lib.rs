//! lspec build pipeline
//!
//! Drives a language specification project through its build stages:
//! - Dependency resolution and classification
//! - Configuration overlay, applied once per build
//! - A build-scoped compiler engine shared by every stage
//! - The stage graph with incremental fingerprints
//! - Multi-project workspaces built in parallel

pub mod artifact;
pub mod classify;
pub mod context;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod graph;
pub mod once;
pub mod pipeline;
pub mod resolve;
pub mod stages;
pub mod workspace;

// Re-export main types
pub use artifact::{ArchiveArtifact, LANGUAGE_EXTENSION};
pub use classify::{Classification, DependencyClassifier, UsageLabel};
pub use context::{BuildSession, OverlayCache, ProjectContext, ProjectPaths, StageContext};
pub use engine::{
    BuildOutput, Engine, EngineError, EngineFactory, EngineLifecycle, EngineMessage, EngineResult,
    ProcessEngine, ProcessEngineFactory, Severity, TestOutcome,
};
pub use error::{BuildError, BuildResult};
pub use fingerprint::{FileSet, FingerprintPolicy, FingerprintStore, StageRecord};
pub use graph::{StageGraph, StageNode};
pub use once::{OnceTable, ScopeKey};
pub use pipeline::{
    AbortSignal, Pipeline, PipelineOptions, PipelineReport, SkipReason, StageOutcome, StageState,
    Switch,
};
pub use resolve::{
    DependencyRequest, DependencyResolver, LocalRepository, ResolvedArtifact, ARTIFACT_DESCRIPTOR,
};
pub use stages::{standard_graph, FnWork, StageKind, StageWork};
pub use workspace::{Workspace, WorkspaceReport};

// Re-export lspec-config types for convenience
pub use lspec_config::{Config, ConfigLoader, ConfigOverride, EffectiveConfig};

//! Compiler engine seam and its build-scoped lifecycle
//!
//! The engine is the external language-specification compiler. Every stage of
//! a project talks to the same instance, which is constructed on first use,
//! accumulates loaded languages and dialects, and is disposed exactly once
//! when the build ends or when a configuration change invalidates it.

pub mod process;

use lspec_config::EffectiveConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::error::{BuildError, BuildResult};

pub use process::{ProcessEngine, ProcessEngineFactory};

pub type EngineResult<T> = Result<T, EngineError>;

/// Failure reported by the engine for one operation
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("engine operation '{operation}' failed: {message}")]
pub struct EngineError {
    pub operation: String,
    pub message: String,
}

impl EngineError {
    pub fn new(operation: impl Into<String>, message: impl ToString) -> Self {
        Self {
            operation: operation.into(),
            message: message.to_string(),
        }
    }
}

/// Severity of an engine message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Note,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Note => "note",
        };
        f.write_str(name)
    }
}

/// Structured message produced by the meta-language build
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineMessage {
    pub severity: Severity,
    /// Language the message is attributed to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl EngineMessage {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            language: None,
            message: message.into(),
            file: None,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(message)
        }
    }

    pub fn in_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn in_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.file = Some(file.into());
        self
    }
}

impl fmt::Display for EngineMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.severity)?;
        if let Some(language) = &self.language {
            write!(f, " [{}]", language)?;
        }
        if let Some(file) = &self.file {
            write!(f, " {}", file.display())?;
        }
        write!(f, ": {}", self.message)
    }
}

/// Result of the meta-language build
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildOutput {
    pub messages: Vec<EngineMessage>,
}

/// Result of running the specification tests
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestOutcome {
    Passed,
    Failed { summary: String },
}

impl TestOutcome {
    pub fn passed(&self) -> bool {
        matches!(self, Self::Passed)
    }
}

/// Operations the pipeline delegates to the compiler
///
/// Every call is synchronous. Errors are opaque to the pipeline, which only
/// distinguishes success from failure.
pub trait Engine: Send {
    /// Prepare the engine for a project
    fn initialize(&mut self, config: &EffectiveConfig) -> EngineResult<()>;

    fn generate_sources(&mut self, config: &EffectiveConfig) -> EngineResult<()>;

    /// Run the meta-language build and report its messages
    fn build(&mut self, config: &EffectiveConfig) -> EngineResult<BuildOutput>;

    fn compile(&mut self, config: &EffectiveConfig) -> EngineResult<()>;

    fn package(&mut self, config: &EffectiveConfig) -> EngineResult<()>;

    /// Write the language archive and return its path
    fn archive(&mut self, config: &EffectiveConfig) -> EngineResult<PathBuf>;

    fn clean(&mut self, config: &EffectiveConfig) -> EngineResult<()>;

    /// Load a compiled language archive into the engine
    fn load_language_archive(&mut self, archive: &Path) -> EngineResult<()>;

    /// Discover and load dialects below `root`, returning how many were found
    fn load_dialects_under(&mut self, root: &Path) -> EngineResult<usize>;

    fn build_examples(&mut self, config: &EffectiveConfig, archive: &Path) -> EngineResult<()>;

    fn run_tests(&mut self, config: &EffectiveConfig, archive: &Path) -> EngineResult<TestOutcome>;

    /// Release the engine's resources
    fn dispose(&mut self) {}
}

/// Constructs engines for projects
pub trait EngineFactory: Send + Sync {
    fn create(&self, project_root: &Path, config: &EffectiveConfig) -> EngineResult<Box<dyn Engine>>;
}

/// Process-wide counter for [`EngineLifecycle::instance_id`]
static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

/// Lazily constructed engine handle for one project
///
/// `get` returns the same instance until `reset` or `close`. Construction
/// failures are returned to the caller and never retried inside `get`.
pub struct EngineLifecycle {
    factory: Arc<dyn EngineFactory>,
    project_root: PathBuf,
    instance: Option<(u64, Box<dyn Engine>)>,
    generation: u64,
}

impl EngineLifecycle {
    pub fn new(factory: Arc<dyn EngineFactory>, project_root: impl Into<PathBuf>) -> Self {
        Self {
            factory,
            project_root: project_root.into(),
            instance: None,
            generation: 0,
        }
    }

    /// The shared engine, constructing and initializing it on first use
    pub fn get(&mut self, config: &EffectiveConfig) -> BuildResult<&mut dyn Engine> {
        let (id, engine) = match self.instance.take() {
            Some(current) => current,
            None => {
                let mut engine = self
                    .factory
                    .create(&self.project_root, config)
                    .map_err(BuildError::EngineConstruction)?;
                if let Err(e) = engine.initialize(config) {
                    engine.dispose();
                    return Err(BuildError::EngineConstruction(e));
                }
                self.generation += 1;
                let id = NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed);
                info!(
                    language = %config.identifier(),
                    generation = self.generation,
                    instance = id,
                    "started compiler engine"
                );
                (id, engine)
            }
        };
        let (_, engine) = self.instance.insert((id, engine));
        Ok(&mut **engine)
    }

    /// Dispose the current instance so the next `get` builds a fresh one
    pub fn reset(&mut self) {
        if let Some((id, mut engine)) = self.instance.take() {
            debug!(root = %self.project_root.display(), instance = id, "disposing compiler engine");
            engine.dispose();
        }
    }

    /// Tear down at end of build; idempotent
    pub fn close(&mut self) {
        self.reset();
    }

    pub fn is_active(&self) -> bool {
        self.instance.is_some()
    }

    /// Identifier of the live instance, unique within the process
    pub fn instance_id(&self) -> Option<u64> {
        self.instance.as_ref().map(|(id, _)| *id)
    }

    /// Number of instances constructed so far
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl Drop for EngineLifecycle {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for EngineLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineLifecycle")
            .field("project_root", &self.project_root)
            .field("active", &self.is_active())
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

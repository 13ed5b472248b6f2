/// Build system error types
use crate::engine::EngineError;
use lspec_config::ConfigError;
use std::path::PathBuf;
use thiserror::Error;

pub type BuildResult<T> = Result<T, BuildError>;

#[derive(Debug, Error)]
pub enum BuildError {
    /// Effective configuration invalid after overlay
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Unresolvable dependency '{dependency}': {reason}")]
    UnresolvableDependency { dependency: String, reason: String },

    /// The shared compiler engine could not be started
    #[error("Failed to construct compiler engine: {0}")]
    EngineConstruction(#[source] EngineError),

    #[error("Stage '{stage}' failed: {message}")]
    StageExecution { stage: String, message: String },

    /// The archive was written but could not be loaded back
    #[error("Archive self-check failed for {path}: {reason}")]
    ArchiveSelfCheck { path: PathBuf, reason: String },

    #[error("Circular stage dependency detected: {0}")]
    CircularDependency(String),

    #[error("Stage not found: {stage}")]
    StageNotFound { stage: String },

    #[error("Stage '{0}' declared more than once")]
    DuplicateStage(String),

    #[error("Fingerprint cache error: {0}")]
    CacheError(String),

    #[error("I/O error at {path}: {error}")]
    IoError {
        path: PathBuf,
        error: std::io::Error,
    },

    #[error("Build aborted: {0}")]
    Aborted(String),
}

impl BuildError {
    /// Create an unresolvable dependency error
    pub fn unresolvable(dependency: impl ToString, reason: impl Into<String>) -> Self {
        Self::UnresolvableDependency {
            dependency: dependency.to_string(),
            reason: reason.into(),
        }
    }

    /// Create a stage execution error
    pub fn stage(stage: impl Into<String>, message: impl ToString) -> Self {
        Self::StageExecution {
            stage: stage.into(),
            message: message.to_string(),
        }
    }

    /// Create an archive self-check error
    pub fn archive_self_check(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::ArchiveSelfCheck {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Create an I/O error with path context
    pub fn io(path: impl Into<PathBuf>, error: std::io::Error) -> Self {
        Self::IoError {
            path: path.into(),
            error,
        }
    }

    /// Whether this failure must abort the whole build invocation rather
    /// than only the dependent stages
    pub fn aborts_invocation(&self) -> bool {
        matches!(self, Self::EngineConstruction(_))
    }
}

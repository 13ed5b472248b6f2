//! lspec Configuration System
//!
//! Provides configuration management for language specification projects:
//! - Declarative project configuration (`lspec.toml`)
//! - Language identifiers and dependency sets
//! - Sparse overrides registered by the build host, the environment and the CLI
//! - Overlay resolution into a validated [`EffectiveConfig`]
//!
//! # Configuration Precedence
//!
//! Overrides are applied on top of the file record in registration order
//! (later non-empty fields win):
//! 1. Project config (`./lspec.toml`)
//! 2. Environment variables (`LSPEC_*`)
//! 3. Build host / CLI flags
//! 4. Resolved dependency sets
//!
//! Validation always runs on the overlaid record, never on the raw file.
//!
//! # Example
//!
//! ```no_run
//! use lspec_config::{ConfigLoader, ConfigOverride};
//! use std::path::Path;
//!
//! let loader = ConfigLoader::new();
//! let config = loader.load_from_directory(Path::new(".")).unwrap();
//! let effective = config
//!     .effective(&[ConfigOverride::new().with_version("2.0.0")])
//!     .unwrap();
//! println!("{}", effective.identifier());
//! ```

pub mod identity;
pub mod loader;
pub mod overlay;
pub mod project;

use std::path::PathBuf;
use thiserror::Error;

/// Name of the declarative configuration file at a project root
pub const CONFIG_FILE_NAME: &str = "lspec.toml";

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid TOML syntax in {file}: {error}")]
    TomlParseError {
        file: PathBuf,
        error: toml::de::Error,
    },

    /// The overlaid configuration is missing required fields or is inconsistent
    #[error("Invalid configuration in {file}: {reason}")]
    ValidationError { file: PathBuf, reason: String },

    #[error("Invalid language identifier '{0}': expected group:id:version")]
    InvalidIdentifier(String),

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

impl ConfigError {
    /// Create a validation error located at the given configuration file
    pub fn validation(file: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::ValidationError {
            file: file.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

// Re-export main types
pub use identity::{DependencyKind, DependencySet, LanguageIdentifier, ProjectIdentity};
pub use loader::{Config, ConfigLoader};
pub use overlay::{ConfigOverride, EffectiveConfig, Layout};
pub use project::{Contribution, LanguageConfig, LayoutConfig, OutputFormat, ProjectConfig};

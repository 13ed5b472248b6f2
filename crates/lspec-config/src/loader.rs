//! Configuration Loader
//!
//! Finds and loads a project's `lspec.toml` and pairs it with the
//! environment override layer.

use crate::overlay::{self, ConfigOverride, EffectiveConfig};
use crate::project::ProjectConfig;
use crate::{ConfigError, ConfigResult, CONFIG_FILE_NAME};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Configuration loader
///
/// Layers, lowest priority first:
/// 1. Project config (./lspec.toml)
/// 2. Environment variables (LSPEC_*)
/// 3. Host and CLI overrides (supplied by the caller)
pub struct ConfigLoader {
    /// Whether to read `LSPEC_*` variables
    read_env: bool,
}

/// Loaded configuration, before overlay
#[derive(Debug, Clone)]
pub struct Config {
    /// Project configuration as declared in the file
    pub project: ProjectConfig,

    /// Override layer read from the environment
    pub env: ConfigOverride,

    /// Project root directory (where lspec.toml was found)
    pub project_root: PathBuf,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self { read_env: true }
    }

    /// Ignore `LSPEC_*` environment variables
    pub fn without_env(mut self) -> Self {
        self.read_env = false;
        self
    }

    /// Load configuration starting from the given directory
    ///
    /// Walks up the directory tree to find lspec.toml.
    pub fn load_from_directory(&self, start_dir: &Path) -> ConfigResult<Config> {
        let config_path = Self::find_config_file(start_dir)
            .ok_or_else(|| ConfigError::NotFound(start_dir.join(CONFIG_FILE_NAME)))?;
        self.load_from_file(&config_path)
    }

    /// Load configuration from a specific project config file
    pub fn load_from_file(&self, config_path: &Path) -> ConfigResult<Config> {
        let project = ProjectConfig::load_from_file(config_path)?;
        let env = if self.read_env {
            ConfigOverride::from_env()?
        } else {
            ConfigOverride::default()
        };

        let project_root = config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        debug!("loaded {}", config_path.display());

        Ok(Config {
            project,
            env,
            project_root,
        })
    }

    /// Find lspec.toml by walking up from `start_dir`
    pub fn find_config_file(start_dir: &Path) -> Option<PathBuf> {
        let mut current = Some(start_dir);

        while let Some(dir) = current {
            let config_path = dir.join(CONFIG_FILE_NAME);
            if config_path.is_file() {
                return Some(config_path);
            }
            current = dir.parent();
        }

        None
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    /// Resolve the effective configuration
    ///
    /// The environment layer applies first, then `overrides` in order.
    pub fn effective(&self, overrides: &[ConfigOverride]) -> ConfigResult<EffectiveConfig> {
        let mut layers = Vec::with_capacity(overrides.len() + 1);
        layers.push(self.env.clone());
        layers.extend_from_slice(overrides);
        overlay::apply(&self.project, &layers)
    }

    /// Get the project root directory
    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// Path of the configuration file
    pub fn config_path(&self) -> PathBuf {
        self.project_root.join(CONFIG_FILE_NAME)
    }
}

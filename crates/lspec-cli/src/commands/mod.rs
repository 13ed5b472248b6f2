pub mod build;
pub mod check;
pub mod clean;
pub mod graph;
pub mod report;

use anyhow::{bail, Context, Result};
use clap::Args;
use lspec_build::{BuildSession, LocalRepository, ProcessEngineFactory};
use lspec_config::{
    Config, ConfigLoader, ConfigOverride, DependencyKind, LanguageIdentifier, OutputFormat,
    ProjectIdentity,
};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Host overrides of the configuration file
#[derive(Args, Debug, Clone, Default)]
pub struct OverrideArgs {
    /// Language group
    #[arg(long)]
    pub group: Option<String>,
    /// Language id
    #[arg(long)]
    pub name: Option<String>,
    /// Language version
    #[arg(id = "lang_version", long = "lang-version", value_name = "VERSION")]
    pub version: Option<String>,
    /// Output format (jar, files)
    #[arg(long)]
    pub format: Option<String>,
    /// Compile dependency `group:id:version`, replacing the declared set
    #[arg(long = "compile-dep", value_name = "ID")]
    pub compile: Vec<String>,
    /// Source dependency, replacing the declared set
    #[arg(long = "source-dep", value_name = "ID")]
    pub source: Vec<String>,
    /// Java dependency, replacing the declared set
    #[arg(long = "java-dep", value_name = "ID")]
    pub java: Vec<String>,
}

impl OverrideArgs {
    /// Override layers, identity first
    pub fn layers(&self) -> Result<Vec<ConfigOverride>> {
        let identity = ProjectIdentity {
            group: self.group.clone(),
            name: self.name.clone(),
            version: self.version.clone(),
        };

        let mut patch = ConfigOverride::from_identity(&identity);
        if let Some(format) = &self.format {
            let format: OutputFormat = format.parse().context("Invalid --format")?;
            patch = patch.with_format(format);
        }
        for (kind, ids) in [
            (DependencyKind::Compile, &self.compile),
            (DependencyKind::Source, &self.source),
            (DependencyKind::Java, &self.java),
        ] {
            if ids.is_empty() {
                continue;
            }
            let parsed = ids
                .iter()
                .map(|id| LanguageIdentifier::parse(id))
                .collect::<Result<Vec<_>, _>>()
                .with_context(|| format!("Invalid {} dependency", kind))?;
            patch = patch.with_dependencies(kind, parsed);
        }

        if patch.is_empty() {
            Ok(Vec::new())
        } else {
            Ok(vec![patch])
        }
    }
}

/// Collaborators supplied by the build host
#[derive(Args, Debug, Clone, Default)]
pub struct HostArgs {
    /// Compiler executable
    #[arg(long, env = "LSPEC_COMPILER")]
    pub compiler: Option<PathBuf>,
    /// Local artifact repository
    #[arg(long, env = "LSPEC_REPOSITORY")]
    pub repository: Option<PathBuf>,
}

impl HostArgs {
    /// Session backed by the configured compiler and repository
    pub fn session(&self) -> Result<BuildSession> {
        let Some(compiler) = &self.compiler else {
            bail!("No compiler configured: pass --compiler or set LSPEC_COMPILER");
        };

        let mut session = BuildSession::new(Arc::new(ProcessEngineFactory::new(compiler)));
        if let Some(repository) = &self.repository {
            let repository = absolute(repository)?;
            session = session.with_resolver(Arc::new(LocalRepository::new(repository)));
        }
        Ok(session)
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = env::current_dir().context("Cannot read the current directory")?;
    Ok(cwd.join(path))
}

/// Load the project whose `lspec.toml` is in or above `dir`
pub fn load_project(dir: &Path) -> Result<Config> {
    ConfigLoader::new()
        .load_from_directory(dir)
        .with_context(|| format!("Failed to load project in {}", dir.display()))
}

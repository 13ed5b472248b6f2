//! Dependency resolution seam
//!
//! The host resolves declared dependencies to artifacts. [`LocalRepository`]
//! is a file-system repository laid out as
//! `<root>/<group>/<id>/<version>/artifact.toml`:
//!
//! ```toml
//! usage = "language-artifact"
//! file = "foo-1.0.0.lspec-lang"
//! dependencies = ["acme:base:1.0.0"]
//! ```

use crate::classify::UsageLabel;
use crate::error::{BuildError, BuildResult};
use lspec_config::{DependencyKind, DependencySet, LanguageIdentifier};
use serde::Deserialize;
use std::collections::{HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Descriptor file name inside an artifact directory
pub const ARTIFACT_DESCRIPTOR: &str = "artifact.toml";

/// A dependency declared by the project
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyRequest {
    pub kind: DependencyKind,
    pub identifier: LanguageIdentifier,
}

impl DependencyRequest {
    pub fn new(kind: DependencyKind, identifier: LanguageIdentifier) -> Self {
        Self { kind, identifier }
    }

    /// One request per entry of `deps`, in set order
    pub fn from_set(deps: &DependencySet) -> Vec<Self> {
        DependencyKind::all()
            .into_iter()
            .flat_map(|kind| deps.get(kind).iter().map(move |id| Self::new(kind, id.clone())))
            .collect()
    }
}

/// A resolved artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedArtifact {
    pub identifier: LanguageIdentifier,
    pub usage: UsageLabel,
    /// Set the artifact was requested for
    pub requested_as: DependencyKind,
    /// Declared by the project rather than pulled in by another artifact
    pub direct: bool,
    /// Local file, when the artifact has one
    pub path: Option<PathBuf>,
}

/// Resolves dependency requests to artifacts
pub trait DependencyResolver: Send + Sync {
    fn resolve(&self, requests: &[DependencyRequest]) -> BuildResult<Vec<ResolvedArtifact>>;
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Descriptor {
    usage: UsageLabel,
    #[serde(default)]
    file: Option<PathBuf>,
    #[serde(default)]
    dependencies: Vec<LanguageIdentifier>,
}

/// File-system artifact repository
#[derive(Debug, Clone)]
pub struct LocalRepository {
    root: PathBuf,
}

impl LocalRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding `identifier`
    pub fn artifact_dir(&self, identifier: &LanguageIdentifier) -> PathBuf {
        self.root
            .join(&identifier.group)
            .join(&identifier.id)
            .join(&identifier.version)
    }

    fn describe(&self, identifier: &LanguageIdentifier) -> BuildResult<(Descriptor, PathBuf)> {
        let dir = self.artifact_dir(identifier);
        let path = dir.join(ARTIFACT_DESCRIPTOR);
        if !path.is_file() {
            return Err(BuildError::unresolvable(
                identifier,
                format!("not found in repository {}", self.root.display()),
            ));
        }

        let content = fs::read_to_string(&path).map_err(|e| BuildError::io(&path, e))?;
        let descriptor: Descriptor = toml::from_str(&content)
            .map_err(|e| BuildError::unresolvable(identifier, format!("invalid {}: {}", path.display(), e)))?;
        Ok((descriptor, dir))
    }
}

impl DependencyResolver for LocalRepository {
    fn resolve(&self, requests: &[DependencyRequest]) -> BuildResult<Vec<ResolvedArtifact>> {
        let mut resolved = Vec::new();
        let mut queue: VecDeque<(DependencyRequest, bool)> =
            requests.iter().map(|r| (r.clone(), true)).collect();
        let mut visited = HashSet::new();

        while let Some((request, direct)) = queue.pop_front() {
            if !visited.insert((request.kind, request.identifier.clone(), direct)) {
                continue;
            }

            let (descriptor, dir) = self.describe(&request.identifier)?;
            for dependency in &descriptor.dependencies {
                queue.push_back((DependencyRequest::new(request.kind, dependency.clone()), false));
            }

            resolved.push(ResolvedArtifact {
                path: descriptor.file.map(|f| dir.join(f)),
                identifier: request.identifier,
                usage: descriptor.usage,
                requested_as: request.kind,
                direct,
            });
        }

        debug!(
            requested = requests.len(),
            resolved = resolved.len(),
            "resolved dependencies from {}",
            self.root.display()
        );
        Ok(resolved)
    }
}

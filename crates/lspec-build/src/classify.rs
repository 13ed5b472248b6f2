//! Dependency classification
//!
//! Resolved artifacts are partitioned into the three dependency sets of the
//! effective configuration. Artifacts published by the dedicated language
//! pipeline carry the `language-artifact` usage label; those published as
//! ordinary libraries carry `runtime-library`. A runtime library is accepted
//! wherever a language artifact is requested, but not the other way around.

use crate::error::{BuildError, BuildResult};
use crate::resolve::ResolvedArtifact;
use lspec_config::{DependencyKind, DependencySet, LanguageIdentifier};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use tracing::{debug, trace};

/// Artifact ids with these suffixes only align versions and are never
/// classified
pub const PLATFORM_SUFFIXES: [&str; 2] = ["-platform", "-bom"];

/// Usage attribute of a published artifact
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum UsageLabel {
    LanguageArtifact,
    RuntimeLibrary,
    Platform,
    Other(String),
}

impl UsageLabel {
    pub fn as_str(&self) -> &str {
        match self {
            Self::LanguageArtifact => "language-artifact",
            Self::RuntimeLibrary => "runtime-library",
            Self::Platform => "platform",
            Self::Other(label) => label,
        }
    }

    /// Whether an artifact labelled `self` satisfies a request for `requested`
    pub fn satisfies(&self, requested: &UsageLabel) -> bool {
        self == requested || (*self == Self::RuntimeLibrary && *requested == Self::LanguageArtifact)
    }

    /// Label requested for dependencies of `kind`
    pub fn requested_for(kind: DependencyKind) -> Self {
        match kind {
            DependencyKind::Compile | DependencyKind::Source => Self::LanguageArtifact,
            DependencyKind::Java => Self::RuntimeLibrary,
        }
    }
}

impl From<String> for UsageLabel {
    fn from(label: String) -> Self {
        match label.as_str() {
            "language-artifact" => Self::LanguageArtifact,
            "runtime-library" => Self::RuntimeLibrary,
            "platform" => Self::Platform,
            _ => Self::Other(label),
        }
    }
}

impl From<UsageLabel> for String {
    fn from(label: UsageLabel) -> Self {
        label.as_str().to_string()
    }
}

impl fmt::Display for UsageLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether `identifier` names a platform or BOM artifact
pub fn is_platform(identifier: &LanguageIdentifier) -> bool {
    PLATFORM_SUFFIXES.iter().any(|s| identifier.id.ends_with(s))
}

/// Classified dependencies of a project
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    pub dependencies: DependencySet,
    /// Compile dependencies with a local file, to load into the engine
    pub language_archives: Vec<(LanguageIdentifier, PathBuf)>,
}

pub struct DependencyClassifier;

impl DependencyClassifier {
    /// Partition resolved artifacts
    ///
    /// Transitive and platform artifacts are dropped. An artifact whose usage
    /// label cannot satisfy the request is an unresolvable dependency.
    pub fn classify(artifacts: &[ResolvedArtifact]) -> BuildResult<Classification> {
        let mut result = Classification::default();

        for artifact in artifacts {
            if !artifact.direct {
                trace!(artifact = %artifact.identifier, "skipping transitive dependency");
                continue;
            }
            if artifact.usage == UsageLabel::Platform || is_platform(&artifact.identifier) {
                debug!(artifact = %artifact.identifier, "skipping platform artifact");
                continue;
            }

            let kind = artifact.requested_as;
            let requested = UsageLabel::requested_for(kind);
            if !artifact.usage.satisfies(&requested) {
                return Err(BuildError::unresolvable(
                    &artifact.identifier,
                    format!(
                        "requested as {} dependency with usage '{}', but only '{}' is published",
                        kind, requested, artifact.usage
                    ),
                ));
            }

            result.dependencies.push(kind, artifact.identifier.clone());
            if kind == DependencyKind::Compile {
                if let Some(path) = &artifact.path {
                    let entry = (artifact.identifier.clone(), path.clone());
                    if !result.language_archives.contains(&entry) {
                        result.language_archives.push(entry);
                    }
                }
            }
        }

        debug!(
            compile = result.dependencies.get(DependencyKind::Compile).len(),
            source = result.dependencies.get(DependencyKind::Source).len(),
            java = result.dependencies.get(DependencyKind::Java).len(),
            "classified dependencies"
        );
        Ok(result)
    }
}

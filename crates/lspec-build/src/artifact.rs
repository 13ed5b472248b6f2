/// Language archive artifact
use crate::context::ProjectPaths;
use lspec_config::{EffectiveConfig, LanguageIdentifier};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File extension of packaged languages
pub const LANGUAGE_EXTENSION: &str = "lspec-lang";

/// The packaged output of a project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveArtifact {
    /// Identity of the packaged language
    pub identifier: LanguageIdentifier,
    /// Location of the archive
    pub path: PathBuf,
    /// Stage that wrote it
    pub producing_stage: String,
}

impl ArchiveArtifact {
    pub fn new(identifier: LanguageIdentifier, path: impl Into<PathBuf>, producing_stage: impl Into<String>) -> Self {
        Self {
            identifier,
            path: path.into(),
            producing_stage: producing_stage.into(),
        }
    }

    /// Conventional archive file name for `identifier`
    pub fn file_name(identifier: &LanguageIdentifier) -> String {
        format!("{}-{}.{}", identifier.id, identifier.version, LANGUAGE_EXTENSION)
    }

    /// Where the archive stage writes the archive for `config`
    pub fn expected(config: &EffectiveConfig, paths: &ProjectPaths, producing_stage: &str) -> Self {
        let identifier = config.identifier().clone();
        let path = paths.archive_dir.join(Self::file_name(&identifier));
        Self::new(identifier, path, producing_stage)
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lspec_config::{ConfigOverride, Layout, ProjectConfig};

    #[test]
    fn test_expected_location() {
        let patch = ConfigOverride::new()
            .with_group("acme")
            .with_id("foo")
            .with_version("1.0.0");
        let config = lspec_config::overlay::apply(&ProjectConfig::default(), &[patch]).unwrap();
        let paths = ProjectPaths::new("/work/foo", &Layout::default());

        let artifact = ArchiveArtifact::expected(&config, &paths, "archive");
        assert_eq!(
            artifact.path,
            PathBuf::from("/work/foo/target/archive/foo-1.0.0.lspec-lang")
        );
        assert_eq!(artifact.identifier.to_string(), "acme:foo:1.0.0");
        assert!(!artifact.exists());
    }
}

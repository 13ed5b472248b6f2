//! Project Configuration (lspec.toml)
//!
//! The declarative, file-backed record. It is read-only input: overrides are
//! applied to an in-memory copy by [`crate::overlay::apply`] and the file is
//! never written back.

use crate::identity::{DependencySet, LanguageIdentifier};
use crate::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Project configuration from lspec.toml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    /// Language metadata
    #[serde(default)]
    pub language: LanguageConfig,

    /// Declared dependencies
    #[serde(default)]
    pub dependencies: DependencySet,

    /// Languages this project contributes to
    #[serde(default)]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub contributions: Vec<Contribution>,

    /// Directory layout
    #[serde(default)]
    pub layout: LayoutConfig,

    /// File this record was read from
    #[serde(skip)]
    source: Option<PathBuf>,
}

/// Language metadata. Identity fields may be left to build host overrides.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct LanguageConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Display name (defaults to the id)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Output format selector
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<OutputFormat>,

    /// Languages exempt from strict error checking
    #[serde(default)]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub pardoned_languages: Vec<String>,
}

/// A language this project contributes to, possibly itself
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Contribution {
    pub name: String,
    pub id: LanguageIdentifier,
}

impl Contribution {
    pub fn new(name: impl Into<String>, id: LanguageIdentifier) -> Self {
        Self {
            name: name.into(),
            id,
        }
    }
}

/// Directory layout, relative to the project root
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct LayoutConfig {
    /// Source directory (default: "src")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,

    /// Generated sources (default: "src-gen")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated: Option<PathBuf>,

    /// Example programs (default: "example")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub examples: Option<PathBuf>,

    /// Specification tests (default: "test")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tests: Option<PathBuf>,

    /// Build output directory (default: "target")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<PathBuf>,
}

/// Format of the packaged language output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Compressed archive
    #[default]
    Jar,
    /// Plain directory tree
    Files,
}

impl OutputFormat {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Jar => "jar",
            Self::Files => "files",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for OutputFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "jar" => Ok(Self::Jar),
            "files" => Ok(Self::Files),
            other => Err(ConfigError::InvalidValue {
                field: "language.format".to_string(),
                reason: format!("unknown output format '{}' (expected jar or files)", other),
            }),
        }
    }
}

impl ProjectConfig {
    /// Load project configuration from a file
    ///
    /// Only syntax is checked here; semantic validation happens after overlay.
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.to_path_buf())
            } else {
                ConfigError::IoError(e)
            }
        })?;

        Self::parse(&content, path)
    }

    /// Parse configuration content, recording `source` as its locator
    pub fn parse(content: &str, source: impl Into<PathBuf>) -> ConfigResult<Self> {
        let source = source.into();
        let mut config: Self = toml::from_str(content).map_err(|e| ConfigError::TomlParseError {
            file: source.clone(),
            error: e,
        })?;
        config.source = Some(source);
        Ok(config)
    }

    /// Set the source locator
    pub fn with_source(mut self, source: impl Into<PathBuf>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// File this record was read from, if any
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Locator used in error messages
    pub fn source_locator(&self) -> PathBuf {
        self.source
            .clone()
            .unwrap_or_else(|| PathBuf::from("<in-memory>"))
    }

    /// The declared identifier, if every part is present in the file
    pub fn identifier(&self) -> Option<LanguageIdentifier> {
        let lang = &self.language;
        fn trimmed(value: &Option<String>) -> Option<&str> {
            value.as_deref().map(str::trim).filter(|v| !v.is_empty())
        }
        match (trimmed(&lang.group), trimmed(&lang.id), trimmed(&lang.version)) {
            (Some(g), Some(i), Some(v)) => Some(LanguageIdentifier::new(g, i, v)),
            _ => None,
        }
    }
}

/// Basic version validation: `X.Y[.Z]` with optional `-pre` / `+build`
pub(crate) fn is_valid_version(version: &str) -> bool {
    if version.is_empty() {
        return false;
    }

    let main_version = version.split(['-', '+']).next().unwrap_or("");

    if main_version.is_empty() {
        return false;
    }

    let parts: Vec<&str> = main_version.split('.').collect();
    if parts.len() < 2 || parts.len() > 3 {
        return false;
    }

    parts
        .iter()
        .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_full_project_config() {
        let toml = r#"
[language]
group = "acme"
id = "foo"
version = "1.0.0"
name = "Foo"
format = "files"
pardoned-languages = ["Stratego"]

[dependencies]
compile = ["org.example:sdf3:2.5.0"]
source = ["org.example:meta.lib:2.5.0"]
java = ["org.example:runtime:1.0.0"]

[[contributions]]
name = "Foo"
id = "acme:foo:1.0.0"

[layout]
examples = "demo"
"#;
        let config = ProjectConfig::parse(toml, "lspec.toml").unwrap();

        assert_eq!(config.language.name.as_deref(), Some("Foo"));
        assert_eq!(config.language.format, Some(OutputFormat::Files));
        assert_eq!(config.language.pardoned_languages, vec!["Stratego"]);
        assert_eq!(
            config.dependencies.compile,
            vec![LanguageIdentifier::new("org.example", "sdf3", "2.5.0")]
        );
        assert_eq!(config.contributions.len(), 1);
        assert_eq!(config.layout.examples, Some(PathBuf::from("demo")));
        assert_eq!(
            config.identifier(),
            Some(LanguageIdentifier::new("acme", "foo", "1.0.0"))
        );
        assert_eq!(config.source(), Some(Path::new("lspec.toml")));
    }

    #[test]
    fn test_parse_empty_config_is_allowed() {
        let config = ProjectConfig::parse("", "lspec.toml").unwrap();
        assert_eq!(config.identifier(), None);
        assert!(config.dependencies.is_empty());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let toml = r#"
[language]
id = "foo"
colour = "blue"
"#;
        let result = ProjectConfig::parse(toml, "lspec.toml");
        assert!(matches!(result, Err(ConfigError::TomlParseError { .. })));
    }

    #[test]
    fn test_malformed_dependency_rejected() {
        let toml = r#"
[dependencies]
compile = ["not-an-identifier"]
"#;
        assert!(ProjectConfig::parse(toml, "lspec.toml").is_err());
    }

    #[test]
    fn test_output_format_from_str() {
        assert_eq!("jar".parse::<OutputFormat>().unwrap(), OutputFormat::Jar);
        assert_eq!("FILES".parse::<OutputFormat>().unwrap(), OutputFormat::Files);
        assert!("zip".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_version_validation() {
        assert!(is_valid_version("1.0"));
        assert!(is_valid_version("1.0.0"));
        assert!(is_valid_version("2.6.0-SNAPSHOT"));
        assert!(is_valid_version("1.0.0+build.5"));
        assert!(!is_valid_version(""));
        assert!(!is_valid_version("1"));
        assert!(!is_valid_version("1.x.0"));
        assert!(!is_valid_version("1.0.0.0"));
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let result = ProjectConfig::load_from_file(Path::new("/nonexistent/lspec.toml"));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }
}

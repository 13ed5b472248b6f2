//! Language identifiers, project identity and dependency sets

use crate::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifies a compiled language artifact
///
/// Textual form is `group:id:version`. Equality is structural.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LanguageIdentifier {
    pub group: String,
    pub id: String,
    pub version: String,
}

impl LanguageIdentifier {
    /// Create a new identifier
    pub fn new(group: impl Into<String>, id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            id: id.into(),
            version: version.into(),
        }
    }

    /// Parse from `group:id:version`
    pub fn parse(s: &str) -> ConfigResult<Self> {
        let parts: Vec<&str> = s.trim().split(':').collect();
        match parts.as_slice() {
            [group, id, version]
                if !group.is_empty() && !id.is_empty() && !version.is_empty() =>
            {
                Ok(Self::new(*group, *id, *version))
            }
            _ => Err(ConfigError::InvalidIdentifier(s.to_string())),
        }
    }
}

impl fmt::Display for LanguageIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.group, self.id, self.version)
    }
}

impl FromStr for LanguageIdentifier {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for LanguageIdentifier {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<LanguageIdentifier> for String {
    fn from(value: LanguageIdentifier) -> Self {
        value.to_string()
    }
}

/// Project identity as known to the build host
///
/// Every field may be unspecified, in which case the configuration file
/// value applies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectIdentity {
    pub group: Option<String>,
    pub name: Option<String>,
    pub version: Option<String>,
}

impl ProjectIdentity {
    /// Create a fully specified identity
    pub fn new(group: impl Into<String>, name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            group: Some(group.into()),
            name: Some(name.into()),
            version: Some(version.into()),
        }
    }

    /// Whether no field is specified
    pub fn is_unspecified(&self) -> bool {
        self.group.is_none() && self.name.is_none() && self.version.is_none()
    }
}

/// Which dependency set an identifier belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyKind {
    /// Compiled language needed at build time
    Compile,
    /// Language whose sources are made available to the build
    Source,
    /// Ordinary platform library
    Java,
}

impl DependencyKind {
    /// All kinds in set order
    pub fn all() -> [DependencyKind; 3] {
        [Self::Compile, Self::Source, Self::Java]
    }

    /// Get kind name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Compile => "compile",
            Self::Source => "source",
            Self::Java => "java",
        }
    }
}

impl fmt::Display for DependencyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Three ordered dependency sequences
///
/// Order is significant (search order). An identifier may appear in more
/// than one set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencySet {
    #[serde(default)]
    pub compile: Vec<LanguageIdentifier>,
    #[serde(default)]
    pub source: Vec<LanguageIdentifier>,
    #[serde(default)]
    pub java: Vec<LanguageIdentifier>,
}

impl DependencySet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the sequence for a kind
    pub fn get(&self, kind: DependencyKind) -> &[LanguageIdentifier] {
        match kind {
            DependencyKind::Compile => &self.compile,
            DependencyKind::Source => &self.source,
            DependencyKind::Java => &self.java,
        }
    }

    /// Get the sequence for a kind, mutably
    pub fn get_mut(&mut self, kind: DependencyKind) -> &mut Vec<LanguageIdentifier> {
        match kind {
            DependencyKind::Compile => &mut self.compile,
            DependencyKind::Source => &mut self.source,
            DependencyKind::Java => &mut self.java,
        }
    }

    /// Append an identifier, keeping the first occurrence within a set
    pub fn push(&mut self, kind: DependencyKind, identifier: LanguageIdentifier) {
        let list = self.get_mut(kind);
        if !list.contains(&identifier) {
            list.push(identifier);
        }
    }

    /// Check if all three sets are empty
    pub fn is_empty(&self) -> bool {
        self.compile.is_empty() && self.source.is_empty() && self.java.is_empty()
    }

    /// Total number of entries across the three sets
    pub fn len(&self) -> usize {
        self.compile.len() + self.source.len() + self.java.len()
    }
}

//! Configuration overlay
//!
//! Resolves the file record plus an ordered list of sparse [`ConfigOverride`]
//! patches into a validated, immutable [`EffectiveConfig`]. Within each patch
//! the fields apply in a fixed order: identity, then format, then dependency
//! sets. The base record is never mutated.

use crate::identity::{DependencyKind, DependencySet, LanguageIdentifier, ProjectIdentity};
use crate::project::{is_valid_version, Contribution, LayoutConfig, OutputFormat, ProjectConfig};
use crate::{ConfigError, ConfigResult};
use serde::Serialize;
use std::collections::HashSet;
use std::env;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Sparse patch over the file configuration
///
/// Only non-empty fields are applied: an empty string never clears an
/// identity field and an empty list never clears a dependency set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConfigOverride {
    pub group: Option<String>,
    pub id: Option<String>,
    pub version: Option<String>,
    pub format: Option<OutputFormat>,
    pub compile: Option<Vec<LanguageIdentifier>>,
    pub source: Option<Vec<LanguageIdentifier>>,
    pub java: Option<Vec<LanguageIdentifier>>,
}

impl ConfigOverride {
    /// Create an empty override
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = Some(format);
        self
    }

    /// Replace one dependency set
    pub fn with_dependencies(mut self, kind: DependencyKind, deps: Vec<LanguageIdentifier>) -> Self {
        *self.slot_mut(kind) = Some(deps);
        self
    }

    /// Override built from the host's project identity
    pub fn from_identity(identity: &ProjectIdentity) -> Self {
        Self {
            group: identity.group.clone(),
            id: identity.name.clone(),
            version: identity.version.clone(),
            ..Self::default()
        }
    }

    /// Override read from `LSPEC_GROUP`, `LSPEC_ID`, `LSPEC_VERSION` and `LSPEC_FORMAT`
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Like [`ConfigOverride::from_env`], reading variables through `lookup`
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ConfigResult<Self> {
        let format = match lookup("LSPEC_FORMAT") {
            Some(value) if !value.trim().is_empty() => Some(value.parse::<OutputFormat>()?),
            _ => None,
        };

        Ok(Self {
            group: lookup("LSPEC_GROUP"),
            id: lookup("LSPEC_ID"),
            version: lookup("LSPEC_VERSION"),
            format,
            ..Self::default()
        })
    }

    /// Whether applying this override changes nothing
    pub fn is_empty(&self) -> bool {
        non_empty(&self.group).is_none()
            && non_empty(&self.id).is_none()
            && non_empty(&self.version).is_none()
            && self.format.is_none()
            && DependencyKind::all()
                .iter()
                .all(|kind| non_empty_list(self.slot(*kind)).is_none())
    }

    /// Combine with a later override; `later`'s non-empty fields win
    ///
    /// Applying `[a, b]` gives the same result as applying `[a.merge(&b)]`.
    pub fn merge(&self, later: &ConfigOverride) -> ConfigOverride {
        fn pick(earlier: &Option<String>, later: &Option<String>) -> Option<String> {
            non_empty(later).or(non_empty(earlier)).map(str::to_string)
        }

        let mut merged = ConfigOverride {
            group: pick(&self.group, &later.group),
            id: pick(&self.id, &later.id),
            version: pick(&self.version, &later.version),
            format: later.format.or(self.format),
            ..ConfigOverride::default()
        };
        for kind in DependencyKind::all() {
            *merged.slot_mut(kind) = non_empty_list(later.slot(kind))
                .or(non_empty_list(self.slot(kind)))
                .map(<[LanguageIdentifier]>::to_vec);
        }
        merged
    }

    fn slot(&self, kind: DependencyKind) -> &Option<Vec<LanguageIdentifier>> {
        match kind {
            DependencyKind::Compile => &self.compile,
            DependencyKind::Source => &self.source,
            DependencyKind::Java => &self.java,
        }
    }

    fn slot_mut(&mut self, kind: DependencyKind) -> &mut Option<Vec<LanguageIdentifier>> {
        match kind {
            DependencyKind::Compile => &mut self.compile,
            DependencyKind::Source => &mut self.source,
            DependencyKind::Java => &mut self.java,
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn non_empty_list(value: &Option<Vec<LanguageIdentifier>>) -> Option<&[LanguageIdentifier]> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// Resolved directory layout, relative to the project root
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Layout {
    pub source: PathBuf,
    pub generated: PathBuf,
    pub examples: PathBuf,
    pub tests: PathBuf,
    pub target: PathBuf,
}

impl Layout {
    /// Layout declared in the file, with defaults for missing entries
    ///
    /// Absolute paths fall back to the default; [`apply`] reports them.
    pub fn resolve(declared: &LayoutConfig) -> Self {
        resolve_layout(declared, &mut Vec::new())
    }
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            source: PathBuf::from("src"),
            generated: PathBuf::from("src-gen"),
            examples: PathBuf::from("example"),
            tests: PathBuf::from("test"),
            target: PathBuf::from("target"),
        }
    }
}

/// Validated configuration after overlay
///
/// Only obtainable through [`apply`], so every consumer observes overlaid
/// values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EffectiveConfig {
    identifier: LanguageIdentifier,
    name: String,
    format: OutputFormat,
    dependencies: DependencySet,
    pardoned_languages: Vec<String>,
    contributions: Vec<Contribution>,
    layout: Layout,
    source: PathBuf,
}

impl EffectiveConfig {
    pub fn identifier(&self) -> &LanguageIdentifier {
        &self.identifier
    }

    /// Display name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn dependencies(&self) -> &DependencySet {
        &self.dependencies
    }

    pub fn pardoned_languages(&self) -> &[String] {
        &self.pardoned_languages
    }

    /// Whether errors reported for `language` are tolerated
    pub fn is_pardoned(&self, language: &str) -> bool {
        self.pardoned_languages.iter().any(|l| l == language)
    }

    pub fn contributions(&self) -> &[Contribution] {
        &self.contributions
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Configuration file the base record came from
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Replace all three dependency sets with resolved ones
    ///
    /// Unlike an override layer, an empty resolved set clears the declared
    /// one.
    pub fn with_resolved_dependencies(mut self, dependencies: DependencySet) -> Self {
        self.dependencies = dependencies;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Slot {
    /// Points at the project's own identifier, whatever it resolves to
    SelfRef,
    Id(LanguageIdentifier),
}

struct Draft {
    group: Option<String>,
    id: Option<String>,
    version: Option<String>,
    format: Option<OutputFormat>,
    compile: Vec<Slot>,
    source: Vec<Slot>,
    java: Vec<Slot>,
    contributions: Vec<(String, Slot)>,
}

impl Draft {
    fn from_base(base: &ProjectConfig) -> Self {
        let own = base.identifier();
        let slot = |id: &LanguageIdentifier| match &own {
            Some(own) if own == id => Slot::SelfRef,
            _ => Slot::Id(id.clone()),
        };
        let slots = |list: &[LanguageIdentifier]| list.iter().map(slot).collect::<Vec<_>>();

        Self {
            group: base.language.group.clone(),
            id: base.language.id.clone(),
            version: base.language.version.clone(),
            format: base.language.format,
            compile: slots(&base.dependencies.compile),
            source: slots(&base.dependencies.source),
            java: slots(&base.dependencies.java),
            contributions: base
                .contributions
                .iter()
                .map(|c| (c.name.clone(), slot(&c.id)))
                .collect(),
        }
    }

    fn apply(&mut self, patch: &ConfigOverride) {
        // identity
        if let Some(group) = non_empty(&patch.group) {
            self.group = Some(group.to_string());
        }
        if let Some(id) = non_empty(&patch.id) {
            self.id = Some(id.to_string());
        }
        if let Some(version) = non_empty(&patch.version) {
            self.version = Some(version.to_string());
        }

        // format
        if let Some(format) = patch.format {
            self.format = Some(format);
        }

        // dependency sets, replaced whole
        for kind in DependencyKind::all() {
            if let Some(list) = non_empty_list(patch.slot(kind)) {
                *self.slots_mut(kind) = list.iter().cloned().map(Slot::Id).collect();
            }
        }
    }

    fn slots_mut(&mut self, kind: DependencyKind) -> &mut Vec<Slot> {
        match kind {
            DependencyKind::Compile => &mut self.compile,
            DependencyKind::Source => &mut self.source,
            DependencyKind::Java => &mut self.java,
        }
    }

    fn slots(&self, kind: DependencyKind) -> &[Slot] {
        match kind {
            DependencyKind::Compile => &self.compile,
            DependencyKind::Source => &self.source,
            DependencyKind::Java => &self.java,
        }
    }
}

/// Apply `overrides` in order on top of `base` and validate the result
pub fn apply(base: &ProjectConfig, overrides: &[ConfigOverride]) -> ConfigResult<EffectiveConfig> {
    let mut draft = Draft::from_base(base);
    for patch in overrides {
        draft.apply(patch);
    }

    let locator = base.source_locator();
    let effective = finish(base, draft, &locator)?;
    debug!(
        language = %effective.identifier,
        overrides = overrides.len(),
        "resolved effective configuration from {}",
        locator.display()
    );
    Ok(effective)
}

fn finish(base: &ProjectConfig, draft: Draft, locator: &Path) -> ConfigResult<EffectiveConfig> {
    let mut problems = Vec::new();

    let group = required(&draft.group, "language.group", &mut problems);
    let id = required(&draft.id, "language.id", &mut problems);
    let version = required(&draft.version, "language.version", &mut problems);

    for (field, value) in [("language.group", group), ("language.id", id)] {
        if let Some(value) = value {
            if value.contains(':') || value.chars().any(char::is_whitespace) {
                problems.push(format!("{} '{}' must not contain ':' or whitespace", field, value));
            }
        }
    }
    if let Some(version) = version {
        if !is_valid_version(version) {
            problems.push(format!("language.version '{}' is not a valid version", version));
        }
    }

    for language in &base.language.pardoned_languages {
        if language.trim().is_empty() {
            problems.push("language.pardoned-languages contains an empty name".to_string());
        }
    }

    let mut seen = HashSet::new();
    for (name, _) in &draft.contributions {
        if name.trim().is_empty() {
            problems.push("contribution name cannot be empty".to_string());
        } else if !seen.insert(name.as_str()) {
            problems.push(format!("contribution '{}' declared more than once", name));
        }
    }

    let layout = resolve_layout(&base.layout, &mut problems);

    let identifier = match (group, id, version) {
        (Some(g), Some(i), Some(v)) if problems.is_empty() => LanguageIdentifier::new(g, i, v),
        _ => return Err(ConfigError::validation(locator, problems.join("; "))),
    };

    let resolve = |slot: &Slot| match slot {
        Slot::SelfRef => identifier.clone(),
        Slot::Id(id) => id.clone(),
    };

    let mut dependencies = DependencySet::new();
    for kind in DependencyKind::all() {
        *dependencies.get_mut(kind) = draft.slots(kind).iter().map(resolve).collect();
    }

    let contributions = draft
        .contributions
        .iter()
        .map(|(name, slot)| Contribution::new(name, resolve(slot)))
        .collect();

    let name = base
        .language
        .name
        .clone()
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| identifier.id.clone());

    Ok(EffectiveConfig {
        name,
        format: draft.format.unwrap_or_default(),
        dependencies,
        pardoned_languages: base.language.pardoned_languages.clone(),
        contributions,
        layout,
        source: locator.to_path_buf(),
        identifier,
    })
}

fn required<'a>(value: &'a Option<String>, field: &str, problems: &mut Vec<String>) -> Option<&'a str> {
    let value = non_empty(value);
    if value.is_none() {
        problems.push(format!(
            "missing required field '{}' (not declared in the file and not overridden)",
            field
        ));
    }
    value
}

fn resolve_layout(layout: &LayoutConfig, problems: &mut Vec<String>) -> Layout {
    let defaults = Layout::default();
    let mut pick = |value: &Option<PathBuf>, default: PathBuf, field: &str| -> PathBuf {
        match value {
            Some(path) if path.is_absolute() => {
                problems.push(format!("layout.{} must be relative to the project root", field));
                default
            }
            Some(path) => path.clone(),
            None => default,
        }
    };

    Layout {
        source: pick(&layout.source, defaults.source, "source"),
        generated: pick(&layout.generated, defaults.generated, "generated"),
        examples: pick(&layout.examples, defaults.examples, "examples"),
        tests: pick(&layout.tests, defaults.tests, "tests"),
        target: pick(&layout.target, defaults.target, "target"),
    }
}

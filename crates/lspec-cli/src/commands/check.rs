//! Check command - validate the effective configuration without building

use super::{load_project, OverrideArgs};
use anyhow::{Context, Result};
use lspec_build::{DependencyClassifier, DependencyRequest, DependencyResolver, LocalRepository};
use lspec_config::{DependencyKind, EffectiveConfig};
use serde_json::json;
use std::path::Path;

/// Resolve and print the effective configuration of the project in `dir`
pub fn run(dir: &Path, overrides: &OverrideArgs, repository: Option<&Path>, json: bool) -> Result<()> {
    let config = load_project(dir)?;
    let layers = overrides.layers()?;
    let mut effective = config
        .effective(&layers)
        .with_context(|| format!("Invalid configuration in {}", config.config_path().display()))?;

    let mut archives = Vec::new();
    if let Some(repository) = repository {
        let resolver = LocalRepository::new(repository);
        let artifacts = resolver.resolve(&DependencyRequest::from_set(effective.dependencies()))?;
        let classification = DependencyClassifier::classify(&artifacts)?;

        effective = effective.with_resolved_dependencies(classification.dependencies);
        archives = classification.language_archives;
    }

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "language": effective.identifier().to_string(),
                "name": effective.name(),
                "format": effective.format().name(),
                "dependencies": effective.dependencies(),
                "pardoned_languages": effective.pardoned_languages(),
                "language_archives": archives
                    .iter()
                    .map(|(_, path)| path.display().to_string())
                    .collect::<Vec<_>>(),
            }))?
        );
    } else {
        print_summary(&effective);
        for (identifier, path) in &archives {
            println!("  loads {} from {}", identifier, path.display());
        }
    }
    Ok(())
}

fn print_summary(effective: &EffectiveConfig) {
    println!("{} ({})", effective.identifier(), effective.name());
    println!("  format: {}", effective.format());
    for kind in DependencyKind::all() {
        let deps = effective.dependencies().get(kind);
        if !deps.is_empty() {
            let list: Vec<String> = deps.iter().map(ToString::to_string).collect();
            println!("  {} dependencies: {}", kind, list.join(", "));
        }
    }
    if !effective.pardoned_languages().is_empty() {
        println!("  pardoned: {}", effective.pardoned_languages().join(", "));
    }
}

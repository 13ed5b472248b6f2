//! Graph command - show stage order with declared inputs and outputs

use super::load_project;
use anyhow::{Context, Result};
use lspec_build::fingerprint::FileSpec;
use lspec_build::{standard_graph, FileSet};
use lspec_config::Layout;
use serde_json::json;
use std::path::Path;

pub fn run(dir: &Path, json: bool) -> Result<()> {
    let config = load_project(dir)?;
    let layout = Layout::resolve(&config.project.layout);
    let graph = standard_graph(&layout).context("Invalid stage graph")?;
    let order = graph.compute_order()?;

    let mut stages = Vec::with_capacity(order.len());
    for (position, name) in order.iter().enumerate() {
        let Some(stage) = graph.get_stage(name) else {
            continue;
        };
        if json {
            stages.push(json!({
                "name": stage.name,
                "after": stage.predecessors,
                "inputs": describe(&stage.inputs),
                "outputs": describe(&stage.outputs),
            }));
        } else {
            println!("{}. {}", position + 1, stage.name);
            if !stage.predecessors.is_empty() {
                println!("     after:   {}", stage.predecessors.join(", "));
            }
            println!("     inputs:  {}", list(&stage.inputs));
            println!("     outputs: {}", list(&stage.outputs));
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&stages)?);
    }
    Ok(())
}

fn list(set: &FileSet) -> String {
    if set.is_empty() {
        "-".to_string()
    } else {
        describe(set).join(", ")
    }
}

fn describe(set: &FileSet) -> Vec<String> {
    set.specs()
        .iter()
        .map(|spec| match spec {
            FileSpec::Path(path) => path.display().to_string(),
            FileSpec::Matching { dir, extension } => format!("{}/**/*.{}", dir.display(), extension),
            FileSpec::Tree { exclude } => {
                let excluded: Vec<String> = exclude.iter().map(|p| p.display().to_string()).collect();
                format!("**/* except {}", excluded.join(", "))
            }
        })
        .collect()
}

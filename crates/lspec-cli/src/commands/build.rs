//! Build command - run the stage pipeline of one or more projects

use super::{load_project, report, HostArgs, OverrideArgs};
use anyhow::{bail, Result};
use lspec_build::{FingerprintPolicy, PipelineOptions, Workspace};
use std::path::PathBuf;
use tracing::info;

/// Build command arguments
pub struct BuildArgs {
    pub dirs: Vec<PathBuf>,
    pub overrides: OverrideArgs,
    pub host: HostArgs,
    pub conservative: bool,
    pub no_tests: bool,
    pub no_examples: bool,
    pub force: bool,
    pub json: bool,
}

impl BuildArgs {
    fn options(&self) -> PipelineOptions {
        let policy = if self.conservative {
            FingerprintPolicy::Conservative
        } else {
            FingerprintPolicy::Approximate
        };
        let options = PipelineOptions::default()
            .with_policy(policy)
            .with_force(self.force);
        options.run_tests.set(!self.no_tests);
        options.build_examples.set(!self.no_examples);
        options
    }
}

/// Run the build command
pub fn run(args: BuildArgs) -> Result<()> {
    let overrides = args.overrides.layers()?;
    let mut workspace = Workspace::new(args.host.session()?, args.options());

    for dir in &args.dirs {
        let config = load_project(dir)?;
        workspace.add_project(config, overrides.clone());
    }
    info!(projects = workspace.len(), "starting build");

    let outcome = workspace.run();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report::to_json(&outcome))?);
    } else {
        report::print(&outcome);
    }

    if let Some(failure) = outcome.primary_failure() {
        bail!("Build failed: {}", failure);
    }
    Ok(())
}

//! Multi-project builds
//!
//! Projects run their pipelines concurrently, each with its own context and
//! engine. They share the session's run-once table, keyed per project. A
//! failure to start the compiler stops every project; any other failure only
//! stops the failing project's dependent stages.

use crate::context::BuildSession;
use crate::error::BuildError;
use crate::pipeline::{AbortSignal, Pipeline, PipelineOptions, PipelineReport};
use crate::once::ScopeKey;
use lspec_config::{Config, ConfigOverride, Layout};
use rayon::prelude::*;
use std::collections::HashSet;
use tracing::{info, warn};

struct Member {
    config: Config,
    overrides: Vec<ConfigOverride>,
}

/// A set of projects built together
pub struct Workspace {
    session: BuildSession,
    options: PipelineOptions,
    members: Vec<Member>,
    scopes: HashSet<ScopeKey>,
}

impl Workspace {
    pub fn new(session: BuildSession, options: PipelineOptions) -> Self {
        Self {
            session,
            options,
            members: Vec::new(),
            scopes: HashSet::new(),
        }
    }

    /// Add a project; a project already present is ignored
    pub fn add_project(&mut self, config: Config, overrides: Vec<ConfigOverride>) -> bool {
        let scope = ScopeKey::for_project(config.project_root());
        if !self.scopes.insert(scope) {
            warn!("{} listed twice, building it once", config.project_root().display());
            return false;
        }
        self.members.push(Member { config, overrides });
        true
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Build every project and end the session
    pub fn run(&self) -> WorkspaceReport {
        let abort = AbortSignal::new();
        info!(projects = self.members.len(), "building workspace");

        let reports = self
            .members
            .par_iter()
            .map(|member| {
                let mut ctx = self.session.project(member.config.clone(), member.overrides.clone());
                let layout = Layout::resolve(&member.config.project.layout);
                let report = match Pipeline::standard(&layout, self.options.clone()) {
                    Ok(pipeline) => pipeline.run_with_abort(&mut ctx, &abort),
                    Err(e) => PipelineReport {
                        project: ctx.display_name(),
                        outcomes: Vec::new(),
                        failure: Some(e),
                    },
                };
                ctx.close();
                report
            })
            .collect();

        self.session.finish();
        WorkspaceReport {
            reports,
            aborted_by: abort.origin(),
        }
    }
}

/// Reports of every project, in the order they were added
#[derive(Debug)]
pub struct WorkspaceReport {
    pub reports: Vec<PipelineReport>,
    /// Set when a failure stopped the whole invocation
    pub aborted_by: Option<String>,
}

impl WorkspaceReport {
    pub fn succeeded(&self) -> bool {
        self.aborted_by.is_none() && self.reports.iter().all(PipelineReport::succeeded)
    }

    /// First failure across projects
    pub fn primary_failure(&self) -> Option<&BuildError> {
        self.reports.iter().find_map(PipelineReport::primary_failure)
    }

    pub fn report_for(&self, project: &str) -> Option<&PipelineReport> {
        self.reports.iter().find(|r| r.project == project)
    }
}

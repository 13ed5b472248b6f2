//! Pipeline execution
//!
//! Stages run sequentially in topological order. Before a stage runs, its
//! fingerprints are compared with the record of its last successful run; a
//! match with every declared output present skips it. A failed stage blocks
//! every stage that depends on it, and those are reported as not executed.

use crate::context::ProjectContext;
use crate::error::{BuildError, BuildResult};
use crate::fingerprint::{FileSet, FingerprintPolicy, FingerprintStore, StageRecord};
use crate::graph::{StageGraph, StageNode};
use crate::stages::standard_graph;
use lspec_config::Layout;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Directories never fingerprinted under the conservative policy, besides
/// the layout's target and generated directories
pub const CONSERVATIVE_EXCLUDES: [&str; 1] = [".git"];

/// A boolean read when a stage is reached rather than when the pipeline is
/// built
#[derive(Debug, Clone)]
pub struct Switch(Arc<AtomicBool>);

impl Switch {
    pub fn new(value: bool) -> Self {
        Self(Arc::new(AtomicBool::new(value)))
    }

    pub fn set(&self, value: bool) {
        self.0.store(value, Ordering::SeqCst);
    }

    pub fn get(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl Default for Switch {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Pipeline options
#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    pub policy: FingerprintPolicy,
    /// Gates the test stage
    pub run_tests: Switch,
    /// Gates the build-examples stage
    pub build_examples: Switch,
    /// Ignore recorded fingerprints
    pub force: bool,
}

impl PipelineOptions {
    pub fn with_policy(mut self, policy: FingerprintPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

/// Why a stage was skipped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    UpToDate,
    Disabled,
}

/// State of a stage after a pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageState {
    Pending,
    Skipped(SkipReason),
    Succeeded,
    Failed(String),
    /// Blocked by the failure of `blocked_by`
    NotExecuted { blocked_by: String },
}

impl StageState {
    /// Whether dependents may run
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Skipped(_) | Self::Succeeded)
    }

    /// The failure that blocks dependents of a stage in this state
    fn blocker(&self, stage: &str) -> Option<String> {
        match self {
            Self::Failed(_) => Some(stage.to_string()),
            Self::NotExecuted { blocked_by } => Some(blocked_by.clone()),
            _ => None,
        }
    }
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Skipped(SkipReason::UpToDate) => write!(f, "up to date"),
            Self::Skipped(SkipReason::Disabled) => write!(f, "disabled"),
            Self::Succeeded => write!(f, "ok"),
            Self::Failed(message) => write!(f, "FAILED: {}", message),
            Self::NotExecuted { blocked_by } => write!(f, "not executed ({} failed)", blocked_by),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageOutcome {
    pub name: String,
    pub state: StageState,
    pub duration: Duration,
}

/// Result of running one project's pipeline
#[derive(Debug)]
pub struct PipelineReport {
    pub project: String,
    pub outcomes: Vec<StageOutcome>,
    /// First failure in topological order
    pub failure: Option<BuildError>,
}

impl PipelineReport {
    fn failed(project: String, error: BuildError) -> Self {
        Self {
            project,
            outcomes: Vec::new(),
            failure: Some(error),
        }
    }

    pub fn state_of(&self, stage: &str) -> Option<&StageState> {
        self.outcomes.iter().find(|o| o.name == stage).map(|o| &o.state)
    }

    /// Whether no stage failed and no stage was cut off by an abort
    pub fn succeeded(&self) -> bool {
        self.failure.is_none() && self.blocked_by().is_none()
    }

    /// Blocker of the first stage that did not run
    pub fn blocked_by(&self) -> Option<&str> {
        self.outcomes.iter().find_map(|o| match &o.state {
            StageState::NotExecuted { blocked_by } => Some(blocked_by.as_str()),
            _ => None,
        })
    }

    pub fn primary_failure(&self) -> Option<&BuildError> {
        self.failure.as_ref()
    }

    /// Names of the stages whose work ran
    pub fn executed(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.state, StageState::Succeeded | StageState::Failed(_)))
            .map(|o| o.name.as_str())
            .collect()
    }

    pub fn count(&self, predicate: impl Fn(&StageState) -> bool) -> usize {
        self.outcomes.iter().filter(|o| predicate(&o.state)).count()
    }

    pub fn into_result(mut self) -> BuildResult<Self> {
        if let Some(error) = self.failure.take() {
            return Err(error);
        }
        match self.blocked_by() {
            Some(origin) => Err(BuildError::Aborted(format!("stopped by {}", origin))),
            None => Ok(self),
        }
    }
}

/// Invocation-wide abort flag
///
/// Set when a failure must stop every project, such as the compiler engine
/// failing to start.
#[derive(Debug, Default)]
pub struct AbortSignal {
    triggered: AtomicBool,
    origin: Mutex<Option<String>>,
}

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trigger the abort; the first origin wins
    pub fn trigger(&self, origin: impl Into<String>) {
        let mut current = self.origin.lock().unwrap_or_else(PoisonError::into_inner);
        if current.is_none() {
            *current = Some(origin.into());
        }
        self.triggered.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    pub fn origin(&self) -> Option<String> {
        self.origin
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Runs a stage graph against a project
#[derive(Debug)]
pub struct Pipeline {
    graph: StageGraph,
    options: PipelineOptions,
}

impl Pipeline {
    pub fn new(graph: StageGraph, options: PipelineOptions) -> Self {
        Self { graph, options }
    }

    /// The standard stages for `layout`
    pub fn standard(layout: &Layout, options: PipelineOptions) -> BuildResult<Self> {
        Ok(Self::new(standard_graph(layout)?, options))
    }

    pub fn graph(&self) -> &StageGraph {
        &self.graph
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Run every stage of the graph
    pub fn run(&self, ctx: &mut ProjectContext) -> PipelineReport {
        self.run_with_abort(ctx, &AbortSignal::new())
    }

    /// Run every stage, stopping when `abort` is triggered
    pub fn run_with_abort(&self, ctx: &mut ProjectContext, abort: &AbortSignal) -> PipelineReport {
        let project = ctx.display_name();

        let order = match self.graph.compute_order() {
            Ok(order) => order,
            Err(e) => return PipelineReport::failed(project, e),
        };
        let mut store = match FingerprintStore::open(&ctx.paths().fingerprint_store, self.options.policy) {
            Ok(store) => store,
            Err(e) => return PipelineReport::failed(project, e),
        };
        let conservative = conservative_inputs(&ctx.paths().layout);

        info!(project = %project, policy = self.options.policy.name(), "running {} stages", order.len());

        let mut states: HashMap<String, StageState> = HashMap::new();
        let mut outcomes = Vec::with_capacity(order.len());
        let mut failure = None;

        for name in order {
            let Some(stage) = self.graph.get_stage(&name) else {
                continue;
            };
            let start = Instant::now();

            let blocked_by = stage
                .predecessors
                .iter()
                .filter_map(|p| states.get(p).and_then(|s| s.blocker(p)))
                .next();

            let state = if let Some(blocked_by) = blocked_by {
                StageState::NotExecuted { blocked_by }
            } else if abort.is_triggered() {
                StageState::NotExecuted {
                    blocked_by: abort.origin().unwrap_or_else(|| "aborted".to_string()),
                }
            } else if !stage.enabled(&self.options) {
                info!("{}: disabled", name);
                StageState::Skipped(SkipReason::Disabled)
            } else {
                match self.execute(stage, ctx, &mut store, &conservative) {
                    Ok(state) => state,
                    Err(e) => {
                        error!(project = %project, "{} failed: {}", name, e);
                        if e.aborts_invocation() {
                            abort.trigger(format!("{}:{}", ctx.display_name(), name));
                        }
                        let state = StageState::Failed(e.to_string());
                        failure.get_or_insert(e);
                        state
                    }
                }
            };

            if let StageState::NotExecuted { blocked_by } = &state {
                debug!("{}: not executed, blocked by {}", name, blocked_by);
            }
            states.insert(name.clone(), state.clone());
            outcomes.push(StageOutcome {
                name,
                state,
                duration: start.elapsed(),
            });
        }

        PipelineReport {
            project: ctx.display_name(),
            outcomes,
            failure,
        }
    }

    fn execute(
        &self,
        stage: &StageNode,
        ctx: &mut ProjectContext,
        store: &mut FingerprintStore,
        conservative: &FileSet,
    ) -> BuildResult<StageState> {
        let root = ctx.root().to_path_buf();
        let settings = ctx.settings_digest()?;
        let inputs = match self.options.policy {
            FingerprintPolicy::Approximate => &stage.inputs,
            FingerprintPolicy::Conservative => conservative,
        };

        if !self.options.force {
            let current = record(&root, inputs, &stage.outputs, &settings)?;
            if store.is_up_to_date(&stage.name, &current) && stage.outputs.all_exist(&root) {
                info!("{}: up to date", stage.name);
                return Ok(StageState::Skipped(SkipReason::UpToDate));
            }
        }

        store.invalidate(&stage.name)?;
        info!("{}: running", stage.name);
        {
            let mut view = ctx.stage_context()?;
            stage.run(&mut view)?;
        }
        store.record(&stage.name, record(&root, inputs, &stage.outputs, &settings)?)?;
        Ok(StageState::Succeeded)
    }
}

fn record(root: &Path, inputs: &FileSet, outputs: &FileSet, settings: &str) -> BuildResult<StageRecord> {
    Ok(StageRecord {
        inputs: inputs.fingerprint(root)?,
        outputs: outputs.fingerprint(root)?,
        settings: settings.to_string(),
    })
}

/// Whole-tree input set of the conservative policy
pub fn conservative_inputs(layout: &Layout) -> FileSet {
    let mut exclude = vec![layout.target.clone(), layout.generated.clone()];
    exclude.extend(CONSERVATIVE_EXCLUDES.iter().map(PathBuf::from));
    FileSet::tree(exclude)
}

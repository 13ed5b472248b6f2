//! Stage graph and execution order using topological sort
use crate::context::StageContext;
use crate::error::{BuildError, BuildResult};
use crate::fingerprint::FileSet;
use crate::pipeline::PipelineOptions;
use crate::stages::{FnWork, StageWork};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

/// A stage in the pipeline graph
pub struct StageNode {
    /// Stage name
    pub name: String,
    /// Stages that must finish first
    pub predecessors: Vec<String>,
    /// Input allow-list under the approximate policy
    pub inputs: FileSet,
    /// Output locations under the approximate policy
    pub outputs: FileSet,
    /// Delegated unit of work
    work: Box<dyn StageWork>,
}

impl StageNode {
    /// Create a new stage node
    pub fn new(name: impl Into<String>, work: impl StageWork + 'static) -> Self {
        Self {
            name: name.into(),
            predecessors: Vec::new(),
            inputs: FileSet::new(),
            outputs: FileSet::new(),
            work: Box::new(work),
        }
    }

    /// Create a stage whose work is a closure
    pub fn from_fn<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut StageContext<'_>) -> BuildResult<()> + Send + Sync + 'static,
    {
        Self::new(name, FnWork::new(f))
    }

    /// Add predecessors
    pub fn after<I, S>(mut self, predecessors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.predecessors.extend(predecessors.into_iter().map(Into::into));
        self
    }

    /// Set declared inputs
    pub fn with_inputs(mut self, inputs: FileSet) -> Self {
        self.inputs = inputs;
        self
    }

    /// Set declared outputs
    pub fn with_outputs(mut self, outputs: FileSet) -> Self {
        self.outputs = outputs;
        self
    }

    /// Whether the stage's switch allows it to run
    pub fn enabled(&self, options: &PipelineOptions) -> bool {
        self.work.enabled(options)
    }

    /// Run the delegated work
    pub fn run(&self, ctx: &mut StageContext<'_>) -> BuildResult<()> {
        self.work.run(ctx)
    }
}

impl fmt::Debug for StageNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageNode")
            .field("name", &self.name)
            .field("predecessors", &self.predecessors)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .finish_non_exhaustive()
    }
}

/// Stage graph for a project's pipeline
#[derive(Debug, Default)]
pub struct StageGraph {
    /// Stages in insertion order
    stages: Vec<StageNode>,
    /// Stage name to position in `stages`
    index: HashMap<String, usize>,
}

impl StageGraph {
    /// Create a new empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a stage to the graph
    pub fn add_stage(&mut self, stage: StageNode) -> BuildResult<()> {
        if self.index.contains_key(&stage.name) {
            return Err(BuildError::DuplicateStage(stage.name));
        }
        self.index.insert(stage.name.clone(), self.stages.len());
        self.stages.push(stage);
        Ok(())
    }

    /// Get a stage by name
    pub fn get_stage(&self, name: &str) -> Option<&StageNode> {
        self.index.get(name).map(|&i| &self.stages[i])
    }

    /// All stages in insertion order
    pub fn stages(&self) -> impl Iterator<Item = &StageNode> {
        self.stages.iter()
    }

    /// Get stage count
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Check if graph is empty
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Validate the graph
    pub fn validate(&self) -> BuildResult<()> {
        for stage in &self.stages {
            for pred in &stage.predecessors {
                if !self.index.contains_key(pred) {
                    return Err(BuildError::StageNotFound {
                        stage: format!("{} (required by {})", pred, stage.name),
                    });
                }
            }
        }
        Ok(())
    }

    /// Compute execution order using Kahn's algorithm
    ///
    /// Ties are broken by insertion order, so the order is deterministic.
    pub fn compute_order(&self) -> BuildResult<Vec<String>> {
        self.validate()?;

        let mut in_degree: Vec<usize> = self
            .stages
            .iter()
            .map(|s| {
                s.predecessors
                    .iter()
                    .collect::<HashSet<_>>()
                    .len()
            })
            .collect();
        let mut queue: VecDeque<usize> = (0..self.stages.len())
            .filter(|&i| in_degree[i] == 0)
            .collect();
        let mut result = Vec::with_capacity(self.stages.len());

        while let Some(current) = queue.pop_front() {
            let name = &self.stages[current].name;
            result.push(name.clone());

            for (i, stage) in self.stages.iter().enumerate() {
                if stage.predecessors.contains(name) {
                    in_degree[i] -= 1;
                    if in_degree[i] == 0 {
                        queue.push_back(i);
                    }
                }
            }
        }

        if result.len() != self.stages.len() {
            return Err(BuildError::CircularDependency(self.find_cycle()));
        }

        Ok(result)
    }

    /// Every stage that transitively depends on `name`
    pub fn dependents_of(&self, name: &str) -> HashSet<String> {
        let mut found = HashSet::new();
        let mut queue = VecDeque::from([name.to_string()]);

        while let Some(current) = queue.pop_front() {
            for stage in &self.stages {
                if stage.predecessors.contains(&current) && found.insert(stage.name.clone()) {
                    queue.push_back(stage.name.clone());
                }
            }
        }

        found
    }

    /// Find a cycle in the graph (for error reporting)
    fn find_cycle(&self) -> String {
        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();
        let mut path = Vec::new();

        for stage in &self.stages {
            if let Some(cycle) =
                self.dfs_find_cycle(&stage.name, &mut visited, &mut rec_stack, &mut path)
            {
                return cycle;
            }
        }

        "unknown cycle".to_string()
    }

    /// DFS to find a cycle
    fn dfs_find_cycle(
        &self,
        name: &str,
        visited: &mut HashSet<String>,
        rec_stack: &mut HashSet<String>,
        path: &mut Vec<String>,
    ) -> Option<String> {
        if rec_stack.contains(name) {
            path.push(name.to_string());
            if let Some(start) = path.iter().position(|s| s == name) {
                return Some(path[start..].join(" -> "));
            }
            return Some(path.join(" -> "));
        }

        if visited.contains(name) {
            return None;
        }

        visited.insert(name.to_string());
        rec_stack.insert(name.to_string());
        path.push(name.to_string());

        if let Some(stage) = self.get_stage(name) {
            for pred in &stage.predecessors {
                if let Some(cycle) = self.dfs_find_cycle(pred, visited, rec_stack, path) {
                    return Some(cycle);
                }
            }
        }

        rec_stack.remove(name);
        path.pop();
        None
    }
}

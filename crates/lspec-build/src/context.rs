//! Build-scoped project state
//!
//! A [`BuildSession`] lives for one build invocation and owns the run-once
//! table shared by every project. Each project gets a [`ProjectContext`] that
//! carries its scope key, engine handle and overlaid configuration, and hands
//! stages a [`StageContext`] view.
//!
//! The overlay runs once per project and override set; contexts of the same
//! project share its result through the session's [`OverlayCache`]. Language
//! and dialect loading runs once per engine instance, since every context
//! owns its engine.

use crate::artifact::ArchiveArtifact;
use crate::classify::{Classification, DependencyClassifier};
use crate::engine::{Engine, EngineFactory, EngineLifecycle};
use crate::error::{BuildError, BuildResult};
use crate::once::{OnceTable, ScopeKey};
use crate::resolve::{DependencyRequest, DependencyResolver};
use lspec_config::{Config, ConfigOverride, EffectiveConfig, Layout};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

/// Run-once operation names
pub const APPLY_OVERLAY: &str = "apply-config-overlay";
pub const LOAD_LANGUAGES: &str = "load-languages";
pub const LOAD_DIALECTS: &str = "load-dialects";

/// Run-once key of `operation` for one engine instance
pub fn engine_operation(operation: &str, instance: u64) -> String {
    format!("{}#engine-{}", operation, instance)
}

fn not_prepared() -> BuildError {
    BuildError::Aborted("configuration not prepared".to_string())
}

/// Overlay result of one project and override set
#[derive(Debug, Clone)]
struct PreparedConfig {
    effective: EffectiveConfig,
    classification: Classification,
}

type OverlayKey = (ScopeKey, String);

/// Overlay results shared by the contexts of one session
#[derive(Debug, Default)]
pub struct OverlayCache {
    entries: Mutex<HashMap<OverlayKey, PreparedConfig>>,
}

impl OverlayCache {
    fn get(&self, scope: &ScopeKey, operation: &str) -> Option<PreparedConfig> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.get(&(scope.clone(), operation.to_string())).cloned()
    }

    fn insert(&self, scope: &ScopeKey, operation: &str, prepared: PreparedConfig) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert((scope.clone(), operation.to_string()), prepared);
    }

    /// Drop every cached overlay
    pub fn clear(&self) {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Absolute project directories
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectPaths {
    pub root: PathBuf,
    pub layout: Layout,
    pub source: PathBuf,
    pub generated: PathBuf,
    pub examples: PathBuf,
    pub tests: PathBuf,
    pub target: PathBuf,
    pub archive_dir: PathBuf,
    /// Marker written by the test stage
    pub test_result: PathBuf,
    pub fingerprint_store: PathBuf,
}

impl ProjectPaths {
    pub fn new(root: impl Into<PathBuf>, layout: &Layout) -> Self {
        let root = root.into();
        let target = root.join(&layout.target);
        Self {
            source: root.join(&layout.source),
            generated: root.join(&layout.generated),
            examples: root.join(&layout.examples),
            tests: root.join(&layout.tests),
            archive_dir: target.join("archive"),
            test_result: target.join("test-result"),
            fingerprint_store: target.join(".lspec").join("fingerprints.json"),
            target,
            layout: layout.clone(),
            root,
        }
    }
}

/// What a stage's work sees
pub struct StageContext<'a> {
    pub config: &'a EffectiveConfig,
    pub paths: &'a ProjectPaths,
    pub engine: &'a mut dyn Engine,
    archive: &'a mut Option<ArchiveArtifact>,
}

impl<'a> StageContext<'a> {
    pub fn new(
        config: &'a EffectiveConfig,
        paths: &'a ProjectPaths,
        engine: &'a mut dyn Engine,
        archive: &'a mut Option<ArchiveArtifact>,
    ) -> Self {
        Self {
            config,
            paths,
            engine,
            archive,
        }
    }

    /// Publish the archive produced by this build
    pub fn set_archive(&mut self, artifact: ArchiveArtifact) {
        *self.archive = Some(artifact);
    }

    /// The archive to test against
    ///
    /// When the archive stage was skipped, the archive left by the previous
    /// build is loaded into the engine first.
    pub fn archive_artifact(&mut self, stage: &str) -> BuildResult<ArchiveArtifact> {
        if let Some(artifact) = self.archive.as_ref() {
            return Ok(artifact.clone());
        }

        let artifact = ArchiveArtifact::expected(self.config, self.paths, "archive");
        if !artifact.exists() {
            return Err(BuildError::stage(
                stage,
                format!("no archive at {}", artifact.path.display()),
            ));
        }
        self.engine
            .load_language_archive(&artifact.path)
            .map_err(|e| BuildError::stage(stage, e))?;
        *self.archive = Some(artifact.clone());
        Ok(artifact)
    }
}

/// State of one project for the duration of a build
pub struct ProjectContext {
    scope: ScopeKey,
    paths: ProjectPaths,
    config: Config,
    overrides: Vec<ConfigOverride>,
    resolver: Option<Arc<dyn DependencyResolver>>,
    once: Arc<OnceTable>,
    overlays: Arc<OverlayCache>,
    engine: EngineLifecycle,
    effective: Option<EffectiveConfig>,
    classification: Classification,
    archive: Option<ArchiveArtifact>,
}

impl ProjectContext {
    pub fn new(
        config: Config,
        overrides: Vec<ConfigOverride>,
        factory: Arc<dyn EngineFactory>,
        once: Arc<OnceTable>,
        overlays: Arc<OverlayCache>,
    ) -> Self {
        let root = config.project_root().to_path_buf();
        let layout = Layout::resolve(&config.project.layout);
        Self {
            scope: ScopeKey::for_project(&root),
            paths: ProjectPaths::new(&root, &layout),
            engine: EngineLifecycle::new(factory, &root),
            config,
            overrides,
            resolver: None,
            once,
            overlays,
            effective: None,
            classification: Classification::default(),
            archive: None,
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn DependencyResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn scope(&self) -> &ScopeKey {
        &self.scope
    }

    pub fn paths(&self) -> &ProjectPaths {
        &self.paths
    }

    pub fn root(&self) -> &Path {
        &self.paths.root
    }

    /// Effective configuration, once prepared
    pub fn effective(&self) -> Option<&EffectiveConfig> {
        self.effective.as_ref()
    }

    pub fn classification(&self) -> &Classification {
        &self.classification
    }

    pub fn archive(&self) -> Option<&ArchiveArtifact> {
        self.archive.as_ref()
    }

    pub fn engine(&self) -> &EngineLifecycle {
        &self.engine
    }

    /// Human-readable project name for reports
    pub fn display_name(&self) -> String {
        if let Some(config) = &self.effective {
            return config.identifier().to_string();
        }
        if let Some(identifier) = self.config.project.identifier() {
            return identifier.to_string();
        }
        self.paths
            .root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.scope.to_string())
    }

    /// Digest of the override layers, recorded with stage fingerprints
    pub fn settings_digest(&self) -> BuildResult<String> {
        let layers = (&self.config.env, &self.overrides);
        let encoded = serde_json::to_vec(&layers)
            .map_err(|e| BuildError::CacheError(format!("cannot encode override layers: {}", e)))?;
        Ok(format!("{:x}", Sha256::digest(&encoded)))
    }

    /// Run the build-scoped setup every stage depends on
    ///
    /// Applies the configuration overlay, then loads dependency languages and
    /// discovers dialects into this context's engine. Each step runs at most
    /// once per build for its key.
    pub fn prepare(&mut self) -> BuildResult<&EffectiveConfig> {
        if self.effective.is_none() {
            self.apply_overlay()?;
        }

        let instance = self.start_engine()?;
        let once = Arc::clone(&self.once);
        let scope = self.scope.clone();
        once.ensure_once(&scope, &engine_operation(LOAD_LANGUAGES, instance), || {
            self.load_languages()
        })?;
        once.ensure_once(&scope, &engine_operation(LOAD_DIALECTS, instance), || {
            self.load_dialects()
        })?;

        self.effective.as_ref().ok_or_else(not_prepared)
    }

    fn apply_overlay(&mut self) -> BuildResult<()> {
        let operation = format!("{}#{}", APPLY_OVERLAY, self.settings_digest()?);
        let once = Arc::clone(&self.once);
        let overlays = Arc::clone(&self.overlays);

        once.ensure_once(&self.scope, &operation, || {
            self.resolve_overlay()
                .map(|prepared| overlays.insert(&self.scope, &operation, prepared))
        })?;
        let prepared = overlays.get(&self.scope, &operation).ok_or_else(not_prepared)?;

        info!(
            language = %prepared.effective.identifier(),
            format = %prepared.effective.format(),
            "configured {}",
            prepared.effective.name()
        );
        self.effective = Some(prepared.effective);
        self.classification = prepared.classification;
        Ok(())
    }

    fn resolve_overlay(&self) -> BuildResult<PreparedConfig> {
        let declared = self.config.effective(&self.overrides)?;
        let Some(resolver) = &self.resolver else {
            return Ok(PreparedConfig {
                effective: declared,
                classification: Classification::default(),
            });
        };

        let requests = DependencyRequest::from_set(declared.dependencies());
        let artifacts = resolver.resolve(&requests)?;
        let classification = DependencyClassifier::classify(&artifacts)?;
        debug!(
            declared = declared.dependencies().len(),
            kept = classification.dependencies.len(),
            "classified dependencies"
        );
        Ok(PreparedConfig {
            effective: declared.with_resolved_dependencies(classification.dependencies.clone()),
            classification,
        })
    }

    fn start_engine(&mut self) -> BuildResult<u64> {
        let config = self.effective.as_ref().ok_or_else(not_prepared)?;
        self.engine.get(config)?;
        self.engine
            .instance_id()
            .ok_or_else(|| BuildError::Aborted("compiler engine not running".to_string()))
    }

    fn load_languages(&mut self) -> BuildResult<()> {
        let config = self.effective.as_ref().ok_or_else(not_prepared)?;
        let engine = self.engine.get(config)?;

        for (identifier, path) in &self.classification.language_archives {
            debug!(language = %identifier, "loading {}", path.display());
            engine
                .load_language_archive(path)
                .map_err(|e| BuildError::unresolvable(identifier, e.to_string()))?;
        }
        Ok(())
    }

    fn load_dialects(&mut self) -> BuildResult<()> {
        let config = self.effective.as_ref().ok_or_else(not_prepared)?;
        let engine = self.engine.get(config)?;

        let count = engine
            .load_dialects_under(&self.paths.root)
            .map_err(|e| BuildError::stage(LOAD_DIALECTS, e))?;
        debug!(count, "loaded dialects");
        Ok(())
    }

    /// Forget the load markers of the live engine before it goes away
    fn forget_engine_loads(&self) {
        if let Some(instance) = self.engine.instance_id() {
            for operation in [LOAD_LANGUAGES, LOAD_DIALECTS] {
                self.once.forget(&self.scope, &engine_operation(operation, instance));
            }
        }
    }

    /// Prepared view for a stage
    pub fn stage_context(&mut self) -> BuildResult<StageContext<'_>> {
        self.prepare()?;
        let config = self.effective.as_ref().ok_or_else(not_prepared)?;
        let engine = self.engine.get(config)?;
        Ok(StageContext::new(config, &self.paths, engine, &mut self.archive))
    }

    /// Replace the host overrides
    ///
    /// The engine and its load markers are discarded, so the next stage
    /// rebuilds them against the new configuration.
    pub fn reconfigure(&mut self, overrides: Vec<ConfigOverride>) {
        info!(scope = %self.scope, "configuration changed, discarding engine");
        self.overrides = overrides;
        self.forget_engine_loads();
        self.engine.reset();
        self.effective = None;
        self.classification = Classification::default();
        self.archive = None;
    }

    /// Remove build outputs through the engine and drop local build state
    pub fn clean(&mut self) -> BuildResult<()> {
        let mut stage = self.stage_context()?;
        stage
            .engine
            .clean(stage.config)
            .map_err(|e| BuildError::stage("clean", e))?;

        for path in [&self.paths.archive_dir, &self.paths.test_result, &self.paths.fingerprint_store] {
            let removed = if path.is_dir() {
                fs::remove_dir_all(path)
            } else if path.exists() {
                fs::remove_file(path)
            } else {
                continue;
            };
            removed.map_err(|e| BuildError::io(path, e))?;
        }
        self.archive = None;
        Ok(())
    }

    /// Tear down the engine; idempotent
    pub fn close(&mut self) {
        self.forget_engine_loads();
        self.engine.close();
    }
}

impl fmt::Debug for ProjectContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProjectContext")
            .field("scope", &self.scope)
            .field("paths", &self.paths)
            .field("engine", &self.engine)
            .field("prepared", &self.effective.is_some())
            .finish_non_exhaustive()
    }
}

/// One build invocation
pub struct BuildSession {
    once: Arc<OnceTable>,
    overlays: Arc<OverlayCache>,
    factory: Arc<dyn EngineFactory>,
    resolver: Option<Arc<dyn DependencyResolver>>,
}

impl BuildSession {
    pub fn new(factory: Arc<dyn EngineFactory>) -> Self {
        Self {
            once: Arc::new(OnceTable::new()),
            overlays: Arc::new(OverlayCache::default()),
            factory,
            resolver: None,
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn DependencyResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Context for one project of this build
    pub fn project(&self, config: Config, overrides: Vec<ConfigOverride>) -> ProjectContext {
        let context = ProjectContext::new(
            config,
            overrides,
            Arc::clone(&self.factory),
            Arc::clone(&self.once),
            Arc::clone(&self.overlays),
        );
        match &self.resolver {
            Some(resolver) => context.with_resolver(Arc::clone(resolver)),
            None => context,
        }
    }

    pub fn once(&self) -> &Arc<OnceTable> {
        &self.once
    }

    pub fn overlays(&self) -> &Arc<OverlayCache> {
        &self.overlays
    }

    /// End the build invocation
    pub fn finish(&self) {
        self.once.finish();
        self.overlays.clear();
    }
}

impl fmt::Debug for BuildSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildSession")
            .field("once", &self.once)
            .field("has_resolver", &self.resolver.is_some())
            .finish_non_exhaustive()
    }
}

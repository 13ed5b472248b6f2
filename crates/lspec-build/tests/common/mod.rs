//! Shared test utilities
//!
//! A recording engine that writes deterministic outputs into the project,
//! so the incremental cache can be exercised without a real compiler.

#![allow(dead_code)]

use lspec_build::{
    BuildOutput, BuildSession, Engine, EngineError, EngineFactory, EngineMessage, EngineResult,
    TestOutcome,
};
use lspec_config::{Config, ConfigLoader, EffectiveConfig};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub use pretty_assertions::{assert_eq, assert_ne};

pub const FOO_TOML: &str = r#"
[language]
group = "acme"
id = "foo"
version = "1.0.0"
pardoned-languages = ["Stratego"]
"#;

/// How the recording engine misbehaves
#[derive(Debug, Clone, Default)]
pub struct Behaviour {
    pub fail_construction: bool,
    /// Operation name that returns an error
    pub fail_operation: Option<&'static str>,
    /// Messages returned by `build`
    pub messages: Vec<EngineMessage>,
    /// Report an archive path without writing it
    pub skip_archive_write: bool,
    /// Write the archive outside the archive directory
    pub archive_elsewhere: bool,
    pub tests_fail: bool,
}

/// Calls and lifecycle events shared by every engine of a factory
#[derive(Debug, Default)]
pub struct Recorder {
    calls: Mutex<Vec<String>>,
    behaviour: Mutex<Behaviour>,
    pub created: AtomicUsize,
    pub disposed: AtomicUsize,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of calls starting with `prefix`
    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn disposed(&self) -> usize {
        self.disposed.load(Ordering::SeqCst)
    }

    pub fn behave(&self, f: impl FnOnce(&mut Behaviour)) {
        f(&mut self.behaviour.lock().unwrap());
    }

    fn behaviour(&self) -> Behaviour {
        self.behaviour.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

pub struct RecordingFactory(pub Arc<Recorder>);

impl EngineFactory for RecordingFactory {
    fn create(&self, project_root: &Path, _config: &EffectiveConfig) -> EngineResult<Box<dyn Engine>> {
        if self.0.behaviour().fail_construction {
            return Err(EngineError::new("create", "compiler not installed"));
        }
        self.0.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(RecordingEngine {
            root: project_root.to_path_buf(),
            recorder: Arc::clone(&self.0),
        }))
    }
}

pub struct RecordingEngine {
    root: PathBuf,
    recorder: Arc<Recorder>,
}

impl RecordingEngine {
    fn call(&self, operation: &'static str, detail: &str) -> EngineResult<()> {
        let call = if detail.is_empty() {
            operation.to_string()
        } else {
            format!("{} {}", operation, detail)
        };
        self.recorder.record(call);
        if self.recorder.behaviour().fail_operation == Some(operation) {
            return Err(EngineError::new(operation, "injected failure"));
        }
        Ok(())
    }

    fn put(&self, operation: &str, relative: PathBuf, content: &str) -> EngineResult<PathBuf> {
        let path = self.root.join(relative);
        let parent = path.parent().unwrap_or(&self.root).to_path_buf();
        fs::create_dir_all(&parent).map_err(|e| EngineError::new(operation, e))?;
        fs::write(&path, content).map_err(|e| EngineError::new(operation, e))?;
        Ok(path)
    }
}

impl Engine for RecordingEngine {
    fn initialize(&mut self, _config: &EffectiveConfig) -> EngineResult<()> {
        self.call("initialize", "")
    }

    fn generate_sources(&mut self, config: &EffectiveConfig) -> EngineResult<()> {
        self.call("generate-sources", "")?;
        let relative = config.layout().generated.join("parser.gen");
        self.put("generate-sources", relative, "generated").map(drop)
    }

    fn build(&mut self, config: &EffectiveConfig) -> EngineResult<BuildOutput> {
        self.call("build", "")?;
        let relative = config.layout().target.join("build").join("meta.out");
        self.put("build", relative, "built")?;
        Ok(BuildOutput {
            messages: self.recorder.behaviour().messages,
        })
    }

    fn compile(&mut self, config: &EffectiveConfig) -> EngineResult<()> {
        self.call("compile", "")?;
        let relative = config.layout().target.join("classes").join("Main.class");
        self.put("compile", relative, "classes").map(drop)
    }

    fn package(&mut self, config: &EffectiveConfig) -> EngineResult<()> {
        self.call("package", "")?;
        let relative = config.layout().target.join("package").join("bundle");
        self.put("package", relative, "bundle").map(drop)
    }

    fn archive(&mut self, config: &EffectiveConfig) -> EngineResult<PathBuf> {
        self.call("archive", "")?;
        let id = config.identifier();
        let relative = config
            .layout()
            .target
            .join("archive")
            .join(format!("{}-{}.lspec-lang", id.id, id.version));
        if self.recorder.behaviour().skip_archive_write {
            return Ok(self.root.join(relative));
        }
        if self.recorder.behaviour().archive_elsewhere {
            let stray = config.layout().target.join(format!("{}.lspec-lang", id.id));
            return self.put("archive", stray, &id.to_string());
        }
        self.put("archive", relative, &id.to_string())
    }

    fn clean(&mut self, config: &EffectiveConfig) -> EngineResult<()> {
        self.call("clean", "")?;
        for dir in [
            config.layout().generated.clone(),
            config.layout().target.join("build"),
            config.layout().target.join("classes"),
            config.layout().target.join("package"),
        ] {
            let path = self.root.join(dir);
            if path.exists() {
                fs::remove_dir_all(&path).map_err(|e| EngineError::new("clean", e))?;
            }
        }
        Ok(())
    }

    fn load_language_archive(&mut self, archive: &Path) -> EngineResult<()> {
        let name = archive
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.call("load-language", &name)?;
        if !archive.exists() {
            return Err(EngineError::new("load-language", "archive does not exist"));
        }
        Ok(())
    }

    fn load_dialects_under(&mut self, _root: &Path) -> EngineResult<usize> {
        self.call("load-dialects", "")?;
        Ok(0)
    }

    fn build_examples(&mut self, _config: &EffectiveConfig, _archive: &Path) -> EngineResult<()> {
        self.call("build-examples", "")
    }

    fn run_tests(&mut self, _config: &EffectiveConfig, _archive: &Path) -> EngineResult<TestOutcome> {
        self.call("test", "")?;
        if self.recorder.behaviour().tests_fail {
            return Ok(TestOutcome::Failed {
                summary: "2 of 5 tests failed".to_string(),
            });
        }
        Ok(TestOutcome::Passed)
    }

    fn dispose(&mut self) {
        self.recorder.disposed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Write `lspec.toml` plus a source file into a fresh directory
pub fn project_dir(toml: &str) -> TempDir {
    let temp = TempDir::new().unwrap();
    write_project(temp.path(), toml);
    temp
}

pub fn write_project(root: &Path, toml: &str) {
    fs::create_dir_all(root.join("src")).unwrap();
    fs::write(root.join("lspec.toml"), toml).unwrap();
    fs::write(root.join("src/syntax.sdf3"), "module syntax").unwrap();
}

/// Load a project without reading `LSPEC_*` variables
pub fn load(root: &Path) -> Config {
    ConfigLoader::new().without_env().load_from_directory(root).unwrap()
}

pub fn session(recorder: &Arc<Recorder>) -> BuildSession {
    BuildSession::new(Arc::new(RecordingFactory(Arc::clone(recorder))))
}

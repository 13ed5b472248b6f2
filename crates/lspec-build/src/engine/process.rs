//! Engine backed by an external compiler executable
//!
//! Each operation runs `<program> <operation> [argument]` in the project root
//! with the effective configuration passed through `LSPEC_*` environment
//! variables. A non-zero exit status is a failure and stderr becomes the
//! error message. `build` reports its messages as JSON lines on stdout.

use super::{BuildOutput, Engine, EngineError, EngineFactory, EngineMessage, EngineResult, TestOutcome};
use lspec_config::{DependencyKind, EffectiveConfig};
use std::collections::BTreeMap;
use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::time::Instant;
use tracing::{debug, trace, warn};

/// Creates [`ProcessEngine`]s for a compiler executable
#[derive(Debug, Clone)]
pub struct ProcessEngineFactory {
    program: PathBuf,
    env_vars: BTreeMap<String, String>,
}

impl ProcessEngineFactory {
    /// Factory for `program`
    ///
    /// A relative path with a directory part is anchored at the current
    /// directory, since the compiler runs in each project's root. A bare
    /// name is looked up on `PATH`.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: anchor_program(program.into()),
            env_vars: BTreeMap::new(),
        }
    }

    /// Pass an extra environment variable to every invocation
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.insert(key.into(), value.into());
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

fn anchor_program(program: PathBuf) -> PathBuf {
    if program.is_absolute() || program.components().count() < 2 {
        return program;
    }
    match env::current_dir() {
        Ok(cwd) => cwd.join(program),
        Err(e) => {
            warn!("cannot anchor {}: {}", program.display(), e);
            program
        }
    }
}

impl EngineFactory for ProcessEngineFactory {
    fn create(&self, project_root: &Path, config: &EffectiveConfig) -> EngineResult<Box<dyn Engine>> {
        let mut engine = ProcessEngine::new(&self.program, project_root, config);
        engine.env_vars.extend(self.env_vars.clone());
        Ok(Box::new(engine))
    }
}

/// One compiler instance for one project
#[derive(Debug)]
pub struct ProcessEngine {
    program: PathBuf,
    project_root: PathBuf,
    env_vars: BTreeMap<String, String>,
    loaded_languages: Vec<PathBuf>,
}

impl ProcessEngine {
    pub fn new(program: impl Into<PathBuf>, project_root: impl Into<PathBuf>, config: &EffectiveConfig) -> Self {
        let project_root = project_root.into();
        let mut engine = Self {
            program: program.into(),
            env_vars: BTreeMap::new(),
            loaded_languages: Vec::new(),
            project_root,
        };
        engine.configure(config);
        engine
    }

    /// Archives loaded so far
    pub fn loaded_languages(&self) -> &[PathBuf] {
        &self.loaded_languages
    }

    /// Environment passed to the compiler for `config`
    pub fn environment(&self) -> &BTreeMap<String, String> {
        &self.env_vars
    }

    fn configure(&mut self, config: &EffectiveConfig) {
        let id = config.identifier();
        let layout = config.layout();
        let join = |kind: DependencyKind| {
            config
                .dependencies()
                .get(kind)
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(",")
        };

        let vars = [
            ("LSPEC_PROJECT_DIR", self.project_root.display().to_string()),
            ("LSPEC_LANGUAGE_GROUP", id.group.clone()),
            ("LSPEC_LANGUAGE_ID", id.id.clone()),
            ("LSPEC_LANGUAGE_VERSION", id.version.clone()),
            ("LSPEC_LANGUAGE_NAME", config.name().to_string()),
            ("LSPEC_OUTPUT_FORMAT", config.format().name().to_string()),
            ("LSPEC_COMPILE_DEPS", join(DependencyKind::Compile)),
            ("LSPEC_SOURCE_DEPS", join(DependencyKind::Source)),
            ("LSPEC_JAVA_DEPS", join(DependencyKind::Java)),
            ("LSPEC_PARDONED", config.pardoned_languages().join(",")),
            ("LSPEC_SOURCE_DIR", layout.source.display().to_string()),
            ("LSPEC_GENERATED_DIR", layout.generated.display().to_string()),
            ("LSPEC_TARGET_DIR", layout.target.display().to_string()),
        ];
        for (key, value) in vars {
            self.env_vars.insert(key.to_string(), value);
        }
    }

    fn loaded_languages_var(&self) -> OsString {
        env::join_paths(&self.loaded_languages).unwrap_or_default()
    }

    fn invoke(&self, operation: &str, argument: Option<&Path>) -> EngineResult<Output> {
        let mut command = Command::new(&self.program);
        command
            .arg(operation)
            .current_dir(&self.project_root)
            .envs(&self.env_vars)
            .env("LSPEC_LOADED_LANGUAGES", self.loaded_languages_var())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(argument) = argument {
            command.arg(argument);
        }

        let start = Instant::now();
        let output = command
            .output()
            .map_err(|e| EngineError::new(operation, format!("cannot run {}: {}", self.program.display(), e)))?;
        trace!(
            operation,
            status = ?output.status.code(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "compiler returned"
        );
        Ok(output)
    }

    /// Run an operation that must exit successfully
    fn run(&self, operation: &str, argument: Option<&Path>) -> EngineResult<String> {
        let output = self.invoke(operation, argument)?;
        if !output.status.success() {
            return Err(failure(operation, &output));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let path = PathBuf::from(path);
        if path.is_absolute() {
            path
        } else {
            self.project_root.join(path)
        }
    }
}

fn failure(operation: &str, output: &Output) -> EngineError {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let message = match (stderr.trim(), output.status.code()) {
        ("", Some(code)) => format!("exited with status {}", code),
        ("", None) => "terminated by signal".to_string(),
        (text, _) => text.to_string(),
    };
    EngineError::new(operation, message)
}

fn parse_messages(stdout: &str) -> BuildOutput {
    let mut messages = Vec::new();
    for line in stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
        match serde_json::from_str::<EngineMessage>(line) {
            Ok(message) => messages.push(message),
            Err(_) => debug!("compiler: {}", line),
        }
    }
    BuildOutput { messages }
}

impl Engine for ProcessEngine {
    fn initialize(&mut self, config: &EffectiveConfig) -> EngineResult<()> {
        self.configure(config);
        self.run("initialize", None).map(drop)
    }

    fn generate_sources(&mut self, _config: &EffectiveConfig) -> EngineResult<()> {
        self.run("generate-sources", None).map(drop)
    }

    fn build(&mut self, _config: &EffectiveConfig) -> EngineResult<BuildOutput> {
        let stdout = self.run("build", None)?;
        Ok(parse_messages(&stdout))
    }

    fn compile(&mut self, _config: &EffectiveConfig) -> EngineResult<()> {
        self.run("compile", None).map(drop)
    }

    fn package(&mut self, _config: &EffectiveConfig) -> EngineResult<()> {
        self.run("package", None).map(drop)
    }

    fn archive(&mut self, _config: &EffectiveConfig) -> EngineResult<PathBuf> {
        let stdout = self.run("archive", None)?;
        let path = stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .last()
            .ok_or_else(|| EngineError::new("archive", "compiler did not report an archive path"))?;
        Ok(self.resolve(path))
    }

    fn clean(&mut self, _config: &EffectiveConfig) -> EngineResult<()> {
        self.run("clean", None).map(drop)
    }

    fn load_language_archive(&mut self, archive: &Path) -> EngineResult<()> {
        self.run("load-language", Some(archive))?;
        if !self.loaded_languages.iter().any(|p| p == archive) {
            self.loaded_languages.push(archive.to_path_buf());
        }
        Ok(())
    }

    fn load_dialects_under(&mut self, root: &Path) -> EngineResult<usize> {
        let stdout = self.run("load-dialects", Some(root))?;
        let count = stdout.trim();
        if count.is_empty() {
            return Ok(0);
        }
        count
            .parse()
            .map_err(|_| EngineError::new("load-dialects", format!("expected a dialect count, got '{}'", count)))
    }

    fn build_examples(&mut self, _config: &EffectiveConfig, archive: &Path) -> EngineResult<()> {
        self.run("build-examples", Some(archive)).map(drop)
    }

    fn run_tests(&mut self, _config: &EffectiveConfig, archive: &Path) -> EngineResult<TestOutcome> {
        let output = self.invoke("test", Some(archive))?;
        match output.status.code() {
            Some(0) => Ok(TestOutcome::Passed),
            Some(1) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let stderr = String::from_utf8_lossy(&output.stderr);
                let summary = format!("{}\n{}", stdout.trim(), stderr.trim());
                Ok(TestOutcome::Failed {
                    summary: summary.trim().to_string(),
                })
            }
            _ => Err(failure("test", &output)),
        }
    }

    fn dispose(&mut self) {
        if let Err(e) = self.run("dispose", None) {
            warn!("compiler did not shut down cleanly: {}", e);
        }
        self.loaded_languages.clear();
    }
}

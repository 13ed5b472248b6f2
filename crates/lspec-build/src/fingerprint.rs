//! Stage fingerprints and the incremental cache decision
//!
//! A stage is up to date when the hashes of its declared inputs and outputs
//! match the ones recorded after its last successful run and every declared
//! output still exists. Records are removed before a stage runs and written
//! only after it succeeds, so an interrupted run is never trusted.

use crate::error::{BuildError, BuildResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const STORE_SCHEMA: u32 = 1;

/// How a stage's inputs and outputs are determined
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FingerprintPolicy {
    /// Stage-specific allow-lists of inputs and outputs
    #[default]
    Approximate,
    /// The whole project tree, minus build output directories
    Conservative,
}

impl FingerprintPolicy {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Approximate => "approximate",
            Self::Conservative => "conservative",
        }
    }
}

/// One entry of a [`FileSet`], relative to the project root
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileSpec {
    /// A file, or every file below a directory
    Path(PathBuf),
    /// Files below a directory with the given extension
    Matching { dir: PathBuf, extension: String },
    /// The whole project tree except the given directories
    Tree { exclude: Vec<PathBuf> },
}

impl FileSpec {
    fn root_path(&self) -> Option<&Path> {
        match self {
            Self::Path(path) => Some(path),
            Self::Matching { dir, .. } => Some(dir),
            Self::Tree { .. } => None,
        }
    }
}

/// A declared set of files
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileSet {
    specs: Vec<FileSpec>,
}

impl FileSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file or directory
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.specs.push(FileSpec::Path(path.into()));
        self
    }

    /// Add files with `extension` below `dir`
    pub fn matching(mut self, dir: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        self.specs.push(FileSpec::Matching {
            dir: dir.into(),
            extension: extension.into(),
        });
        self
    }

    /// The whole tree minus `exclude`
    pub fn tree(exclude: Vec<PathBuf>) -> Self {
        Self {
            specs: vec![FileSpec::Tree { exclude }],
        }
    }

    pub fn specs(&self) -> &[FileSpec] {
        &self.specs
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Every file currently matched, sorted and relative to `root`
    pub fn collect(&self, root: &Path) -> Vec<PathBuf> {
        let mut files = Vec::new();

        for spec in &self.specs {
            match spec {
                FileSpec::Path(path) => walk(root, &root.join(path), &[], None, &mut files),
                FileSpec::Matching { dir, extension } => {
                    walk(root, &root.join(dir), &[], Some(extension), &mut files)
                }
                FileSpec::Tree { exclude } => {
                    let exclude: Vec<PathBuf> = exclude.iter().map(|e| root.join(e)).collect();
                    walk(root, root, &exclude, None, &mut files)
                }
            }
        }

        files.sort();
        files.dedup();
        files
    }

    /// Whether every declared location exists
    pub fn all_exist(&self, root: &Path) -> bool {
        self.specs.iter().all(|spec| match spec.root_path() {
            Some(path) => root.join(path).exists(),
            None => root.exists(),
        })
    }

    /// Content hash of the set
    ///
    /// Covers relative paths and file contents. Declared paths that do not
    /// exist contribute a marker, so their appearance changes the hash.
    pub fn fingerprint(&self, root: &Path) -> BuildResult<String> {
        let mut hasher = Sha256::new();

        for spec in &self.specs {
            if let Some(path) = spec.root_path() {
                if !root.join(path).exists() {
                    hasher.update(b"missing:");
                    hasher.update(path.to_string_lossy().as_bytes());
                    hasher.update([0u8]);
                }
            }
        }

        for relative in self.collect(root) {
            let absolute = root.join(&relative);
            let content = fs::read(&absolute).map_err(|e| BuildError::io(&absolute, e))?;
            hasher.update(relative.to_string_lossy().as_bytes());
            hasher.update([0u8]);
            hasher.update(Sha256::digest(&content));
        }

        Ok(format!("{:x}", hasher.finalize()))
    }
}

fn walk(
    root: &Path,
    start: &Path,
    exclude: &[PathBuf],
    extension: Option<&String>,
    files: &mut Vec<PathBuf>,
) {
    if !start.exists() {
        return;
    }

    let entries = WalkDir::new(start)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| !exclude.iter().any(|x| e.path() == x.as_path()))
        .filter_map(|e| e.ok());

    for entry in entries {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if let Some(ext) = extension {
            if path.extension().and_then(|s| s.to_str()) != Some(ext.as_str()) {
                continue;
            }
        }
        let relative = path.strip_prefix(root).unwrap_or(path);
        files.push(relative.to_path_buf());
    }
}

/// Hashes recorded after a stage's last successful run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    pub inputs: String,
    pub outputs: String,
    /// Digest of the host overrides the stage ran with
    #[serde(default)]
    pub settings: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    schema: u32,
    policy: FingerprintPolicy,
    #[serde(default)]
    stages: BTreeMap<String, StageRecord>,
}

/// Persistent per-project fingerprint records
///
/// Opening the store with a different policy than the one it was written
/// with discards every record.
#[derive(Debug)]
pub struct FingerprintStore {
    path: PathBuf,
    policy: FingerprintPolicy,
    stages: BTreeMap<String, StageRecord>,
}

impl FingerprintStore {
    /// Open the store at `path`, creating an empty one if absent
    pub fn open(path: impl Into<PathBuf>, policy: FingerprintPolicy) -> BuildResult<Self> {
        let path = path.into();
        let mut store = Self {
            path,
            policy,
            stages: BTreeMap::new(),
        };

        if !store.path.exists() {
            return Ok(store);
        }

        let content = fs::read_to_string(&store.path).map_err(|e| BuildError::io(&store.path, e))?;
        match serde_json::from_str::<StoreFile>(&content) {
            Ok(file) if file.schema == STORE_SCHEMA && file.policy == policy => {
                store.stages = file.stages;
            }
            Ok(file) if file.schema == STORE_SCHEMA => {
                info!(
                    "fingerprint policy changed from {} to {}, invalidating all stages",
                    file.policy.name(),
                    policy.name()
                );
                store.save()?;
            }
            Ok(_) => {
                debug!("fingerprint store schema changed, starting fresh");
                store.save()?;
            }
            Err(e) => {
                warn!("discarding unreadable fingerprint store {}: {}", store.path.display(), e);
                store.save()?;
            }
        }

        Ok(store)
    }

    pub fn policy(&self) -> FingerprintPolicy {
        self.policy
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Recorded hashes for a stage
    pub fn get(&self, stage: &str) -> Option<&StageRecord> {
        self.stages.get(stage)
    }

    /// Whether `stage`'s recorded hashes match
    pub fn is_up_to_date(&self, stage: &str, current: &StageRecord) -> bool {
        self.stages.get(stage) == Some(current)
    }

    /// Drop a stage's record and persist
    pub fn invalidate(&mut self, stage: &str) -> BuildResult<()> {
        if self.stages.remove(stage).is_some() {
            self.save()?;
        }
        Ok(())
    }

    /// Record a successful run and persist
    pub fn record(&mut self, stage: &str, record: StageRecord) -> BuildResult<()> {
        self.stages.insert(stage.to_string(), record);
        self.save()
    }

    /// Drop every record and persist
    pub fn clear(&mut self) -> BuildResult<()> {
        self.stages.clear();
        self.save()
    }

    fn save(&self) -> BuildResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| BuildError::io(parent, e))?;
        }

        let file = StoreFile {
            schema: STORE_SCHEMA,
            policy: self.policy,
            stages: self.stages.clone(),
        };
        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| BuildError::CacheError(e.to_string()))?;

        // readers must never see a partial file
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|e| BuildError::io(&tmp, e))?;
        fs::rename(&tmp, &self.path).map_err(|e| BuildError::io(&self.path, e))?;
        Ok(())
    }
}

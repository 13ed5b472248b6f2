//! Build-scoped run-once guard
//!
//! Side effects such as applying the configuration overlay or loading
//! language archives into the engine are requested by every stage but must
//! happen at most once per project per build invocation. [`OnceTable`] keys
//! completion by `(scope, operation)`. A failed operation is not recorded, so
//! a later request retries it.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::trace;

/// Identifies a project within one build invocation
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeKey(String);

impl ScopeKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Scope for the project rooted at `root`
    pub fn for_project(root: &Path) -> Self {
        let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
        Self(root.to_string_lossy().into_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

type OnceKey = (ScopeKey, String);

/// Completion table for one build invocation
#[derive(Debug, Default)]
pub struct OnceTable {
    entries: Mutex<HashMap<OnceKey, Arc<Mutex<bool>>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl OnceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `operation` unless it already completed for this key
    ///
    /// Returns `Ok(true)` when the operation ran now and `Ok(false)` when it
    /// had already completed. Concurrent callers with the same key wait for
    /// the first one to finish.
    pub fn ensure_once<E>(
        &self,
        scope: &ScopeKey,
        operation: &str,
        f: impl FnOnce() -> Result<(), E>,
    ) -> Result<bool, E> {
        let cell = {
            let mut entries = lock(&self.entries);
            Arc::clone(
                entries
                    .entry((scope.clone(), operation.to_string()))
                    .or_default(),
            )
        };

        let mut done = lock(&cell);
        if *done {
            trace!(scope = %scope, operation, "already done");
            return Ok(false);
        }

        f()?;
        *done = true;
        trace!(scope = %scope, operation, "done");
        Ok(true)
    }

    /// Whether the operation completed for this key
    pub fn has_run(&self, scope: &ScopeKey, operation: &str) -> bool {
        let entries = lock(&self.entries);
        entries
            .get(&(scope.clone(), operation.to_string()))
            .map(|cell| *lock(cell))
            .unwrap_or(false)
    }

    /// Forget one completion so the next request runs the operation again
    pub fn forget(&self, scope: &ScopeKey, operation: &str) {
        lock(&self.entries).remove(&(scope.clone(), operation.to_string()));
    }

    /// Clear the table at the end of a build invocation
    pub fn finish(&self) {
        lock(&self.entries).clear();
    }

    /// Number of tracked keys
    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

//! Find Grid Engine binaries on the search path, memoizing the results.

use crate::error::{GridError, GridResult};
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Locates scheduler executables and remembers where they were found.
///
/// The first successful lookup of a name is reused for the lifetime of the
/// locator. Failed lookups are not cached, so a binary that appears later
/// (e.g. after a module load) will still be found.
#[derive(Debug, Default)]
pub struct BinaryLocator {
    search_path: Option<OsString>,
    cache: Mutex<HashMap<String, PathBuf>>,
}

impl BinaryLocator {
    /// Search the `PATH` of the current process at lookup time.
    pub fn new() -> Self {
        Self::default()
    }

    /// Search an explicit `PATH`-style list of directories.
    pub fn with_search_path(path: impl Into<OsString>) -> Self {
        Self {
            search_path: Some(path.into()),
            cache: Mutex::default(),
        }
    }

    /// Pin `name` to an explicit path, bypassing the search.
    pub fn insert(&self, name: &str, path: impl Into<PathBuf>) {
        self.lock().insert(name.to_string(), path.into());
    }

    pub fn locate(&self, name: &str) -> GridResult<PathBuf> {
        if let Some(path) = self.lock().get(name) {
            return Ok(path.clone());
        }

        let found = self.search(name).ok_or_else(|| {
            tracing::debug!("{} not found on search path", name);
            GridError::BadSubmission("Cannot find Grid Engine software".to_string())
        })?;
        self.lock().insert(name.to_string(), found.clone());
        Ok(found)
    }

    /// Forget every cached location.
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, PathBuf>> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn search(&self, name: &str) -> Option<PathBuf> {
        let path = match &self.search_path {
            Some(p) => p.clone(),
            None => std::env::var_os("PATH")?,
        };
        std::env::split_paths(&path)
            .map(|dir| dir.join(name))
            .find(|candidate| is_executable(candidate))
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

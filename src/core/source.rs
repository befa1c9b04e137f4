//! Repository access used by the orchestrator and the ledger.
//!
//! Paths are repository-relative strings with `/` separators so they can be
//! used directly as index keys.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use ignore::WalkBuilder;
use parking_lot::RwLock;
use tracing::debug;

use crate::error::{TrailError, Result};

/// Read access to the current text of repository files
pub trait SourceProvider: Send + Sync {
    /// Return the current content of `path`, or an error if it cannot be read
    fn read_source(&self, path: &str) -> Result<String>;

    /// List candidate source files under the repository root
    fn list_files(&self) -> Result<Vec<String>>;
}

/// Source provider backed by a directory on disk
pub struct FsSource {
    root: PathBuf,
    ignore_patterns: Vec<String>,
    max_file_size: usize,
}

impl FsSource {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            ignore_patterns: Vec::new(),
            max_file_size: usize::MAX,
        }
    }

    pub fn with_ignore_patterns(mut self, patterns: &[String]) -> Self {
        self.ignore_patterns = patterns.to_vec();
        self
    }

    pub fn with_max_file_size(mut self, max_file_size: usize) -> Self {
        self.max_file_size = max_file_size;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn relative_key(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect();
        Some(parts.join("/"))
    }

    fn is_ignored(&self, key: &str) -> bool {
        self.ignore_patterns.iter().any(|pattern| {
            if let Some(dir) = pattern.strip_suffix('/') {
                key.split('/').any(|segment| segment == dir)
            } else if let Some(suffix) = pattern.strip_prefix('*') {
                key.ends_with(suffix)
            } else {
                key == pattern || key.ends_with(&format!("/{}", pattern))
            }
        })
    }
}

impl SourceProvider for FsSource {
    fn read_source(&self, path: &str) -> Result<String> {
        let relative = Path::new(path);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if path.is_empty() || escapes {
            return Err(TrailError::Source {
                path: path.to_string(),
                reason: "path is not inside the repository".to_string(),
            });
        }

        let full_path = self.root.join(relative);
        std::fs::read_to_string(&full_path).map_err(|e| TrailError::Source {
            path: path.to_string(),
            reason: e.to_string(),
        })
    }

    fn list_files(&self) -> Result<Vec<String>> {
        let mut files = Vec::new();

        // Use ignore crate to respect .gitignore and custom patterns
        let walker = WalkBuilder::new(&self.root)
            .hidden(false)
            .git_ignore(true)
            .build();

        for entry in walker {
            let entry = entry.map_err(|e| TrailError::FileSystem(e.to_string()))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }

            let Some(key) = self.relative_key(path) else {
                continue;
            };
            if key.starts_with(".git/") || self.is_ignored(&key) {
                continue;
            }

            let size = entry.metadata().map(|m| m.len() as usize).unwrap_or(0);
            if size > self.max_file_size {
                debug!("Skipping {} ({} bytes exceeds limit)", key, size);
                continue;
            }

            files.push(key);
        }

        files.sort();
        Ok(files)
    }
}

/// In-memory source provider; edits are visible to later reads
#[derive(Default)]
pub struct MemorySource {
    files: RwLock<HashMap<String, String>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(self, path: &str, content: &str) -> Self {
        self.write(path, content);
        self
    }

    pub fn write(&self, path: &str, content: &str) {
        self.files.write().insert(path.to_string(), content.to_string());
    }

    pub fn remove(&self, path: &str) {
        self.files.write().remove(path);
    }
}

impl SourceProvider for MemorySource {
    fn read_source(&self, path: &str) -> Result<String> {
        self.files
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| TrailError::Source {
                path: path.to_string(),
                reason: "file not found".to_string(),
            })
    }

    fn list_files(&self) -> Result<Vec<String>> {
        let mut files: Vec<String> = self.files.read().keys().cloned().collect();
        files.sort();
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;

    #[test]
    fn test_fs_source_lists_relative_paths_and_skips_ignored() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("app/main.py").write_str("print('hi')\n").unwrap();
        temp.child("app/util.py").write_str("x = 1\n").unwrap();
        temp.child("node_modules/dep/index.js").write_str("module.exports = 1\n").unwrap();
        temp.child("scratch.tmp").write_str("junk").unwrap();

        let source = FsSource::new(temp.path())
            .with_ignore_patterns(&["node_modules/".to_string(), "*.tmp".to_string()]);
        let files = source.list_files().unwrap();

        assert_eq!(files, vec!["app/main.py".to_string(), "app/util.py".to_string()]);
        assert_eq!(source.read_source("app/util.py").unwrap(), "x = 1\n");
    }

    #[test]
    fn test_fs_source_refuses_paths_outside_the_root() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("outside.py").write_str("SECRET = 1\n").unwrap();
        temp.child("repo/app.py").write_str("x = 1\n").unwrap();

        let source = FsSource::new(temp.path().join("repo"));
        assert_eq!(source.read_source("./app.py").unwrap(), "x = 1\n");

        let outside = temp.path().join("outside.py");
        for path in ["../outside.py", "app/../../outside.py", outside.to_str().unwrap(), ""] {
            let err = source.read_source(path).unwrap_err();
            assert_eq!(err.reason_code(), "source_unavailable", "{path}");
        }
    }

    #[test]
    fn test_missing_file_is_a_source_error() {
        let source = MemorySource::new().with_file("a.py", "pass\n");
        let err = source.read_source("b.py").unwrap_err();
        assert_eq!(err.reason_code(), "source_unavailable");

        source.remove("a.py");
        assert!(source.read_source("a.py").is_err());
    }
}

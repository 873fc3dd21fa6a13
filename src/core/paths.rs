//! core::paths
//!
//! Centralized path routing for refkeeper's own files inside a repository.
//!
//! # Storage Layout
//!
//! Everything lives under `<git_dir>/refkeeper/`:
//! - `config.toml` - Repository configuration
//! - `lock` - Single-writer lock file
//!
//! The repository root is always passed in explicitly; nothing here looks at
//! the process environment or the current directory.
//!
//! # Example
//!
//! ```
//! use refkeeper::core::paths::RepoPaths;
//! use std::path::PathBuf;
//!
//! let paths = RepoPaths::new("/repos/source/full.git");
//! assert_eq!(
//!     paths.lock_path(),
//!     PathBuf::from("/repos/source/full.git/refkeeper/lock")
//! );
//! ```

use std::path::{Path, PathBuf};

const TOOL_DIR: &str = "refkeeper";

/// Paths derived from a repository's git directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoPaths {
    /// The git directory (a bare repository root, or `.git`).
    pub git_dir: PathBuf,
}

impl RepoPaths {
    /// Create paths rooted at `git_dir`.
    pub fn new(git_dir: impl Into<PathBuf>) -> Self {
        Self {
            git_dir: git_dir.into(),
        }
    }

    /// The git directory.
    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    /// `<git_dir>/refkeeper`
    pub fn tool_dir(&self) -> PathBuf {
        self.git_dir.join(TOOL_DIR)
    }

    /// `<git_dir>/refkeeper/config.toml`
    pub fn repo_config_path(&self) -> PathBuf {
        self.tool_dir().join("config.toml")
    }

    /// `<git_dir>/refkeeper/lock`
    pub fn lock_path(&self) -> PathBuf {
        self.tool_dir().join("lock")
    }
}

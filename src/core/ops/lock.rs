//! core::ops::lock
//!
//! Exclusive lock serializing mutating runs against one repository.
//!
//! # Architecture
//!
//! The reference store is a single-writer resource at the pipeline level:
//! two migrations (or a migration and an expiry) must never interleave their
//! transactions. The lock file is created with an exclusive-create open and
//! additionally held with an OS advisory lock via `fs2`.
//!
//! A lock file left behind by a process that died is detected by its free
//! advisory lock and taken over. The holder removes the file before it
//! unlocks, so a lock taken on a file that is no longer at the lock path
//! belongs to nobody; acquisition checks for that and starts over.
//!
//! # Storage
//!
//! - `<git_dir>/refkeeper/lock` - contains the holder's pid
//!
//! # Invariants
//!
//! - Lock must be held for the whole pipeline run
//! - Lock is released and the file removed on drop (RAII)
//! - Acquisition is non-blocking (fails fast if locked)
//!
//! # Example
//!
//! ```ignore
//! use refkeeper::core::ops::lock::RepoLock;
//! use refkeeper::core::paths::RepoPaths;
//!
//! let paths = RepoPaths::new("/repos/source/full.git");
//! let lock = RepoLock::acquire(&paths)?;
//! // ... run the pipeline ...
//! drop(lock);
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use thiserror::Error;
use tracing::{debug, warn};

use crate::core::paths::RepoPaths;

/// Rounds of open-then-lock before giving up on a lock file that keeps
/// being replaced.
const ACQUIRE_ATTEMPTS: usize = 3;

/// Errors from locking operations.
#[derive(Debug, Error)]
pub enum LockError {
    /// Another process holds the lock.
    #[error("repository is locked by another refkeeper process ({path})")]
    AlreadyLocked { path: PathBuf },

    /// Failed to create the lock file or its directory.
    #[error("failed to create lock: {0}")]
    CreateFailed(String),

    /// Failed to acquire the OS lock.
    #[error("failed to acquire lock: {0}")]
    AcquireFailed(String),

    /// Failed to release the lock.
    #[error("failed to release lock: {0}")]
    ReleaseFailed(String),
}

/// An exclusive lock on the repository.
#[derive(Debug)]
pub struct RepoLock {
    path: PathBuf,
    file: Option<File>,
}

impl RepoLock {
    /// Acquire the repository lock.
    ///
    /// # Errors
    ///
    /// - [`LockError::AlreadyLocked`] if a live process holds the lock
    /// - [`LockError::CreateFailed`] if the lock file cannot be created
    /// - [`LockError::AcquireFailed`] if the OS lock cannot be taken
    pub fn acquire(paths: &RepoPaths) -> Result<Self, LockError> {
        let dir = paths.tool_dir();
        fs::create_dir_all(&dir).map_err(|e| {
            LockError::CreateFailed(format!("cannot create {}: {}", dir.display(), e))
        })?;

        let path = paths.lock_path();
        for _ in 0..ACQUIRE_ATTEMPTS {
            let file = Self::open(&path)?;

            match file.try_lock_exclusive() {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    return Err(LockError::AlreadyLocked { path });
                }
                Err(e) => return Err(LockError::AcquireFailed(e.to_string())),
            }

            if !is_linked_at(&file, &path).map_err(|e| LockError::AcquireFailed(e.to_string()))? {
                // The previous holder released between our open and lock.
                debug!(path = %path.display(), "lock file replaced while locking; retrying");
                continue;
            }

            let mut lock = Self {
                path,
                file: Some(file),
            };
            lock.write_owner();
            debug!(path = %lock.path.display(), "acquired repository lock");
            return Ok(lock);
        }

        Err(LockError::AlreadyLocked { path })
    }

    /// Create the lock file, or open the one already there.
    fn open(path: &Path) -> Result<File, LockError> {
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => Ok(file),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Self::open_leftover(path),
            Err(e) => Err(LockError::CreateFailed(format!(
                "cannot create {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Open an existing lock file so its advisory lock can be probed.
    fn open_leftover(path: &Path) -> Result<File, LockError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| LockError::CreateFailed(format!("cannot open {}: {}", path.display(), e)))?;
        warn!(path = %path.display(), "found existing lock file; checking whether it is stale");
        Ok(file)
    }

    fn write_owner(&mut self) {
        if let Some(file) = self.file.as_mut() {
            let _ = file.set_len(0);
            let _ = writeln!(file, "{}", std::process::id());
        }
    }

    /// Check if this guard still holds the lock.
    pub fn is_held(&self) -> bool {
        self.file.is_some()
    }

    /// Path to the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the lock early and remove the lock file.
    pub fn release(&mut self) -> Result<(), LockError> {
        if let Some(file) = self.file.take() {
            // Remove while still locked so no one else opens the old inode.
            match fs::remove_file(&self.path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(LockError::ReleaseFailed(e.to_string())),
            }
            file.unlock()
                .map_err(|e| LockError::ReleaseFailed(e.to_string()))?;
        }
        Ok(())
    }
}

/// Check if `file` is still the file at `path`.
fn is_linked_at(file: &File, path: &Path) -> std::io::Result<bool> {
    let held = file.metadata()?;
    match fs::metadata(path) {
        Ok(current) => Ok(held.dev() == current.dev() && held.ino() == current.ino()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

impl Drop for RepoLock {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = fs::remove_file(&self.path);
            let _ = file.unlock();
        }
    }
}

//! git::interface
//!
//! [`RefStore`] backed by a real repository.
//!
//! # Architecture
//!
//! Two mechanisms, each where it is strongest:
//!
//! - The git CLI for the bulk ref operations: `for-each-ref` streams
//!   millions of refs without loading them, `update-ref --stdin -z` applies a
//!   batch atomically, and `pack-refs` compacts.
//! - `git2` for point reads: resolving a ref, reading a commit, merge-base.
//!
//! Every CLI call names the repository with `--git-dir`, so nothing depends
//! on the current directory.
//!
//! # Error Handling
//!
//! git2 errors are categorized the same way for every read:
//! - [`EngineError::RefNotFound`]: the ref does not exist
//! - [`EngineError::ObjectNotFound`]: the object is missing or not a commit
//! - [`EngineError::Internal`]: anything else
//!
//! # Example
//!
//! ```ignore
//! use refkeeper::git::{GitStore, RefStore};
//! use std::path::Path;
//!
//! let store = GitStore::open(Path::new("/repos/source/full.git"))?;
//! let oid = store.resolve("refs/heads/master")?;
//! println!("master is at {}", oid.short(7));
//! ```

use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::process::{Invocation, Timeouts};
use super::{EngineError, RefLines, RefQuery, RefStore};
use crate::core::reference::{Commit, Signature};
use crate::core::types::Oid;

const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(60 * 60);

impl EngineError {
    /// Create an EngineError from a git2::Error with context.
    fn from_git2(err: git2::Error, context: &str) -> Self {
        match err.code() {
            git2::ErrorCode::NotFound => {
                if context.starts_with("refs/") || context.contains("ref") {
                    EngineError::RefNotFound {
                        refname: context.to_string(),
                    }
                } else {
                    EngineError::ObjectNotFound {
                        oid: context.to_string(),
                    }
                }
            }
            _ => EngineError::Internal {
                message: format!("{}: {}", context, err.message()),
            },
        }
    }
}

/// A repository on disk.
pub struct GitStore {
    repo: git2::Repository,
    git_dir: PathBuf,
    program: String,
    timeouts: Timeouts,
    write_timeout: Duration,
}

impl std::fmt::Debug for GitStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitStore")
            .field("git_dir", &self.git_dir)
            .field("program", &self.program)
            .field("timeouts", &self.timeouts)
            .field("write_timeout", &self.write_timeout)
            .finish()
    }
}

impl GitStore {
    /// Open the repository at `path`.
    ///
    /// `path` may be a bare repository, a `.git` directory, or a working
    /// tree root. No upward discovery is done.
    ///
    /// # Errors
    ///
    /// - [`EngineError::NotARepo`] if `path` is not a repository
    pub fn open(path: &Path) -> Result<Self, EngineError> {
        let repo = git2::Repository::open(path).map_err(|_| EngineError::NotARepo {
            path: path.to_path_buf(),
        })?;
        let git_dir = repo.path().to_path_buf();
        debug!(git_dir = %git_dir.display(), bare = repo.is_bare(), "opened repository");

        Ok(Self {
            repo,
            git_dir,
            program: "git".to_string(),
            timeouts: Timeouts::default(),
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        })
    }

    /// Use a different git executable.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Use different subprocess deadlines.
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// How long ref writes (batch apply, packing) may run before they are
    /// stopped. Reads keep the ordinary exit deadline.
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    fn invocation(&self, args: &[&str]) -> Invocation {
        self.invocation_with(args, self.timeouts)
    }

    /// A writer does all of its work before exiting, so it gets the long deadline.
    fn write_invocation(&self, args: &[&str]) -> Invocation {
        let timeouts = Timeouts {
            exit: self.write_timeout,
            ..self.timeouts
        };
        self.invocation_with(args, timeouts)
    }

    fn invocation_with(&self, args: &[&str], timeouts: Timeouts) -> Invocation {
        let mut argv = vec![format!("--git-dir={}", self.git_dir.display())];
        argv.extend(args.iter().map(|a| a.to_string()));
        Invocation::new(&self.program, argv, timeouts)
    }

    fn parse_oid(&self, raw: git2::Oid) -> Result<Oid, EngineError> {
        Ok(Oid::new(raw.to_string())?)
    }

    fn git2_oid(id: &Oid) -> Result<git2::Oid, EngineError> {
        git2::Oid::from_str(id.as_str()).map_err(|e| EngineError::from_git2(e, id.as_str()))
    }
}

fn signature(sig: &git2::Signature<'_>) -> Signature {
    let time = DateTime::from_timestamp(sig.when().seconds(), 0)
        .unwrap_or(DateTime::UNIX_EPOCH)
        .with_timezone(&Utc);
    Signature {
        email: sig.email().unwrap_or("").to_string(),
        name: sig.name().unwrap_or("").to_string(),
        time,
    }
}

impl RefStore for GitStore {
    fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    fn for_each_ref(&self, query: &RefQuery) -> Result<RefLines<'_>, EngineError> {
        let format = format!("--format={}", query.format().format_string());
        let sort = query.sort().map(|key| format!("--sort={key}"));

        let mut args = vec!["for-each-ref", format.as_str()];
        if let Some(sort) = &sort {
            args.push(sort);
        }
        if !query.pattern().is_empty() {
            args.push(query.pattern());
        }

        let stream = self.invocation(&args).stream()?;
        Ok(Box::new(stream))
    }

    fn resolve(&self, refname: &str) -> Result<Oid, EngineError> {
        let object = self
            .repo
            .revparse_single(refname)
            .map_err(|e| EngineError::from_git2(e, refname))?;
        let commit = object
            .peel_to_commit()
            .map_err(|e| EngineError::from_git2(e, refname))?;
        self.parse_oid(commit.id())
    }

    fn commit(&self, id: &Oid) -> Result<Commit, EngineError> {
        let commit = self
            .repo
            .find_commit(Self::git2_oid(id)?)
            .map_err(|e| EngineError::from_git2(e, id.as_str()))?;

        let parent_ids = commit
            .parent_ids()
            .map(|p| self.parse_oid(p))
            .collect::<Result<Vec<_>, _>>()?;

        let author = signature(&commit.author());
        let committer = signature(&commit.committer());

        Ok(Commit {
            id: id.clone(),
            author,
            committer,
            message: commit.message().unwrap_or("").to_string(),
            parent_ids,
            tree_id: self.parse_oid(commit.tree_id())?,
        })
    }

    fn merge_base(&self, a: &Oid, b: &Oid) -> Result<Option<Oid>, EngineError> {
        match self.repo.merge_base(Self::git2_oid(a)?, Self::git2_oid(b)?) {
            Ok(oid) => Ok(Some(self.parse_oid(oid)?)),
            Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(None),
            Err(e) => Err(EngineError::Internal {
                message: e.message().to_string(),
            }),
        }
    }

    fn apply_batch(&mut self, spool: &mut File) -> Result<(), EngineError> {
        // --no-deref: a symbolic ref is itself the subject, never its target.
        self.write_invocation(&["update-ref", "--no-deref", "--stdin", "-z"])
            .run_with_input(spool)
    }

    fn compact(&mut self) -> Result<(), EngineError> {
        info!(git_dir = %self.git_dir.display(), "packing refs");
        self.write_invocation(&["pack-refs", "--all"]).run()
    }
}

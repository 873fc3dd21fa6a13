//! git
//!
//! The storage-engine boundary: everything refkeeper knows about a
//! repository's reference store flows through [`RefStore`].
//!
//! # Architecture
//!
//! The engine is a capability, not a mechanism. Pipelines only ever call the
//! operations on [`RefStore`]:
//!
//! - enumerate refs matching a prefix (streamed, line by line)
//! - resolve a ref to a commit
//! - read a commit
//! - compute a merge-base
//! - apply a batch of ref mutations in the NUL-delimited `update-ref -z`
//!   format
//! - compact ref storage
//!
//! [`GitStore`] drives the git CLI for the streaming and batch operations and
//! links `git2` for object reads. [`MemoryStore`] is a deterministic fake with
//! the same atomicity and name/prefix rules, used by tests.
//!
//! On top of the trait sit the two core helpers every pipeline uses:
//! [`enumerate`] (typed, lazy ref iteration) and [`transaction`] (the batch
//! builder, the only writer).
//!
//! # Invariants
//!
//! - No module outside `git` spawns git or imports `git2`
//! - The batch stream is the only way refs change
//! - Every child process is waited for, with a bounded escalation

pub mod enumerate;
mod interface;
pub mod memory;
pub mod process;
pub mod transaction;

pub use enumerate::{iter_refs, iter_with_id};
pub use interface::GitStore;
pub use memory::MemoryStore;
pub use process::Timeouts;
pub use transaction::{Transaction, TransactionError, TxState};

use std::fs::File;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::core::reference::Commit;
use crate::core::types::{Oid, TypeError};

/// Errors from the storage engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// An engine process exited unsuccessfully.
    ///
    /// `code` is the exit status, or the negated signal number when the
    /// process was killed by a signal.
    #[error("`{}` exited with status {code}", .args.join(" "))]
    Failure { args: Vec<String>, code: i32 },

    /// An engine process did not exit even after SIGKILL.
    #[error("`{}` (pid {pid}) did not exit after forced termination", .args.join(" "))]
    Timeout { args: Vec<String>, pid: u32 },

    /// An engine process could not be started.
    #[error("failed to run `{}`: {source}", .args.join(" "))]
    Spawn {
        args: Vec<String>,
        source: std::io::Error,
    },

    /// The path is not a git repository.
    #[error("not a git repository: {path}")]
    NotARepo { path: PathBuf },

    /// Requested ref does not exist.
    #[error("ref not found: {refname}")]
    RefNotFound { refname: String },

    /// Object missing, or not a commit.
    #[error("object not found: {oid}")]
    ObjectNotFound { oid: String },

    /// The engine printed something we cannot parse.
    #[error("malformed engine output: {line:?}")]
    Malformed { line: String },

    /// The engine reported an invalid object id.
    #[error(transparent)]
    InvalidOid(#[from] TypeError),

    /// The engine cannot perform the request.
    #[error("unsupported by this engine: {operation}")]
    Unsupported { operation: String },

    /// Internal git2 error.
    #[error("git error: {message}")]
    Internal { message: String },

    /// I/O on pipes or the spool file.
    #[error("engine I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-record output format for [`RefStore::for_each_ref`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefFormat {
    /// `name`
    Name,
    /// `name\tcommit` (tags peeled to the commit they annotate)
    NameAndCommit,
    /// `name\tcommit\tauthor-email` (tags peeled)
    NameCommitEmail,
    /// A raw `--format` string, passed through to engines that support one.
    Custom(String),
}

impl RefFormat {
    /// The `git for-each-ref --format` string for this format.
    pub fn format_string(&self) -> String {
        const NAME: &str = "%(refname)";
        const COMMIT: &str =
            "%(if:equals=tag)%(objecttype)%(then)%(*objectname)%(else)%(objectname)%(end)";
        const EMAIL: &str = "%(if:equals=tag)%(objecttype)%(then)%(*authoremail:trim)%(else)%(authoremail:trim)%(end)";

        match self {
            RefFormat::Name => NAME.to_string(),
            RefFormat::NameAndCommit => format!("{NAME}%09{COMMIT}"),
            RefFormat::NameCommitEmail => format!("{NAME}%09{COMMIT}%09{EMAIL}"),
            RefFormat::Custom(format) => format.clone(),
        }
    }
}

/// An enumeration request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefQuery {
    pattern: String,
    sort: Option<String>,
    format: RefFormat,
}

impl RefQuery {
    /// Query refs under `pattern`, which is treated as a namespace prefix.
    ///
    /// A trailing `/` is appended when absent, so `refs/heads` never matches
    /// `refs/headsup`. An empty pattern matches everything.
    pub fn new(pattern: &str, format: RefFormat) -> Self {
        Self {
            pattern: normalize_pattern(pattern),
            sort: None,
            format,
        }
    }

    /// Sort by a `for-each-ref` key such as `refname` or `-committerdate`.
    pub fn sorted_by(mut self, key: Option<&str>) -> Self {
        self.sort = key.map(str::to_string);
        self
    }

    /// The normalized prefix.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// The sort key, if any.
    pub fn sort(&self) -> Option<&str> {
        self.sort.as_deref()
    }

    /// The record format.
    pub fn format(&self) -> &RefFormat {
        &self.format
    }
}

/// Append the trailing separator a prefix pattern needs.
pub fn normalize_pattern(pattern: &str) -> String {
    if pattern.is_empty() || pattern.ends_with('/') {
        pattern.to_string()
    } else {
        format!("{pattern}/")
    }
}

/// Lazily produced enumeration records.
pub type RefLines<'a> = Box<dyn Iterator<Item = Result<String, EngineError>> + 'a>;

/// The storage-engine capability.
///
/// Reads take `&self`; the two mutating operations take `&mut self`, so an
/// enumeration must be drained (or dropped) before its results are applied.
pub trait RefStore {
    /// The repository's git directory.
    fn git_dir(&self) -> &Path;

    /// Stream one record per matching ref.
    ///
    /// A failing engine process is reported as the final item, after every
    /// line it printed.
    fn for_each_ref(&self, query: &RefQuery) -> Result<RefLines<'_>, EngineError>;

    /// Resolve a ref name to the commit it (eventually) points at.
    fn resolve(&self, refname: &str) -> Result<Oid, EngineError>;

    /// Read a commit.
    fn commit(&self, id: &Oid) -> Result<Commit, EngineError>;

    /// Best common ancestor of two commits, if they share history.
    fn merge_base(&self, a: &Oid, b: &Oid) -> Result<Option<Oid>, EngineError>;

    /// Apply a finalized batch read from the current position of `spool`.
    ///
    /// All or nothing: on error the store is unchanged.
    fn apply_batch(&mut self, spool: &mut File) -> Result<(), EngineError>;

    /// Compact ref storage (pack loose refs).
    fn compact(&mut self) -> Result<(), EngineError>;
}

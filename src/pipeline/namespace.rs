//! pipeline::namespace
//!
//! Move per-developer branches into hashed gitnamespaces.
//!
//! `refs/heads/<user>/<rest>` becomes
//! `refs/namespaces/<ns>/refs/heads/<user>/<rest>`, where `<ns>` comes from a
//! [`NamespaceHasher`]. All moves go into one transaction (creates and
//! deletes together), followed by compaction.
//!
//! Branches with no user segment, such as the primary branch, stay where
//! they are.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{Seek, SeekFrom, Write};

use thiserror::Error;
use tracing::{debug, info};

use crate::core::reference::{is_valid_segment, lstrip, REFS_HEADS, REFS_NAMESPACES};
use crate::git::process::{Invocation, Timeouts};
use crate::git::{iter_refs, EngineError, RefStore, Transaction, TransactionError};

/// Errors from the dev-namespace rewrite.
#[derive(Debug, Error)]
pub enum NamespaceError {
    /// The hasher returned no namespace for a user that owns branches.
    #[error("hasher returned no namespace for user {user:?}")]
    UnmappedUser { user: String },

    /// A hasher output line is not `user<TAB>namespace`.
    #[error("malformed hasher output line: {line:?}")]
    MalformedMapping { line: String },

    /// The hasher process failed.
    #[error("namespace hasher failed")]
    Hasher(#[source] EngineError),

    #[error("failed to enumerate refs")]
    Enumerate(#[source] EngineError),

    #[error("failed to compact refs")]
    Compact(#[source] EngineError),

    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error("namespace hash command is empty")]
    EmptyCommand,

    #[error("hasher input spool failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Maps usernames to namespace ids.
pub trait NamespaceHasher {
    /// Namespace for each of `users`. Extra entries are ignored.
    fn hash(&self, users: &[String]) -> Result<BTreeMap<String, String>, NamespaceError>;
}

/// Hasher backed by an external command.
///
/// Usernames go to stdin one per line; each stdout line is
/// `user<TAB>namespace`.
#[derive(Debug, Clone)]
pub struct CommandHasher {
    argv: Vec<String>,
    timeouts: Timeouts,
}

impl CommandHasher {
    /// # Errors
    ///
    /// [`NamespaceError::EmptyCommand`] if `argv` names no program.
    pub fn new(argv: Vec<String>, timeouts: Timeouts) -> Result<Self, NamespaceError> {
        if argv.first().map_or(true, |program| program.is_empty()) {
            return Err(NamespaceError::EmptyCommand);
        }
        Ok(Self { argv, timeouts })
    }
}

impl NamespaceHasher for CommandHasher {
    fn hash(&self, users: &[String]) -> Result<BTreeMap<String, String>, NamespaceError> {
        let mut input = tempfile::tempfile()?;
        for user in users {
            writeln!(input, "{user}")?;
        }
        input.seek(SeekFrom::Start(0))?;

        let (program, args) = match self.argv.split_first() {
            Some(split) => split,
            None => return Err(NamespaceError::EmptyCommand),
        };
        let output = Invocation::new(program, args.iter().cloned(), self.timeouts)
            .output_with_input(Some(&input))
            .map_err(NamespaceError::Hasher)?;

        parse_mapping(&output)
    }
}

fn parse_mapping(output: &str) -> Result<BTreeMap<String, String>, NamespaceError> {
    let mut mapping = BTreeMap::new();
    for line in output.lines().filter(|l| !l.trim().is_empty()) {
        let malformed = || NamespaceError::MalformedMapping {
            line: line.to_string(),
        };
        let (user, ns) = line.split_once('\t').ok_or_else(malformed)?;
        let ns = ns.trim();
        if user.is_empty() || !is_valid_segment(ns) {
            return Err(malformed());
        }
        mapping.insert(user.to_string(), ns.to_string());
    }
    Ok(mapping)
}

/// Sorted, distinct users that own `refs/heads/<user>/...` branches.
pub fn usernames<S: RefStore + ?Sized>(store: &S) -> Result<Vec<String>, NamespaceError> {
    let mut users = BTreeSet::new();
    for reference in iter_refs(store, REFS_HEADS, None).map_err(NamespaceError::Enumerate)? {
        let reference = reference.map_err(NamespaceError::Enumerate)?;
        if let Some((user, _)) = reference.lstrip(2).and_then(|rel| rel.split_once('/')) {
            users.insert(user.to_string());
        }
    }
    Ok(users.into_iter().collect())
}

/// Namespaced name for a branch: `refs/namespaces/<ns>/refs/heads/<rel>`.
pub fn dev_namespace_ref(ns: &str, name: &str) -> Option<String> {
    let relative = lstrip(name, 2)?;
    Some(format!("{REFS_NAMESPACES}/{ns}/{REFS_HEADS}/{relative}"))
}

/// Outcome of a rewrite.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct NamespaceReport {
    /// `(old, new)` pairs, in enumeration order.
    pub moved: Vec<(String, String)>,
    /// Branches without a user segment.
    pub skipped: Vec<String>,
}

/// Move every user branch into its hashed namespace.
///
/// # Errors
///
/// Nothing is written if any user is missing from the hasher's output.
pub fn namespace_devs<S, H>(store: &mut S, hasher: &H) -> Result<NamespaceReport, NamespaceError>
where
    S: RefStore + ?Sized,
    H: NamespaceHasher + ?Sized,
{
    let users = usernames(&*store)?;
    if users.is_empty() {
        info!("no developer branches to namespace");
        return Ok(NamespaceReport::default());
    }
    info!(users = users.len(), "hashing usernames");
    let mapping = hasher.hash(&users)?;

    let mut report = NamespaceReport::default();
    let mut tx = Transaction::new()?;

    for reference in iter_refs(&*store, REFS_HEADS, None).map_err(NamespaceError::Enumerate)? {
        let reference = reference.map_err(NamespaceError::Enumerate)?;
        let Some((user, _)) = reference.lstrip(2).and_then(|rel| rel.split_once('/')) else {
            debug!(refname = reference.name(), "no user segment, leaving in place");
            report.skipped.push(reference.name().to_string());
            continue;
        };
        let ns = mapping
            .get(user)
            .ok_or_else(|| NamespaceError::UnmappedUser {
                user: user.to_string(),
            })?;
        let Some(new) = dev_namespace_ref(ns, reference.name()) else {
            continue;
        };

        tx.create(&new, reference.target())?;
        tx.delete(reference.name())?;
        report.moved.push((reference.name().to_string(), new));
    }

    if report.moved.is_empty() {
        return Ok(report);
    }
    tx.apply(&mut *store)?;
    store.compact().map_err(NamespaceError::Compact)?;

    info!(count = report.moved.len(), "moved branches into namespaces");
    Ok(report)
}

//! core::rename_index
//!
//! Conflict-free planning of reference renames.
//!
//! # Architecture
//!
//! Ref names form a hierarchy in which a name and any of its own path
//! prefixes cannot coexist (`refs/heads/a/b` blocks `refs/heads/a/b/c` and
//! vice versa). The index places every proposed *new* name into an in-memory
//! trie of directories and leaves, so collisions are found before anything
//! touches the live store.
//!
//! When a placement collides, the entry already in the trie is displaced by
//! appending `_` to its own final segment (moving a whole subtree when the
//! obstacle is a directory), and placement is retried. Each proposal gets at
//! most [`DEFAULT_MAX_ATTEMPTS`] attempts; running out is a hard
//! [`RenameError::Exhausted`].
//!
//! Refs that already exist in the store are not in the trie and cannot be
//! displaced. [`RenameIndex::propose_around`] takes them as a set of live
//! names: the candidate is first moved clear of them with [`first_free`],
//! and a displacement never lands on or around one.
//!
//! # Invariants
//!
//! - No leaf path is a strict prefix of another leaf path
//! - No two leaves share a path
//! - No leaf path nests with, or equals, a live name it was proposed around
//! - Every proposed old name appears exactly once in [`RenameIndex::walk`]
//!
//! # Example
//!
//! ```
//! use refkeeper::core::rename_index::RenameIndex;
//!
//! let mut index = RenameIndex::new();
//! index.propose("refs/heads/a/b", "refs/heads/old1").unwrap();
//! index.propose("refs/heads/a/b/c", "refs/heads/old2").unwrap();
//!
//! assert_eq!(index.conflicts().len(), 1);
//! assert_eq!(
//!     index.walk(),
//!     vec![
//!         ("refs/heads/a/b/c".to_string(), "refs/heads/old2".to_string()),
//!         ("refs/heads/a/b_".to_string(), "refs/heads/old1".to_string()),
//!     ]
//! );
//! ```

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;
use tracing::debug;

/// Attempts allowed per proposal before giving up.
pub const DEFAULT_MAX_ATTEMPTS: usize = 3;

const DISPLACE_SUFFIX: char = '_';

static NO_LIVE_NAMES: BTreeSet<String> = BTreeSet::new();

/// Errors from rename planning.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RenameError {
    /// Displacement did not clear a path within the attempt budget.
    #[error("ran out of rename attempts for {old} -> {new} after {attempts} tries")]
    Exhausted {
        old: String,
        new: String,
        attempts: usize,
    },

    /// The proposed name cannot be a ref path at all.
    #[error("invalid rename target {new:?} for {old}")]
    InvalidName { old: String, new: String },
}

/// A collision found (and resolved) while placing a name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameConflict {
    /// The name being placed.
    pub candidate: String,
    /// The path already present that blocked it.
    pub existing: String,
    /// Where the existing entry was moved to.
    pub displaced_to: String,
}

#[derive(Debug, Clone)]
enum Node {
    Dir(BTreeMap<String, Node>),
    Leaf(String),
}

/// Staging index of new ref names, keyed by path segment.
#[derive(Debug, Clone)]
pub struct RenameIndex {
    root: BTreeMap<String, Node>,
    conflicts: Vec<NameConflict>,
    max_attempts: usize,
    len: usize,
}

impl Default for RenameIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl RenameIndex {
    /// Create an empty index with the default attempt budget.
    pub fn new() -> Self {
        Self::with_max_attempts(DEFAULT_MAX_ATTEMPTS)
    }

    /// Create an empty index with a custom attempt budget.
    pub fn with_max_attempts(max_attempts: usize) -> Self {
        Self {
            root: BTreeMap::new(),
            conflicts: Vec::new(),
            max_attempts,
            len: 0,
        }
    }

    /// Number of placed entries.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if nothing has been placed.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Conflicts resolved so far, in the order they occurred.
    pub fn conflicts(&self) -> &[NameConflict] {
        &self.conflicts
    }

    /// Place `new_name`, remembering that it came from `old_name`.
    ///
    /// # Errors
    ///
    /// - [`RenameError::InvalidName`] for empty names or names with empty
    ///   segments
    /// - [`RenameError::Exhausted`] if the attempt budget runs out
    pub fn propose(&mut self, new_name: &str, old_name: &str) -> Result<(), RenameError> {
        self.propose_around(new_name, old_name, &NO_LIVE_NAMES)
    }

    /// Place `new_name` clear of the names in `live`.
    ///
    /// `live` holds refs that exist in the store and stay where they are.
    /// Moving the candidate clear of them does not count against the
    /// attempt budget.
    ///
    /// # Errors
    ///
    /// Same as [`RenameIndex::propose`].
    pub fn propose_around(
        &mut self,
        new_name: &str,
        old_name: &str,
        live: &BTreeSet<String>,
    ) -> Result<(), RenameError> {
        if new_name.is_empty() || new_name.split('/').any(str::is_empty) {
            return Err(RenameError::InvalidName {
                old: old_name.to_string(),
                new: new_name.to_string(),
            });
        }
        let candidate = first_free(new_name, live);
        let segments: Vec<&str> = candidate.split('/').collect();

        for _ in 0..self.max_attempts {
            match place(&mut self.root, &segments, old_name) {
                Ok(()) => {
                    self.len += 1;
                    return Ok(());
                }
                Err(blocked_at) => {
                    let existing = segments[..=blocked_at].join("/");
                    let displaced_to = displace(
                        &mut self.root,
                        &segments[..blocked_at],
                        segments[blocked_at],
                        live,
                    );
                    debug!(
                        candidate = %candidate,
                        existing = %existing,
                        displaced_to = %displaced_to,
                        "rename conflict resolved by displacement"
                    );
                    self.conflicts.push(NameConflict {
                        candidate: candidate.clone(),
                        existing,
                        displaced_to,
                    });
                }
            }
        }

        Err(RenameError::Exhausted {
            old: old_name.to_string(),
            new: new_name.to_string(),
            attempts: self.max_attempts,
        })
    }

    /// All placed entries as `(new_name, old_name)`, sorted by new name.
    ///
    /// Walking does not consume the index; repeated walks agree.
    pub fn walk(&self) -> Vec<(String, String)> {
        let mut out = Vec::with_capacity(self.len);
        collect(&self.root, &mut Vec::new(), &mut out);
        out.sort();
        out
    }
}

/// Adjust `candidate` until it collides with nothing in `occupied`.
///
/// `occupied` holds names that already exist and cannot be displaced (live
/// refs). A candidate blocked by an occupied leaf at one of its prefixes, or
/// that would itself become a prefix of an occupied name, has `_` appended to
/// the blocking segment. Returns `candidate` unchanged when it is free.
///
/// ```
/// use std::collections::BTreeSet;
/// use refkeeper::core::rename_index::first_free;
///
/// let occupied: BTreeSet<String> = ["refs/heads/unknown/x".to_string()].into();
/// assert_eq!(first_free("refs/heads/unknown/x", &occupied), "refs/heads/unknown/x_");
/// assert_eq!(first_free("refs/heads/unknown/x/y", &occupied), "refs/heads/unknown/x_/y");
/// assert_eq!(first_free("refs/heads/unknown/z", &occupied), "refs/heads/unknown/z");
/// ```
pub fn first_free(candidate: &str, occupied: &BTreeSet<String>) -> String {
    let mut segments: Vec<String> = candidate.split('/').map(str::to_string).collect();
    while let Some(blocked_at) = blocking_segment(&segments, occupied) {
        segments[blocked_at].push(DISPLACE_SUFFIX);
    }
    segments.join("/")
}

fn blocking_segment(segments: &[String], occupied: &BTreeSet<String>) -> Option<usize> {
    let last = segments.len().checked_sub(1)?;
    let mut path = String::new();
    for (i, segment) in segments.iter().enumerate() {
        if i > 0 {
            path.push('/');
        }
        path.push_str(segment);
        if occupied.contains(&path) {
            return Some(i);
        }
    }
    has_descendant(&path, occupied).then_some(last)
}

/// Check if some name in `names` lives under `path/`.
fn has_descendant(path: &str, names: &BTreeSet<String>) -> bool {
    let dir = format!("{path}/");
    names
        .range(dir.clone()..)
        .next()
        .is_some_and(|name| name.starts_with(&dir))
}

/// Try to place a leaf; on collision return the index of the blocking segment.
fn place(root: &mut BTreeMap<String, Node>, segments: &[&str], old: &str) -> Result<(), usize> {
    let Some((leaf, parents)) = segments.split_last() else {
        return Err(0);
    };

    let mut level = root;
    for (i, segment) in parents.iter().enumerate() {
        let node = level
            .entry(segment.to_string())
            .or_insert_with(|| Node::Dir(BTreeMap::new()));
        match node {
            Node::Dir(children) => level = children,
            Node::Leaf(_) => return Err(i),
        }
    }

    if level.contains_key(*leaf) {
        // Either an exact duplicate leaf or a reserved directory.
        return Err(parents.len());
    }
    level.insert(leaf.to_string(), Node::Leaf(old.to_string()));
    Ok(())
}

/// Move the node at `parents/target` aside to the first `target_...` sibling
/// that is free in the trie and clear of every live name.
fn displace(
    root: &mut BTreeMap<String, Node>,
    parents: &[&str],
    target: &str,
    live: &BTreeSet<String>,
) -> String {
    let mut level = root;
    for segment in parents {
        // Parents of a blocking node are always directories.
        let Some(Node::Dir(children)) = level.get_mut(*segment) else {
            return format!("{}/{target}", parents.join("/"));
        };
        level = children;
    }

    let base = parents.join("/");
    let live_at = |segment: &str| {
        let path = if base.is_empty() {
            segment.to_string()
        } else {
            format!("{base}/{segment}")
        };
        live.contains(&path) || has_descendant(&path, live)
    };

    let mut new_segment = format!("{target}{DISPLACE_SUFFIX}");
    while level.contains_key(&new_segment) || live_at(&new_segment) {
        new_segment.push(DISPLACE_SUFFIX);
    }

    if let Some(node) = level.remove(target) {
        level.insert(new_segment.clone(), node);
    }

    let mut moved: Vec<&str> = parents.to_vec();
    moved.push(&new_segment);
    moved.join("/")
}

fn collect(level: &BTreeMap<String, Node>, prefix: &mut Vec<String>, out: &mut Vec<(String, String)>) {
    for (segment, node) in level {
        prefix.push(segment.clone());
        match node {
            Node::Leaf(old) => out.push((prefix.join("/"), old.clone())),
            Node::Dir(children) => collect(children, prefix, out),
        }
        prefix.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_prefix_conflict(a: &str, b: &str) -> bool {
        a == b || b.starts_with(&format!("{a}/")) || a.starts_with(&format!("{b}/"))
    }

    fn assert_conflict_free(pairs: &[(String, String)]) {
        for (i, (a, _)) in pairs.iter().enumerate() {
            for (b, _) in &pairs[i + 1..] {
                assert!(!is_prefix_conflict(a, b), "{a} conflicts with {b}");
            }
        }
    }

    #[test]
    fn leaf_then_child_conflicts_once() {
        let mut index = RenameIndex::new();
        index.propose("a/b", "old1").unwrap();
        index.propose("a/b/c", "old2").unwrap();

        assert_eq!(index.conflicts().len(), 1);
        assert_eq!(index.conflicts()[0].existing, "a/b");
        let pairs = index.walk();
        assert_eq!(pairs.len(), 2);
        assert_conflict_free(&pairs);
    }

    #[test]
    fn child_then_leaf_conflicts_once() {
        let mut index = RenameIndex::new();
        index.propose("a/b/c", "old2").unwrap();
        index.propose("a/b", "old1").unwrap();

        assert_eq!(index.conflicts().len(), 1);
        let pairs = index.walk();
        assert_eq!(
            pairs,
            vec![
                ("a/b".to_string(), "old1".to_string()),
                ("a/b_/c".to_string(), "old2".to_string()),
            ]
        );
    }

    #[test]
    fn walk_is_repeatable() {
        let mut index = RenameIndex::new();
        index.propose("a/b/c", "x").unwrap();
        index.propose("a/b", "y").unwrap();
        assert_eq!(index.walk(), index.walk());
    }

    #[test]
    fn duplicate_names_keep_both_origins() {
        let mut index = RenameIndex::new();
        index.propose("heads/u/al/x", "one").unwrap();
        index.propose("heads/u/al/x", "two").unwrap();

        let olds: Vec<String> = index.walk().into_iter().map(|(_, old)| old).collect();
        assert_eq!(olds.len(), 2);
        assert!(olds.contains(&"one".to_string()));
        assert!(olds.contains(&"two".to_string()));
    }

    #[test]
    fn displacement_skips_taken_suffixes() {
        let mut index = RenameIndex::new();
        index.propose("a/b", "1").unwrap();
        index.propose("a/b", "2").unwrap();
        index.propose("a/b", "3").unwrap();

        let news: Vec<String> = index.walk().into_iter().map(|(new, _)| new).collect();
        assert_eq!(news, vec!["a/b", "a/b_", "a/b__"]);
    }

    #[test]
    fn deep_leaf_blocks_at_intermediate_segment() {
        let mut index = RenameIndex::new();
        index.propose("a", "1").unwrap();
        index.propose("a/b/c/d", "2").unwrap();

        assert_eq!(index.conflicts()[0].existing, "a");
        assert_eq!(index.conflicts()[0].displaced_to, "a_");
        assert_conflict_free(&index.walk());
    }

    #[test]
    fn exhausted_budget_is_an_error() {
        let mut index = RenameIndex::with_max_attempts(1);
        index.propose("a/b", "1").unwrap();
        let err = index.propose("a/b", "2").unwrap_err();
        assert_eq!(
            err,
            RenameError::Exhausted {
                old: "2".to_string(),
                new: "a/b".to_string(),
                attempts: 1,
            }
        );
    }

    #[test]
    fn empty_segments_rejected() {
        let mut index = RenameIndex::new();
        assert!(matches!(
            index.propose("a//b", "x"),
            Err(RenameError::InvalidName { .. })
        ));
        assert!(index.propose("", "x").is_err());
        assert!(index.is_empty());
    }

    #[test]
    fn first_free_leaves_free_names_alone() {
        let occupied: BTreeSet<String> = ["a/b".to_string()].into();
        assert_eq!(first_free("a/c", &occupied), "a/c");
    }

    #[test]
    fn first_free_avoids_live_directories() {
        let occupied: BTreeSet<String> = ["a/b/c".to_string(), "a/b_".to_string()].into();
        assert_eq!(first_free("a/b", &occupied), "a/b__");
    }

    #[test]
    fn first_free_avoids_live_ancestors() {
        let occupied: BTreeSet<String> = ["a".to_string()].into();
        assert_eq!(first_free("a/b/c", &occupied), "a_/b/c");
    }

    #[test]
    fn displacement_steps_over_live_names() {
        let live: BTreeSet<String> = ["u/al/fix_".to_string(), "u/al/fix__/x".to_string()].into();
        let mut index = RenameIndex::new();
        index.propose_around("u/al/fix", "one", &live).unwrap();
        index.propose_around("u/al/fix", "two", &live).unwrap();

        let news: Vec<String> = index.walk().into_iter().map(|(new, _)| new).collect();
        assert_eq!(news, vec!["u/al/fix", "u/al/fix___"]);
        assert_eq!(index.conflicts()[0].displaced_to, "u/al/fix___");
    }

    #[test]
    fn candidates_move_clear_of_live_names_for_free() {
        let live: BTreeSet<String> = ["a/b".to_string(), "a/b_".to_string()].into();
        let mut index = RenameIndex::with_max_attempts(1);
        index.propose_around("a/b", "one", &live).unwrap();

        assert!(index.conflicts().is_empty());
        assert_eq!(index.walk(), vec![("a/b__".to_string(), "one".to_string())]);
    }

    #[test]
    fn walk_orders_by_full_name() {
        let mut index = RenameIndex::new();
        index.propose("a/b", "1").unwrap();
        index.propose("a-c", "2").unwrap();

        let news: Vec<String> = index.walk().into_iter().map(|(new, _)| new).collect();
        assert_eq!(news, vec!["a-c", "a/b"]);
    }
}

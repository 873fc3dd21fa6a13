//! git::memory
//!
//! Deterministic in-memory [`RefStore`] for tests.
//!
//! # Architecture
//!
//! Refs live in a sorted map; commits and annotated tags live in id-keyed
//! maps. Ids are derived from a counter, so every run of a test produces
//! the same ids. The store follows the same rules a real ref backend does:
//!
//! - batches arrive in the NUL-delimited `update-ref -z` format and must be
//!   framed by `start` ... `prepare` `commit`
//! - a batch is validated in full and applied all at once, or not at all
//! - `create` of an existing ref fails, as does any target that is not a
//!   known object
//! - a ref name and one of its own path prefixes cannot coexist
//!
//! A rejected batch reports [`EngineError::Failure`] with code 128, the same
//! status git uses. Call counters let tests observe exactly how many engine
//! round-trips an operation made.
//!
//! # Example
//!
//! ```
//! use chrono::Utc;
//! use refkeeper::git::{MemoryStore, RefStore};
//!
//! let mut store = MemoryStore::new();
//! let tip = store.add_branch("refs/heads/master", "dev@twitter.com", Utc::now());
//! assert_eq!(store.resolve("refs/heads/master").unwrap(), tip);
//! ```

use std::cell::Cell;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::debug;

use super::{EngineError, RefFormat, RefLines, RefQuery, RefStore};
use crate::core::reference::{Commit, Signature};
use crate::core::types::Oid;

const REJECTED: i32 = 128;

/// In-memory ref store.
#[derive(Debug)]
pub struct MemoryStore {
    git_dir: PathBuf,
    refs: BTreeMap<String, Oid>,
    commits: HashMap<Oid, Commit>,
    /// Annotated tag object -> tagged commit.
    tags: HashMap<Oid, Oid>,
    next_id: u64,
    enumerate_calls: Cell<usize>,
    apply_calls: usize,
    compact_calls: usize,
    fail_next_apply: Option<i32>,
    last_rejection: Option<String>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Op {
    Create { name: String, new: String },
    Update { name: String, new: String, old: String },
    Delete { name: String, old: String },
}

impl Op {
    fn name(&self) -> &str {
        match self {
            Op::Create { name, .. } | Op::Update { name, .. } | Op::Delete { name, .. } => name,
        }
    }
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            git_dir: PathBuf::from("memory.git"),
            refs: BTreeMap::new(),
            commits: HashMap::new(),
            tags: HashMap::new(),
            next_id: 0,
            enumerate_calls: Cell::new(0),
            apply_calls: 0,
            compact_calls: 0,
            fail_next_apply: None,
            last_rejection: None,
        }
    }

    fn fresh_id(&mut self, kind: &str) -> Oid {
        self.next_id += 1;
        let digest = Sha256::digest(format!("{kind}-{}", self.next_id));
        Oid::from_digest(&digest)
    }

    /// Add a commit authored and committed by `email` at `time`.
    pub fn add_commit(&mut self, email: &str, time: DateTime<Utc>, parents: &[Oid]) -> Oid {
        let id = self.fresh_id("commit");
        let sig = Signature {
            email: email.to_string(),
            name: email.split('@').next().unwrap_or_default().to_string(),
            time,
        };
        let tree_id = self.fresh_id("tree");
        self.commits.insert(
            id.clone(),
            Commit {
                id: id.clone(),
                author: sig.clone(),
                committer: sig,
                message: format!("commit {}", self.next_id),
                parent_ids: parents.to_vec(),
                tree_id,
            },
        );
        id
    }

    /// Point `name` at `id`, bypassing batch validation.
    pub fn set_ref(&mut self, name: &str, id: &Oid) {
        self.refs.insert(name.to_string(), id.clone());
    }

    /// Add a root commit and point `name` at it.
    pub fn add_branch(&mut self, name: &str, email: &str, time: DateTime<Utc>) -> Oid {
        let id = self.add_commit(email, time, &[]);
        self.set_ref(name, &id);
        id
    }

    /// Add an annotated tag object for `commit` and point `name` at it.
    pub fn add_annotated_tag(&mut self, name: &str, commit: &Oid) -> Oid {
        let tag = self.fresh_id("tag");
        self.tags.insert(tag.clone(), commit.clone());
        self.set_ref(name, &tag);
        tag
    }

    /// The raw target of `name`.
    pub fn get(&self, name: &str) -> Option<&Oid> {
        self.refs.get(name)
    }

    /// All ref names, sorted.
    pub fn ref_names(&self) -> Vec<String> {
        self.refs.keys().cloned().collect()
    }

    /// Number of [`RefStore::for_each_ref`] calls so far.
    pub fn enumerate_calls(&self) -> usize {
        self.enumerate_calls.get()
    }

    /// Number of [`RefStore::apply_batch`] calls so far, rejected ones included.
    pub fn apply_calls(&self) -> usize {
        self.apply_calls
    }

    /// Number of [`RefStore::compact`] calls so far.
    pub fn compact_calls(&self) -> usize {
        self.compact_calls
    }

    /// Reject the next batch with `code`, leaving refs unchanged.
    pub fn fail_next_apply(&mut self, code: i32) {
        self.fail_next_apply = Some(code);
    }

    /// Why the most recent batch was rejected.
    pub fn last_rejection(&self) -> Option<&str> {
        self.last_rejection.as_deref()
    }

    fn peel(&self, id: &Oid) -> Oid {
        self.tags.get(id).cloned().unwrap_or_else(|| id.clone())
    }

    fn is_object(&self, id: &Oid) -> bool {
        self.commits.contains_key(id) || self.tags.contains_key(id)
    }

    fn record(&self, name: &str, id: &Oid, format: &RefFormat) -> Result<String, EngineError> {
        let peeled = self.peel(id);
        let email = || {
            self.commits
                .get(&peeled)
                .map(|c| c.author.email.clone())
                .unwrap_or_default()
        };
        match format {
            RefFormat::Name => Ok(name.to_string()),
            RefFormat::NameAndCommit => Ok(format!("{name}\t{peeled}")),
            RefFormat::NameCommitEmail => Ok(format!("{name}\t{peeled}\t{}", email())),
            RefFormat::Custom(f) => Err(EngineError::Unsupported {
                operation: format!("custom format {f:?}"),
            }),
        }
    }

    fn sorted(&self, matching: Vec<(&String, &Oid)>, key: Option<&str>) -> Result<Vec<(String, Oid)>, EngineError> {
        let mut rows: Vec<(String, Oid)> = matching
            .into_iter()
            .map(|(n, id)| (n.clone(), id.clone()))
            .collect();

        let (descending, key) = match key {
            Some(k) => match k.strip_prefix('-') {
                Some(rest) => (true, rest),
                None => (false, k),
            },
            None => (false, "refname"),
        };

        match key {
            "refname" => {}
            "authordate" | "committerdate" => {
                let time = |id: &Oid| {
                    self.commits.get(&self.peel(id)).map(|c| {
                        if key == "authordate" {
                            c.author.time
                        } else {
                            c.committer.time
                        }
                    })
                };
                rows.sort_by_key(|(_, id)| time(id));
            }
            other => {
                return Err(EngineError::Unsupported {
                    operation: format!("sort key {other:?}"),
                })
            }
        }
        if descending {
            rows.reverse();
        }
        Ok(rows)
    }

    fn reject(&mut self, reason: String) -> EngineError {
        debug!(reason = %reason, "memory store rejected batch");
        self.last_rejection = Some(reason);
        EngineError::Failure {
            args: batch_args(),
            code: REJECTED,
        }
    }

    fn apply_ops(&self, ops: &[Op]) -> Result<BTreeMap<String, Oid>, String> {
        let mut seen = BTreeSet::new();
        let mut next = self.refs.clone();

        for op in ops {
            let name = op.name();
            if !is_valid_refname(name) {
                return Err(format!("invalid ref name {name:?}"));
            }
            if !seen.insert(name.to_string()) {
                return Err(format!("multiple updates for ref {name:?}"));
            }

            match op {
                Op::Create { name, new } => {
                    let id = self.known_object(new)?;
                    if next.contains_key(name) {
                        return Err(format!("{name}: reference already exists"));
                    }
                    next.insert(name.clone(), id);
                }
                Op::Update { name, new, old } => {
                    let id = self.known_object(new)?;
                    check_old(&next, name, old)?;
                    next.insert(name.clone(), id);
                }
                Op::Delete { name, old } => {
                    check_old(&next, name, old)?;
                    next.remove(name);
                }
            }
        }

        if let Some((short, long)) = first_prefix_conflict(&next) {
            return Err(format!("{long}: cannot coexist with {short}"));
        }
        Ok(next)
    }

    fn known_object(&self, raw: &str) -> Result<Oid, String> {
        let id = Oid::new(raw).map_err(|e| e.to_string())?;
        if self.is_object(&id) {
            Ok(id)
        } else {
            Err(format!("trying to write ref with nonexistent object {id}"))
        }
    }

    fn ancestors(&self, start: &Oid) -> HashMap<Oid, usize> {
        let mut depth = HashMap::new();
        let mut queue = VecDeque::from([(start.clone(), 0usize)]);
        while let Some((id, d)) = queue.pop_front() {
            if depth.contains_key(&id) {
                continue;
            }
            depth.insert(id.clone(), d);
            if let Some(commit) = self.commits.get(&id) {
                for parent in &commit.parent_ids {
                    queue.push_back((parent.clone(), d + 1));
                }
            }
        }
        depth
    }
}

fn batch_args() -> Vec<String> {
    ["memory", "update-ref", "--no-deref", "--stdin", "-z"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn check_old(refs: &BTreeMap<String, Oid>, name: &str, old: &str) -> Result<(), String> {
    if old.is_empty() {
        return Ok(());
    }
    match refs.get(name) {
        Some(current) if current.as_str() == old => Ok(()),
        _ => Err(format!("{name}: is not at expected {old}")),
    }
}

fn is_valid_refname(name: &str) -> bool {
    name.starts_with("refs/")
        && !name.ends_with('/')
        && !name.contains("..")
        && name.split('/').all(|segment| !segment.is_empty())
}

/// First pair where one name is a path prefix of the other.
fn first_prefix_conflict(refs: &BTreeMap<String, Oid>) -> Option<(String, String)> {
    for name in refs.keys() {
        let dir = format!("{name}/");
        if let Some(child) = refs.range(dir.clone()..).next().map(|(k, _)| k) {
            if child.starts_with(&dir) {
                return Some((name.clone(), child.clone()));
            }
        }
    }
    None
}

/// Parse a framed `update-ref -z` batch.
fn parse_batch(data: &[u8]) -> Result<Vec<Op>, String> {
    let text = std::str::from_utf8(data).map_err(|_| "batch is not UTF-8".to_string())?;
    let body = text
        .strip_suffix('\0')
        .ok_or_else(|| "batch does not end with NUL".to_string())?;
    let mut tokens = body.split('\0');
    let mut next = |what: &str| {
        tokens
            .next()
            .map(str::to_string)
            .ok_or_else(|| format!("batch truncated, expected {what}"))
    };

    if next("start")? != "start" {
        return Err("batch does not begin with start".to_string());
    }

    let mut ops = Vec::new();
    loop {
        let command = next("command")?;
        if command == "prepare" {
            break;
        }
        if let Some(name) = command.strip_prefix("create ") {
            let new = next("new value")?;
            ops.push(Op::Create { name: name.to_string(), new });
        } else if let Some(name) = command.strip_prefix("update ") {
            let new = next("new value")?;
            let old = next("old value")?;
            ops.push(Op::Update { name: name.to_string(), new, old });
        } else if let Some(name) = command.strip_prefix("delete ") {
            let old = next("old value")?;
            ops.push(Op::Delete { name: name.to_string(), old });
        } else {
            return Err(format!("unknown command {command:?}"));
        }
    }

    if next("commit")? != "commit" {
        return Err("prepare not followed by commit".to_string());
    }
    if let Ok(extra) = next("end") {
        return Err(format!("trailing data after commit: {extra:?}"));
    }
    Ok(ops)
}

impl RefStore for MemoryStore {
    fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    fn for_each_ref(&self, query: &RefQuery) -> Result<RefLines<'_>, EngineError> {
        self.enumerate_calls.set(self.enumerate_calls.get() + 1);

        let matching: Vec<(&String, &Oid)> = self
            .refs
            .iter()
            .filter(|(name, _)| name.starts_with(query.pattern()))
            .collect();
        let rows = self.sorted(matching, query.sort())?;
        let format = query.format().clone();

        Ok(Box::new(
            rows.into_iter()
                .map(move |(name, id)| self.record(&name, &id, &format)),
        ))
    }

    fn resolve(&self, refname: &str) -> Result<Oid, EngineError> {
        let id = self
            .refs
            .get(refname)
            .ok_or_else(|| EngineError::RefNotFound {
                refname: refname.to_string(),
            })?;
        Ok(self.peel(id))
    }

    fn commit(&self, id: &Oid) -> Result<Commit, EngineError> {
        self.commits
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::ObjectNotFound {
                oid: id.to_string(),
            })
    }

    fn merge_base(&self, a: &Oid, b: &Oid) -> Result<Option<Oid>, EngineError> {
        for id in [a, b] {
            if !self.commits.contains_key(id) {
                return Err(EngineError::ObjectNotFound { oid: id.to_string() });
            }
        }
        let from_a = self.ancestors(a);
        let from_b = self.ancestors(b);

        // Nearest common ancestor; ties broken by newer commit time, then id.
        let best = from_a
            .iter()
            .filter_map(|(id, da)| from_b.get(id).map(|db| (id, da + db)))
            .min_by(|(x, dx), (y, dy)| {
                let tx = self.commits.get(*x).map(|c| c.committer.time);
                let ty = self.commits.get(*y).map(|c| c.committer.time);
                dx.cmp(dy).then(ty.cmp(&tx)).then(x.cmp(y))
            })
            .map(|(id, _)| id.clone());
        Ok(best)
    }

    fn apply_batch(&mut self, spool: &mut File) -> Result<(), EngineError> {
        self.apply_calls += 1;

        let mut data = Vec::new();
        spool.read_to_end(&mut data)?;

        if let Some(code) = self.fail_next_apply.take() {
            self.last_rejection = Some("injected failure".to_string());
            return Err(EngineError::Failure {
                args: batch_args(),
                code,
            });
        }

        let ops = match parse_batch(&data) {
            Ok(ops) => ops,
            Err(reason) => return Err(self.reject(reason)),
        };
        match self.apply_ops(&ops) {
            Ok(next) => {
                debug!(ops = ops.len(), "memory store applied batch");
                self.refs = next;
                self.last_rejection = None;
                Ok(())
            }
            Err(reason) => Err(self.reject(reason)),
        }
    }

    fn compact(&mut self) -> Result<(), EngineError> {
        self.compact_calls += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Seek, SeekFrom, Write};

    fn spool(bytes: &[u8]) -> File {
        let mut f = tempfile::tempfile().unwrap();
        f.write_all(bytes).unwrap();
        f.seek(SeekFrom::Start(0)).unwrap();
        f
    }

    fn store_with_master() -> (MemoryStore, Oid) {
        let mut store = MemoryStore::new();
        let id = store.add_branch("refs/heads/master", "a@twitter.com", Utc::now());
        (store, id)
    }

    #[test]
    fn ids_are_deterministic() {
        let (a, ida) = store_with_master();
        let (b, idb) = store_with_master();
        assert_eq!(ida, idb);
        assert_eq!(a.ref_names(), b.ref_names());
    }

    #[test]
    fn framed_batch_applies() {
        let (mut store, id) = store_with_master();
        let batch = format!("start\0create refs/heads/x\0{id}\0delete refs/heads/master\0\0prepare\0commit\0");
        store.apply_batch(&mut spool(batch.as_bytes())).unwrap();
        assert_eq!(store.ref_names(), vec!["refs/heads/x"]);
        assert_eq!(store.apply_calls(), 1);
    }

    #[test]
    fn unframed_batch_rejected() {
        let (mut store, id) = store_with_master();
        let batch = format!("create refs/heads/x\0{id}\0");
        let err = store.apply_batch(&mut spool(batch.as_bytes())).unwrap_err();
        assert!(matches!(err, EngineError::Failure { code: 128, .. }));
        assert_eq!(store.ref_names(), vec!["refs/heads/master"]);
    }

    #[test]
    fn prefix_conflict_rejects_whole_batch() {
        let (mut store, id) = store_with_master();
        let batch = format!(
            "start\0create refs/heads/ok\0{id}\0create refs/heads/master/x\0{id}\0prepare\0commit\0"
        );
        assert!(store.apply_batch(&mut spool(batch.as_bytes())).is_err());
        assert!(store.last_rejection().unwrap().contains("cannot coexist"));
        assert_eq!(store.ref_names(), vec!["refs/heads/master"]);
    }

    #[test]
    fn create_existing_rejected() {
        let (mut store, id) = store_with_master();
        let batch = format!("start\0create refs/heads/master\0{id}\0prepare\0commit\0");
        assert!(store.apply_batch(&mut spool(batch.as_bytes())).is_err());
    }

    #[test]
    fn unknown_object_rejected() {
        let (mut store, _) = store_with_master();
        let batch = format!("start\0create refs/heads/x\0{}\0prepare\0commit\0", "f".repeat(40));
        assert!(store.apply_batch(&mut spool(batch.as_bytes())).is_err());
        assert!(store.last_rejection().unwrap().contains("nonexistent"));
    }

    #[test]
    fn update_and_old_value_check() {
        let (mut store, id) = store_with_master();
        let other = store.add_commit("b@twitter.com", Utc::now(), &[id.clone()]);

        let wrong_old = format!(
            "start\0update refs/heads/master\0{other}\0{}\0prepare\0commit\0",
            "0".repeat(40)
        );
        assert!(store.apply_batch(&mut spool(wrong_old.as_bytes())).is_err());

        let batch = format!("start\0update refs/heads/master\0{other}\0\0prepare\0commit\0");
        store.apply_batch(&mut spool(batch.as_bytes())).unwrap();
        assert_eq!(store.get("refs/heads/master"), Some(&other));
    }

    #[test]
    fn injected_failure_leaves_refs() {
        let (mut store, id) = store_with_master();
        store.fail_next_apply(1);
        let batch = format!("start\0create refs/heads/x\0{id}\0prepare\0commit\0");
        let err = store.apply_batch(&mut spool(batch.as_bytes())).unwrap_err();
        assert!(matches!(err, EngineError::Failure { code: 1, .. }));
        assert_eq!(store.ref_names(), vec!["refs/heads/master"]);

        store.apply_batch(&mut spool(batch.as_bytes())).unwrap();
        assert_eq!(store.apply_calls(), 2);
    }

    #[test]
    fn annotated_tags_peel() {
        let (mut store, id) = store_with_master();
        let tag = store.add_annotated_tag("refs/tags/v1", &id);
        assert_ne!(tag, id);
        assert_eq!(store.resolve("refs/tags/v1").unwrap(), id);

        let query = RefQuery::new("refs/tags", RefFormat::NameCommitEmail);
        let lines: Vec<String> = store
            .for_each_ref(&query)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(lines, vec![format!("refs/tags/v1\t{id}\ta@twitter.com")]);
    }

    #[test]
    fn enumeration_respects_prefix_boundary() {
        let (mut store, id) = store_with_master();
        store.set_ref("refs/headsup/x", &id);
        let query = RefQuery::new("refs/heads", RefFormat::Name);
        let lines: Vec<String> = store
            .for_each_ref(&query)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(lines, vec!["refs/heads/master"]);
        assert_eq!(store.enumerate_calls(), 1);
    }

    #[test]
    fn merge_base_finds_fork_point() {
        let mut store = MemoryStore::new();
        let root = store.add_commit("a@x", Utc::now(), &[]);
        let fork = store.add_commit("a@x", Utc::now(), &[root.clone()]);
        let left = store.add_commit("a@x", Utc::now(), &[fork.clone()]);
        let right = store.add_commit("a@x", Utc::now(), &[fork.clone()]);
        let lonely = store.add_commit("a@x", Utc::now(), &[]);

        assert_eq!(store.merge_base(&left, &right).unwrap(), Some(fork.clone()));
        assert_eq!(store.merge_base(&left, &fork).unwrap(), Some(fork));
        assert_eq!(store.merge_base(&left, &lonely).unwrap(), None);
    }

    #[test]
    fn custom_format_unsupported() {
        let (store, _) = store_with_master();
        let query = RefQuery::new("refs", RefFormat::Custom("%(objecttype)".into()));
        let first = store.for_each_ref(&query).unwrap().next().unwrap();
        assert!(matches!(first, Err(EngineError::Unsupported { .. })));
    }
}

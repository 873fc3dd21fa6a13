//! Integration tests for ref expiry against the in-memory store.

use chrono::{DateTime, TimeDelta, Utc};

use refkeeper::git::{MemoryStore, RefStore};
use refkeeper::pipeline::expire::ExpireReason;
use refkeeper::pipeline::{ExpireError, ExpirePolicy, Expiry};

const MASTER: &str = "refs/heads/master";

/// History shared by the policy tests.
///
/// ```text
/// base (old) --- head (new)           master
///     \             \
///      \             fresh (new)
///       +-- ancient (old)
///       +-- stale (new)
/// ```
struct History {
    store: MemoryStore,
    now: DateTime<Utc>,
}

impl History {
    fn new() -> Self {
        let now = Utc::now();
        let old = now - TimeDelta::days(200);
        let mut store = MemoryStore::new();

        let base = store.add_commit("ci@trusted.domain", old, &[]);
        let head = store.add_commit("ci@trusted.domain", now, &[base.clone()]);
        store.set_ref(MASTER, &head);

        let ancient = store.add_commit("a@trusted.domain", old, &[base.clone()]);
        store.set_ref("refs/heads/ancient", &ancient);
        let stale = store.add_commit("b@trusted.domain", now, &[base]);
        store.set_ref("refs/heads/stale", &stale);
        let fresh = store.add_commit("c@trusted.domain", now, &[head]);
        store.set_ref("refs/heads/fresh", &fresh);

        Self { store, now }
    }
}

fn names(report: &refkeeper::pipeline::ExpireReport) -> Vec<&str> {
    report.expired.iter().map(|e| e.name.as_str()).collect()
}

#[test]
fn each_policy_case() {
    let mut history = History::new();
    let now = history.now;

    let report = Expiry::new(&mut history.store, ExpirePolicy::new(MASTER))
        .at(now)
        .run()
        .unwrap();

    assert_eq!(names(&report), vec!["refs/heads/ancient", "refs/heads/stale"]);
    assert!(matches!(report.expired[0].reason, ExpireReason::TipAge { .. }));
    assert!(matches!(report.expired[1].reason, ExpireReason::MergeBaseAge { .. }));
    assert_eq!(report.retained, 1);
    assert_eq!(
        history.store.ref_names(),
        vec!["refs/heads/fresh", "refs/heads/master"]
    );
    assert_eq!(history.store.apply_calls(), 1);
    assert_eq!(history.store.compact_calls(), 1);
}

#[test]
fn tip_age_alone_keeps_stale_forks() {
    let mut history = History::new();
    let now = history.now;

    let policy = ExpirePolicy::new(MASTER).with_policies(true, false);
    let report = Expiry::new(&mut history.store, policy).at(now).run().unwrap();

    assert_eq!(names(&report), vec!["refs/heads/ancient"]);
}

#[test]
fn merge_base_alone_catches_both_old_forks() {
    let mut history = History::new();
    let now = history.now;

    let policy = ExpirePolicy::new(MASTER).with_policies(false, true);
    let report = Expiry::new(&mut history.store, policy).at(now).plan().unwrap();

    assert_eq!(names(&report), vec!["refs/heads/ancient", "refs/heads/stale"]);
    assert!(report
        .expired
        .iter()
        .all(|e| matches!(e.reason, ExpireReason::MergeBaseAge { .. })));
}

#[test]
fn plan_writes_nothing() {
    let mut history = History::new();
    let now = history.now;
    let before = history.store.ref_names();

    let report = Expiry::new(&mut history.store, ExpirePolicy::new(MASTER))
        .at(now)
        .plan()
        .unwrap();

    assert_eq!(report.expired.len(), 2);
    assert_eq!(history.store.ref_names(), before);
    assert_eq!(history.store.apply_calls(), 0);
    assert_eq!(history.store.compact_calls(), 0);
}

#[test]
fn wider_horizon_keeps_everything() {
    let mut history = History::new();
    let now = history.now;

    let policy = ExpirePolicy::new(MASTER).with_horizon_days(365);
    let report = Expiry::new(&mut history.store, policy).at(now).run().unwrap();

    assert!(report.expired.is_empty());
    assert_eq!(report.retained, 3);
    assert_eq!(history.store.apply_calls(), 0);
}

#[test]
fn pattern_limits_the_scan() {
    let mut history = History::new();
    let now = history.now;
    let old = now - TimeDelta::days(300);
    let note = history.store.add_commit("n@trusted.domain", old, &[]);
    history.store.set_ref("refs/notes/commits", &note);

    let policy = ExpirePolicy::new(MASTER).with_pattern("refs/notes");
    let report = Expiry::new(&mut history.store, policy).at(now).run().unwrap();

    assert_eq!(names(&report), vec!["refs/notes/commits"]);
    assert!(history.store.get("refs/heads/ancient").is_some());
}

#[test]
fn annotated_tags_age_by_their_commit() {
    let mut store = MemoryStore::new();
    let now = Utc::now();
    let head = store.add_branch(MASTER, "ci@trusted.domain", now);
    let old = store.add_commit("a@trusted.domain", now - TimeDelta::days(500), &[]);
    store.add_annotated_tag("refs/tags/v0", &old);
    store.add_annotated_tag("refs/tags/v1", &head);

    let policy = ExpirePolicy::new(MASTER).with_policies(true, false);
    let report = Expiry::new(&mut store, policy).at(now).run().unwrap();

    assert_eq!(names(&report), vec!["refs/tags/v0"]);
    assert!(store.resolve("refs/tags/v1").is_ok());
}

#[test]
fn missing_baseline_is_reported() {
    let mut store = MemoryStore::new();
    store.add_branch("refs/heads/x", "a@trusted.domain", Utc::now());

    let err = Expiry::new(&mut store, ExpirePolicy::new(MASTER))
        .plan()
        .unwrap_err();
    assert!(matches!(err, ExpireError::Baseline { ref refname, .. } if refname == MASTER));
}

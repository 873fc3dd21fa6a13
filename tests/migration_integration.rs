//! Integration tests for the migration pipeline.
//!
//! These run full migrations against the in-memory store, which enforces
//! the same batch atomicity and name/prefix rules as git.

use chrono::{TimeDelta, Utc};

use refkeeper::core::reference::TrustedDomain;
use refkeeper::git::{MemoryStore, Transaction, TransactionError};
use refkeeper::pipeline::migrate::StepError;
use refkeeper::pipeline::{Migration, MigrationSettings, Step};

// =============================================================================
// Test Fixtures
// =============================================================================

fn settings() -> MigrationSettings {
    MigrationSettings {
        primary_branch: "master".to_string(),
        trusted_domain: TrustedDomain::new("trusted.domain"),
        remote: "origin".to_string(),
    }
}

/// The four-branch store from the migration scenario.
fn scenario_store() -> MemoryStore {
    let mut store = MemoryStore::new();
    let now = Utc::now();
    store.add_branch("refs/heads/master", "release@trusted.domain", now);
    store.add_branch("refs/heads/alice/x", "alice@trusted.domain", now);
    store.add_branch("refs/heads/y", "alice@trusted.domain", now - TimeDelta::hours(1));
    store.add_branch("refs/heads/bob@nowhere", "@nowhere", now);
    store
}

// =============================================================================
// Full runs
// =============================================================================

#[test]
fn scenario_renames_alice_and_deletes_malformed() {
    let mut store = scenario_store();
    let master = store.get("refs/heads/master").cloned();
    let x = store.get("refs/heads/alice/x").cloned();
    let y = store.get("refs/heads/y").cloned();

    let xform = Migration::new(&mut store, settings()).run().unwrap();

    assert_eq!(
        store.ref_names(),
        vec![
            "refs/heads/alice/x",
            "refs/heads/alice/y",
            "refs/heads/master",
        ]
    );
    // Targets survive the moves; master is untouched.
    assert_eq!(store.get("refs/heads/master").cloned(), master);
    assert_eq!(store.get("refs/heads/alice/x").cloned(), x);
    assert_eq!(store.get("refs/heads/alice/y").cloned(), y);

    // The malformed ref was deleted, never renamed.
    let chains = xform.chains();
    assert!(chains.iter().flatten().all(|name| !name.contains("bob")));
    assert!(chains.contains(&vec![
        "refs/heads/alice/y".to_string(),
        "refs/heads/u/alice/y".to_string(),
        "refs/heads/y".to_string(),
    ]));
    assert_eq!(store.compact_calls(), 1);
}

#[test]
fn untrusted_and_leftover_refs_are_quarantined() {
    let mut store = MemoryStore::new();
    let now = Utc::now();
    let id = store.add_branch("refs/heads/master", "release@trusted.domain", now);
    store.add_branch("refs/heads/feature", "carol@elsewhere.org", now);
    store.set_ref("refs/pull/7/head", &id);
    store.set_ref("refs/tags/v1.0", &id);

    let xform = Migration::new(&mut store, settings()).run().unwrap();

    assert_eq!(
        store.ref_names(),
        vec![
            "refs/heads/master",
            "refs/heads/unknown/feature",
            "refs/heads/unknown/pull/7/head",
            "refs/tags/v1.0",
        ]
    );
    assert_eq!(xform.len(), 2);
}

#[test]
fn remotes_become_author_branches() {
    let mut store = MemoryStore::new();
    let now = Utc::now();
    let master = store.add_branch("refs/remotes/origin/master", "release@trusted.domain", now);
    store.set_ref("refs/heads/master", &master);
    store.set_ref("refs/remotes/origin/HEAD", &master);
    store.add_branch("refs/remotes/origin/topic", "dave@trusted.domain", now);

    let xform = Migration::new(&mut store, settings()).run().unwrap();

    assert_eq!(
        store.ref_names(),
        vec!["refs/heads/dave/topic", "refs/heads/master"]
    );
    assert_eq!(
        xform.chains(),
        vec![vec![
            "refs/heads/dave/topic".to_string(),
            "refs/heads/u/dave/topic".to_string(),
            "refs/heads/topic".to_string(),
            "refs/remotes/origin/topic".to_string(),
        ]]
    );
}

#[test]
fn colliding_authors_keep_every_branch() {
    let mut store = MemoryStore::new();
    let now = Utc::now();
    store.add_branch("refs/heads/master", "release@trusted.domain", now);
    // Both map to refs/heads/u/erin/fix.
    store.add_branch("refs/heads/erin/fix", "erin@trusted.domain", now);
    store.add_branch("refs/heads/fix", "erin@trusted.domain", now);

    Migration::new(&mut store, settings()).run().unwrap();

    let names = store.ref_names();
    assert_eq!(names.len(), 3);
    assert!(names.contains(&"refs/heads/erin/fix".to_string()));
    assert!(names.contains(&"refs/heads/erin/fix_".to_string()));
}

#[test]
fn second_run_lands_on_the_same_names() {
    let mut store = scenario_store();
    Migration::new(&mut store, settings()).run().unwrap();
    let after_first = store.ref_names();
    let targets: Vec<_> = after_first.iter().map(|n| store.get(n).cloned()).collect();

    // Flattened author branches pass through u/ again and come back.
    let xform = Migration::new(&mut store, settings()).run().unwrap();
    assert_eq!(store.ref_names(), after_first);
    let again: Vec<_> = after_first.iter().map(|n| store.get(n).cloned()).collect();
    assert_eq!(again, targets);
    assert!(xform
        .chains()
        .iter()
        .all(|chain| chain.first() == chain.last()));
}

#[test]
fn branches_on_reserved_prefixes_are_moved_aside() {
    let mut store = MemoryStore::new();
    let now = Utc::now();
    store.add_branch("refs/heads/master", "release@trusted.domain", now);
    let u = store.add_branch("refs/heads/u", "alice@trusted.domain", now);
    let x = store.add_branch("refs/heads/x", "bob@trusted.domain", now);
    store.add_branch("refs/heads/unknown", "carol@elsewhere.org", now);

    let xform = Migration::new(&mut store, settings()).run().unwrap();

    assert_eq!(
        store.ref_names(),
        vec![
            "refs/heads/alice/u_",
            "refs/heads/bob/x",
            "refs/heads/master",
            "refs/heads/unknown/unknown_",
        ]
    );
    assert_eq!(store.get("refs/heads/bob/x"), Some(&x));
    assert_eq!(store.get("refs/heads/alice/u_"), Some(&u));
    assert!(xform.chains().contains(&vec![
        "refs/heads/alice/u_".to_string(),
        "refs/heads/u/alice/u_".to_string(),
        "refs/heads/u_".to_string(),
        "refs/heads/u".to_string(),
    ]));
}

#[test]
fn rerun_steps_around_leftover_author_branches() {
    let mut store = MemoryStore::new();
    let now = Utc::now();
    store.add_branch("refs/heads/master", "release@trusted.domain", now);
    // Left behind by an interrupted run.
    let leftover = store.add_branch("refs/heads/u/alice/fix_", "alice@trusted.domain", now);
    let nested = store.add_branch("refs/heads/alice/fix", "alice@trusted.domain", now);
    let plain = store.add_branch("refs/heads/fix", "alice@trusted.domain", now);

    Migration::new(&mut store, settings()).run().unwrap();

    assert_eq!(
        store.ref_names(),
        vec![
            "refs/heads/alice/fix",
            "refs/heads/alice/fix_",
            "refs/heads/alice/fix__",
            "refs/heads/master",
        ]
    );
    assert_eq!(store.get("refs/heads/alice/fix_"), Some(&leftover));
    assert_eq!(store.get("refs/heads/alice/fix__"), Some(&nested));
    assert_eq!(store.get("refs/heads/alice/fix"), Some(&plain));

    let after_first = store.ref_names();
    Migration::new(&mut store, settings()).run().unwrap();
    assert_eq!(store.ref_names(), after_first);
}

// =============================================================================
// Failure semantics
// =============================================================================

#[test]
fn failed_transaction_aborts_remaining_steps() {
    let mut store = MemoryStore::new();
    let now = Utc::now();
    store.add_branch("refs/heads/master", "release@trusted.domain", now);
    store.add_branch("refs/heads/x", "alice@trusted.domain", now);
    store.add_branch("refs/heads/evil", "mallory@elsewhere.org", now);
    store.fail_next_apply(128);

    let err = Migration::new(&mut store, settings()).run().unwrap_err();

    assert_eq!(err.step, Step::AuthorRenames);
    assert!(matches!(
        err.source,
        StepError::Transaction(TransactionError::Rejected { code: 128, .. })
    ));
    // Quarantine never ran and nothing was compacted.
    assert!(store.get("refs/heads/evil").is_some());
    assert_eq!(store.apply_calls(), 1);
    assert_eq!(store.compact_calls(), 0);
}

#[test]
fn earlier_steps_stay_applied() {
    let mut store = MemoryStore::new();
    let now = Utc::now();
    store.add_branch("refs/heads/master", "release@trusted.domain", now);
    store.add_branch("refs/heads/x", "alice@trusted.domain", now);
    store.add_branch("refs/heads/evil", "mallory@elsewhere.org", now);

    let mut migration = Migration::new(&mut store, settings());
    let categories = migration.categorize().unwrap();
    migration.author_renames(&categories).unwrap();
    drop(migration);

    store.fail_next_apply(1);
    let mut migration = Migration::new(&mut store, settings());
    let err = migration.quarantine(&categories.untrusted).unwrap_err();
    assert_eq!(err.step, Step::Quarantine);
    drop(migration);

    assert!(store.get("refs/heads/u/alice/x").is_some());
    assert!(store.get("refs/heads/evil").is_some());
}

#[test]
fn error_message_names_step_and_code() {
    let mut store = scenario_store();
    store.fail_next_apply(3);

    let err = Migration::new(&mut store, settings()).run().unwrap_err();
    let chain = format!("{:#}", anyhow::Error::new(err));
    assert!(chain.contains("author-renames"), "{chain}");
    assert!(chain.contains("status 3"), "{chain}");
}

// =============================================================================
// Flatten
// =============================================================================

#[test]
fn flatten_is_idempotent() {
    let mut store = MemoryStore::new();
    let now = Utc::now();
    store.add_branch("refs/heads/u/alice/a", "alice@trusted.domain", now);
    store.add_branch("refs/heads/u/bob/b/c", "bob@trusted.domain", now);

    let mut migration = Migration::new(&mut store, settings());
    assert_eq!(migration.flatten().unwrap(), 2);
    assert_eq!(migration.flatten().unwrap(), 0);
    assert_eq!(migration.xform().len(), 2);
    drop(migration);

    assert_eq!(
        store.ref_names(),
        vec!["refs/heads/alice/a", "refs/heads/bob/b/c"]
    );
}

#[test]
fn flatten_steps_around_live_refs() {
    let mut store = MemoryStore::new();
    let now = Utc::now();
    store.add_branch("refs/heads/master", "release@trusted.domain", now);
    store.add_branch("refs/heads/u/master/x", "master@trusted.domain", now);

    Migration::new(&mut store, settings()).flatten().unwrap();

    assert_eq!(
        store.ref_names(),
        vec!["refs/heads/master", "refs/heads/master_/x"]
    );
}

// =============================================================================
// Transactions
// =============================================================================

#[test]
fn malformed_id_never_reaches_the_store() {
    let mut store = MemoryStore::new();
    let mut tx = Transaction::new().unwrap();

    let err = tx.create("refs/heads/x", "not-a-hash").unwrap_err();

    assert!(matches!(err, TransactionError::InvalidTargetId { .. }));
    assert_eq!(store.apply_calls(), 0);
    assert_eq!(store.enumerate_calls(), 0);
    drop(tx);
    assert!(store.ref_names().is_empty());
    // The store is still usable.
    store.add_branch("refs/heads/y", "a@trusted.domain", Utc::now());
    assert_eq!(store.ref_names().len(), 1);
}

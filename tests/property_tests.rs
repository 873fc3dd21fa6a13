//! Property-based tests for naming and rename planning.
//!
//! These tests use proptest to verify invariants hold across
//! randomly generated inputs.

use std::collections::{BTreeMap, BTreeSet};

use proptest::prelude::*;

use refkeeper::core::reference::{is_valid_segment, lstrip, Reference};
use refkeeper::core::rename_index::{first_free, RenameIndex};
use refkeeper::core::types::Oid;
use refkeeper::pipeline::migrate::{author_ref_name, unknown_ref_name};

/// Strategy for a single name segment.
fn segment() -> impl Strategy<Value = String> {
    "[a-z0-9][a-z0-9_-]{0,7}"
}

/// Strategy for segments drawn from a tiny alphabet, so names collide often.
fn crowded_segment() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["a", "b", "c"]).prop_map(str::to_string)
}

/// Strategy for a slash-separated path of crowded segments.
fn crowded_path() -> impl Strategy<Value = String> {
    prop::collection::vec(crowded_segment(), 1..4).prop_map(|s| s.join("/"))
}

/// Strategy for generating valid hex OIDs of either supported length.
fn valid_oid_string() -> impl Strategy<Value = String> {
    prop_oneof![Just(40usize), Just(64usize)].prop_flat_map(|len| {
        prop::collection::vec(
            prop::sample::select(vec![
                '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'a', 'b', 'c', 'd', 'e', 'f',
            ]),
            len,
        )
        .prop_map(|chars| chars.into_iter().collect())
    })
}

/// True if `a` is a strict directory prefix of `b`.
fn is_dir_prefix(a: &str, b: &str) -> bool {
    b.len() > a.len() && b.starts_with(a) && b.as_bytes()[a.len()] == b'/'
}

proptest! {
    /// Stripping n segments leaves exactly the remaining segments.
    #[test]
    fn lstrip_drops_leading_segments(
        segments in prop::collection::vec(segment(), 1..6),
        n in 0usize..8,
    ) {
        let name = segments.join("/");
        let expected = (n < segments.len()).then(|| segments[n..].join("/"));
        prop_assert_eq!(lstrip(&name, n).map(str::to_string), expected);
    }

    /// A reference is at most one of branch, tag, or remote-tracking ref.
    #[test]
    fn ref_kinds_are_exclusive(
        kind in prop::sample::select(vec!["heads", "tags", "remotes", "notes", "pull"]),
        rest in prop::collection::vec(segment(), 1..4),
    ) {
        let name = format!("refs/{kind}/{}", rest.join("/"));
        let reference = Reference::new(&name, "0".repeat(40), "a@b.c");
        let kinds = [reference.is_branch(), reference.is_tag(), reference.is_remote()];
        prop_assert!(kinds.iter().filter(|k| **k).count() <= 1);
        prop_assert_eq!(reference.is_branch(), kind == "heads");
    }

    /// Well-formed ids are accepted and normalized to lowercase.
    #[test]
    fn oid_accepts_hex_of_supported_lengths(hex in valid_oid_string()) {
        let oid = Oid::new(hex.to_uppercase()).unwrap();
        prop_assert_eq!(oid.as_str(), hex.as_str());
    }

    /// Any other length is rejected.
    #[test]
    fn oid_rejects_other_lengths(len in 0usize..80) {
        prop_assume!(len != 40 && len != 64);
        prop_assert!(Oid::new("a".repeat(len)).is_err());
    }

    /// Author names always land under the author's own namespace.
    #[test]
    fn author_names_stay_in_author_namespace(
        author in segment(),
        rest in prop::collection::vec(segment(), 1..4),
    ) {
        prop_assume!(is_valid_segment(&author));
        let name = format!("refs/heads/{}", rest.join("/"));
        let new = author_ref_name(&name, &author);
        let prefix = format!("refs/heads/u/{author}/");
        prop_assert!(new.starts_with(&prefix));
        prop_assert!(new.ends_with(&rest.join("/")));
    }

    /// Quarantine names always land under the unknown prefix.
    #[test]
    fn unknown_names_stay_in_quarantine(
        kind in prop::sample::select(vec!["heads", "notes", "pull"]),
        rest in prop::collection::vec(segment(), 1..4),
    ) {
        let name = format!("refs/{kind}/{}", rest.join("/"));
        prop_assert!(unknown_ref_name(&name).starts_with("refs/heads/unknown/"));
    }

    /// Every placed proposal is walked exactly once, and no walked name is
    /// a prefix of another or a duplicate.
    #[test]
    fn rename_index_output_is_conflict_free(paths in prop::collection::vec(crowded_path(), 1..20)) {
        let mut index = RenameIndex::with_max_attempts(64);
        let mut placed = BTreeSet::new();
        for (i, path) in paths.iter().enumerate() {
            let old = format!("refs/old/{i}");
            if index.propose(&format!("refs/heads/{path}"), &old).is_ok() {
                placed.insert(old);
            }
        }

        let walk = index.walk();
        let olds: BTreeMap<&str, usize> = walk.iter().fold(BTreeMap::new(), |mut m, (_, old)| {
            *m.entry(old.as_str()).or_default() += 1;
            m
        });
        prop_assert!(olds.values().all(|count| *count == 1));
        prop_assert_eq!(olds.keys().map(|s| s.to_string()).collect::<BTreeSet<_>>(), placed);

        let news: Vec<&str> = walk.iter().map(|(new, _)| new.as_str()).collect();
        for a in &news {
            for b in &news {
                prop_assert!(!is_dir_prefix(a, b), "{} is a prefix of {}", a, b);
            }
        }
        let unique: BTreeSet<&str> = news.iter().copied().collect();
        prop_assert_eq!(unique.len(), news.len());
    }

    /// Nothing the index walks lands on or around a live name.
    #[test]
    fn rename_index_steps_around_live_names(
        paths in prop::collection::vec(crowded_path(), 1..12),
        live in prop::collection::btree_set(crowded_path(), 0..8),
    ) {
        let mut index = RenameIndex::with_max_attempts(64);
        for (i, path) in paths.iter().enumerate() {
            let _ = index.propose_around(path, &format!("old/{i}"), &live);
        }

        for (new, _) in index.walk() {
            prop_assert!(!live.contains(&new), "{} is live", new);
            for name in &live {
                prop_assert!(!is_dir_prefix(name, &new), "{} blocks {}", name, new);
                prop_assert!(!is_dir_prefix(&new, name), "{} blocks {}", new, name);
            }
        }
    }

    /// The adjusted name neither equals nor nests with any occupied name.
    #[test]
    fn first_free_is_free(
        candidate in crowded_path(),
        occupied in prop::collection::btree_set(crowded_path(), 0..10),
    ) {
        let free = first_free(&candidate, &occupied);
        prop_assert!(!occupied.contains(&free));
        for name in &occupied {
            prop_assert!(!is_dir_prefix(name, &free), "{} blocks {}", name, free);
            prop_assert!(!is_dir_prefix(&free, name), "{} blocks {}", free, name);
        }
        prop_assert_eq!(free.split('/').count(), candidate.split('/').count());
    }
}

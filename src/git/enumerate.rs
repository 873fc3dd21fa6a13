//! git::enumerate
//!
//! Typed, lazy ref enumeration.
//!
//! Both iterators pull records from the engine one line at a time; nothing
//! is collected up front. Each call starts a fresh enumeration, and each
//! iterator can only be consumed once. If the engine fails, the failure
//! arrives as the last item, after every record it did print.

use super::{EngineError, RefFormat, RefQuery, RefStore};
use crate::core::reference::Reference;
use crate::core::types::Oid;

/// Iterate references under `pattern`, optionally sorted by `sort`.
///
/// Tags carry the id and author email of the commit they annotate.
///
/// # Example
///
/// ```
/// use chrono::Utc;
/// use refkeeper::git::{iter_refs, MemoryStore};
///
/// let mut store = MemoryStore::new();
/// store.add_branch("refs/heads/alice/x", "alice@twitter.com", Utc::now());
///
/// let refs: Vec<_> = iter_refs(&store, "refs/heads", None)
///     .unwrap()
///     .collect::<Result<_, _>>()
///     .unwrap();
/// assert_eq!(refs[0].author_email(), "alice@twitter.com");
/// ```
pub fn iter_refs<'s, S: RefStore + ?Sized>(
    store: &'s S,
    pattern: &str,
    sort: Option<&str>,
) -> Result<impl Iterator<Item = Result<Reference, EngineError>> + 's, EngineError> {
    let query = RefQuery::new(pattern, RefFormat::NameCommitEmail).sorted_by(sort);
    let lines = store.for_each_ref(&query)?;
    Ok(lines.map(|line| line.and_then(|l| parse_reference(&l))))
}

/// Iterate `(name, commit id)` pairs under `pattern`.
///
/// A tag resolves to the commit it annotates, never the tag object.
pub fn iter_with_id<'s, S: RefStore + ?Sized>(
    store: &'s S,
    pattern: &str,
) -> Result<impl Iterator<Item = Result<(String, Oid), EngineError>> + 's, EngineError> {
    let query = RefQuery::new(pattern, RefFormat::NameAndCommit);
    let lines = store.for_each_ref(&query)?;
    Ok(lines.map(|line| line.and_then(|l| parse_name_and_id(&l))))
}

fn parse_reference(line: &str) -> Result<Reference, EngineError> {
    let mut fields = line.splitn(3, '\t');
    let (Some(name), Some(target)) = (fields.next(), fields.next()) else {
        return Err(malformed(line));
    };
    if name.is_empty() {
        return Err(malformed(line));
    }
    // Older git ignores `:trim` and keeps the angle brackets.
    let email = fields
        .next()
        .unwrap_or("")
        .trim()
        .trim_start_matches('<')
        .trim_end_matches('>');
    Ok(Reference::new(name, target, email))
}

fn parse_name_and_id(line: &str) -> Result<(String, Oid), EngineError> {
    let Some((name, id)) = line.split_once('\t') else {
        return Err(malformed(line));
    };
    if name.is_empty() {
        return Err(malformed(line));
    }
    Ok((name.to_string(), Oid::new(id.trim())?))
}

fn malformed(line: &str) -> EngineError {
    EngineError::Malformed {
        line: line.to_string(),
    }
}

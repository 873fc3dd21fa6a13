//! core::reference
//!
//! The reference model: a named pointer with author attribution, plus the
//! commit data the engine hands back for it.
//!
//! # Classification
//!
//! Predicates look only at the name. A leading `refs/` is optional, so
//! `refs/heads/x` and `heads/x` are both branches. A name is at most one of
//! branch, tag or remote-tracking ref.
//!
//! # Attribution
//!
//! A reference is attributable when its author email ends in
//! `@<trusted domain>` with a non-empty local part. Callers either check
//! [`Reference::has_trusted_identity`] first or use the fallible
//! [`Reference::author_local_part`], which reports
//! [`RefError::UntrustedIdentity`].
//!
//! # Example
//!
//! ```
//! use refkeeper::core::reference::{Reference, TrustedDomain};
//!
//! let domain = TrustedDomain::new("trusted.domain");
//! let r = Reference::new(
//!     "refs/heads/billy/feature/xyz123",
//!     "0123456789012345678901234567890123456789",
//!     "billy@trusted.domain",
//! );
//!
//! assert!(r.is_branch());
//! assert_eq!(r.lstrip(2), Some("billy/feature/xyz123"));
//! assert_eq!(r.author_local_part(&domain).unwrap(), "billy");
//! ```

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::types::Oid;

/// Root of every full ref name.
pub const REFS: &str = "refs";
/// Local branches.
pub const REFS_HEADS: &str = "refs/heads";
/// Tags, lightweight or annotated.
pub const REFS_TAGS: &str = "refs/tags";
/// Remote-tracking branches.
pub const REFS_REMOTES: &str = "refs/remotes";
/// gitnamespaces(7) root.
pub const REFS_NAMESPACES: &str = "refs/namespaces";

const NAMESPACE_MARKER: &str = "namespaces";

/// Errors from reading derived reference attributes.
#[derive(Debug, Error)]
pub enum RefError {
    /// The author email is outside the trusted domain or has no local part.
    #[error("ref {} has an untrusted or malformed author email: {:?}", .reference.name(), .reference.author_email())]
    UntrustedIdentity { reference: Box<Reference> },
}

/// The email domain whose local parts identify authors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustedDomain(String);

impl TrustedDomain {
    /// Create a trusted domain. A leading `@` is ignored.
    pub fn new(domain: impl Into<String>) -> Self {
        let domain = domain.into();
        Self(domain.trim_start_matches('@').to_string())
    }

    /// The bare domain, without `@`.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Local part of `email` if it belongs to this domain.
    ///
    /// Returns `None` for other domains and for an empty local part.
    pub fn local_part<'e>(&self, email: &'e str) -> Option<&'e str> {
        let email = email.trim();
        let (local, domain) = email.rsplit_once('@')?;
        if domain == self.0 && !local.is_empty() {
            Some(local)
        } else {
            None
        }
    }
}

impl std::fmt::Display for TrustedDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// How a reference's author email relates to the trusted domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity<'r> {
    /// Trusted domain; carries the local part.
    Trusted(&'r str),
    /// Some other domain, no `@` at all, or no email.
    Untrusted,
    /// Nothing left of the `@`.
    Malformed,
}

/// An immutable reference as reported by the engine.
///
/// Construction never fails: odd emails simply classify as untrusted or
/// malformed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Reference {
    name: String,
    target: String,
    author_email: String,
}

impl Reference {
    /// Create a reference from the engine's raw fields.
    pub fn new(
        name: impl Into<String>,
        target: impl Into<String>,
        author_email: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            author_email: author_email.into(),
        }
    }

    /// Full reference name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Target id as reported (tags already peeled to their commit).
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Author email of the tip commit, as reported.
    pub fn author_email(&self) -> &str {
        &self.author_email
    }

    /// Check whether the name starts with `prefix`.
    pub fn starts_with(&self, prefix: &str) -> bool {
        self.name.starts_with(prefix)
    }

    /// Name with an optional `refs/` removed, for kind tests.
    fn kind_path(&self) -> &str {
        self.name.strip_prefix("refs/").unwrap_or(&self.name)
    }

    /// True for lightweight and annotated tags.
    pub fn is_tag(&self) -> bool {
        self.kind_path().starts_with("tags/")
    }

    /// True for local branches.
    pub fn is_branch(&self) -> bool {
        self.kind_path().starts_with("heads/")
    }

    /// True for remote-tracking branches.
    pub fn is_remote(&self) -> bool {
        self.kind_path().starts_with("remotes/")
    }

    /// Namespace per gitnamespaces(7).
    ///
    /// Every `namespaces/<n>/` marker contributes one level, so
    /// `refs/namespaces/foo/refs/namespaces/bar/refs/heads/x` yields
    /// `foo/bar`. Returns `None` without markers.
    pub fn namespace(&self) -> Option<String> {
        let segments: Vec<&str> = self.name.split('/').collect();
        let mut found = Vec::new();
        // The captured segment must be followed by at least one more.
        for window in segments.windows(3) {
            if window[0] == NAMESPACE_MARKER && !window[1].is_empty() {
                found.push(window[1]);
            }
        }
        if found.is_empty() {
            None
        } else {
            Some(found.join("/"))
        }
    }

    /// Classify the author email against `domain`.
    pub fn identity(&self, domain: &TrustedDomain) -> Identity<'_> {
        let email = self.author_email.trim();
        if email.starts_with('@') {
            return Identity::Malformed;
        }
        match domain.local_part(email) {
            Some(local) => Identity::Trusted(local),
            None => Identity::Untrusted,
        }
    }

    /// Check whether [`Reference::author_local_part`] would succeed.
    pub fn has_trusted_identity(&self, domain: &TrustedDomain) -> bool {
        matches!(self.identity(domain), Identity::Trusted(_))
    }

    /// Local part of the author email.
    ///
    /// # Errors
    ///
    /// [`RefError::UntrustedIdentity`] if the email is not a trusted-domain
    /// address.
    pub fn author_local_part(&self, domain: &TrustedDomain) -> Result<&str, RefError> {
        match self.identity(domain) {
            Identity::Trusted(local) => Ok(local),
            _ => Err(RefError::UntrustedIdentity {
                reference: Box::new(self.clone()),
            }),
        }
    }

    /// Name with the leftmost `n` segments removed.
    ///
    /// Returns `None` if nothing would remain.
    pub fn lstrip(&self, n: usize) -> Option<&str> {
        lstrip(&self.name, n)
    }

    /// The 0-indexed `n`th segment of the name.
    pub fn nth(&self, n: usize) -> Option<&str> {
        self.name.split('/').nth(n)
    }
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

/// Remove the leftmost `n` segments of a slash-separated name.
///
/// Returns `None` if `name` has `n` or fewer segments.
pub fn lstrip(name: &str, n: usize) -> Option<&str> {
    if n == 0 {
        return (!name.is_empty()).then_some(name);
    }
    let (idx, _) = name.match_indices('/').nth(n - 1)?;
    let rest = &name[idx + 1..];
    (!rest.is_empty()).then_some(rest)
}

/// Branch name check following git-check-ref-format(1), relative to `refs/heads/`.
pub fn is_valid_branch_name(name: &str) -> bool {
    const FORBIDDEN: &[char] = &[' ', '~', '^', ':', '?', '*', '[', '\\'];

    !name.is_empty()
        && name != "@"
        && !name.starts_with('-')
        && !name.starts_with('/')
        && !name.ends_with('/')
        && !name.ends_with('.')
        && !name.ends_with(".lock")
        && !name.contains("..")
        && !name.contains("//")
        && !name.contains("@{")
        && !name.chars().any(|c| c.is_control() || FORBIDDEN.contains(&c))
        && name.split('/').all(|segment| !segment.starts_with('.'))
}

/// Check that `segment` can stand alone as one component of a branch name.
pub fn is_valid_segment(segment: &str) -> bool {
    !segment.contains('/') && is_valid_branch_name(segment)
}

/// Join a branch-relative path onto `refs/heads`.
pub fn branch_ref(relative: &str) -> String {
    format!("{REFS_HEADS}/{relative}")
}

/// A commit signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    /// Email address
    pub email: String,
    /// Display name
    pub name: String,
    /// Signature timestamp
    pub time: DateTime<Utc>,
}

/// A commit as read from the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    /// The commit id
    pub id: Oid,
    /// Author signature
    pub author: Signature,
    /// Committer signature
    pub committer: Signature,
    /// Full message
    pub message: String,
    /// Parent ids in order
    pub parent_ids: Vec<Oid>,
    /// Root tree id
    pub tree_id: Oid,
}

impl Commit {
    /// The committer timestamp.
    pub fn commit_time(&self) -> DateTime<Utc> {
        self.committer.time
    }
}

//! core::types
//!
//! Strong types for values that cross the engine boundary.
//!
//! # Types
//!
//! - [`Oid`] - Content-addressed object id (fixed-width lowercase hex)
//!
//! # Validation
//!
//! An [`Oid`] can only be built from a well-formed hash, so anything holding
//! one may emit it into a batch-update stream without re-checking.
//!
//! # Examples
//!
//! ```
//! use refkeeper::core::types::Oid;
//!
//! let oid = Oid::new("0123456789012345678901234567890123456789").unwrap();
//! assert_eq!(oid.short(7), "0123456");
//!
//! assert!(Oid::new("not-a-hash").is_err());
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from type validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid object id {id:?}: {reason}")]
    InvalidOid { id: String, reason: &'static str },
}

/// A validated object id (SHA-1 or SHA-256 hex digest).
///
/// Ids are normalized to lowercase, matching what the engine prints.
///
/// # Example
///
/// ```
/// use refkeeper::core::types::Oid;
///
/// let oid = Oid::new("ABCDEF0123456789ABCDEF0123456789ABCDEF01").unwrap();
/// assert_eq!(oid.as_str(), "abcdef0123456789abcdef0123456789abcdef01");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Oid(String);

impl Oid {
    /// Hex length of a SHA-1 object id.
    pub const SHA1_HEX_LEN: usize = 40;
    /// Hex length of a SHA-256 object id.
    pub const SHA256_HEX_LEN: usize = 64;

    /// Create a validated object id.
    ///
    /// # Errors
    ///
    /// Returns [`TypeError::InvalidOid`] unless `id` is exactly 40 or 64 hex
    /// characters.
    pub fn new(id: impl Into<String>) -> Result<Self, TypeError> {
        let id = id.into().to_ascii_lowercase();
        Self::validate(&id)?;
        Ok(Self(id))
    }

    /// Check whether `id` would be accepted by [`Oid::new`].
    pub fn is_well_formed(id: &str) -> bool {
        Self::validate(&id.to_ascii_lowercase()).is_ok()
    }

    fn validate(id: &str) -> Result<(), TypeError> {
        if id.len() != Self::SHA1_HEX_LEN && id.len() != Self::SHA256_HEX_LEN {
            return Err(TypeError::InvalidOid {
                id: id.to_string(),
                reason: "expected 40 or 64 hex characters",
            });
        }
        if !id.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(TypeError::InvalidOid {
                id: id.to_string(),
                reason: "object id must be hexadecimal",
            });
        }
        Ok(())
    }

    /// A SHA-1-width id taken from the leading bytes of a longer digest.
    ///
    /// `digest` must be at least 20 bytes (any SHA-2 output is).
    pub fn from_digest(digest: &[u8]) -> Self {
        Self(hex::encode(&digest[..Self::SHA1_HEX_LEN / 2]))
    }

    /// Abbreviated form, for log lines.
    pub fn short(&self, len: usize) -> &str {
        &self.0[..len.min(self.0.len())]
    }

    /// Get the object id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Oid {
    type Error = TypeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<Oid> for String {
    fn from(oid: Oid) -> Self {
        oid.0
    }
}

impl AsRef<str> for Oid {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Oid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

//! pipeline
//!
//! The orchestrators that reorganize a repository's ref namespace.
//!
//! # Modules
//!
//! - [`migrate`] - Per-author namespace migration (relocate, categorize,
//!   rename, quarantine, sweep, flatten, compact)
//! - [`expire`] - Age-based ref deletion
//! - [`namespace`] - Moving dev branches into hashed gitnamespaces
//!
//! # Architecture
//!
//! Every pipeline follows the same shape: enumerate, plan entirely in memory,
//! then write through [`Transaction`]s. Each transaction is atomic; a
//! pipeline made of several transactions is not, and a failure stops the run
//! where it is without undoing earlier steps.

pub mod expire;
pub mod migrate;
pub mod namespace;

pub use expire::{ExpireError, ExpirePolicy, ExpireReport, Expiry};
pub use migrate::{MigrateError, Migration, MigrationSettings, Step};
pub use namespace::{CommandHasher, NamespaceError, NamespaceHasher};

use crate::core::types::Oid;
use crate::git::{RefStore, Transaction, TransactionError};

/// One planned move of a ref.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rename {
    /// Current name.
    pub old: String,
    /// Name after the move.
    pub new: String,
    /// Target carried over to the new name.
    pub id: Oid,
}

/// Move refs with two transactions: every create, then every delete.
///
/// The originals are only deleted once the creates are confirmed, so a
/// rejected first batch changes nothing and a rejected second batch leaves
/// both names in place. Does nothing for an empty slice.
pub fn apply_renames<S: RefStore + ?Sized>(
    store: &mut S,
    renames: &[Rename],
) -> Result<(), TransactionError> {
    if renames.is_empty() {
        return Ok(());
    }

    let mut creates = Transaction::new()?;
    for rename in renames {
        creates.create(&rename.new, rename.id.as_str())?;
    }
    creates.apply(store)?;

    let mut deletes = Transaction::new()?;
    for rename in renames {
        deletes.delete(&rename.old)?;
    }
    deletes.apply(store)
}

/// Symbolic `HEAD` refs such as `refs/remotes/origin/HEAD`.
pub(crate) fn is_symbolic_head(name: &str) -> bool {
    name.ends_with("/HEAD")
}

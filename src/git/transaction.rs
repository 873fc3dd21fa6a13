//! git::transaction
//!
//! The batch builder: the only code that writes refs.
//!
//! # Architecture
//!
//! Operations are serialized straight into an anonymous temporary spool in
//! the NUL-delimited `update-ref --stdin -z` format:
//!
//! ```text
//! start\0
//! create <ref>\0<id>\0
//! update <ref>\0<new>\0\0
//! delete <ref>\0\0
//! prepare\0
//! commit\0
//! ```
//!
//! `apply` rewinds the spool and hands it to the engine in exactly one call.
//! The engine applies the batch all at once or not at all, so a rejected
//! transaction leaves the store as it was.
//!
//! # Invariants
//!
//! - `create` never emits an id that is not a well-formed hash
//! - Markers are written exactly once: `start` first, `prepare` `commit` last
//! - A transaction is applied at most once
//!
//! # Example
//!
//! ```
//! use chrono::Utc;
//! use refkeeper::git::{MemoryStore, RefStore, Transaction};
//!
//! let mut store = MemoryStore::new();
//! let id = store.add_branch("refs/heads/x", "a@twitter.com", Utc::now());
//!
//! let mut tx = Transaction::new().unwrap();
//! tx.create("refs/heads/y", id.as_str()).unwrap();
//! tx.delete("refs/heads/x").unwrap();
//! tx.apply(&mut store).unwrap();
//!
//! assert_eq!(store.ref_names(), vec!["refs/heads/y"]);
//! ```

use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};

use thiserror::Error;
use tracing::{debug, info};

use super::{EngineError, RefStore};
use crate::core::types::{Oid, TypeError};

const NUL: &[u8] = b"\0";

/// Errors from building or applying a transaction.
#[derive(Debug, Error)]
pub enum TransactionError {
    /// `create` was given something that is not an object id.
    #[error("invalid target id {id:?} for {refname}")]
    InvalidTargetId {
        refname: String,
        id: String,
        #[source]
        source: TypeError,
    },

    /// The engine refused the batch; the store is unchanged.
    #[error("transaction rejected: `{}` exited with status {code}", .args.join(" "))]
    Rejected { code: i32, args: Vec<String> },

    /// The transaction can no longer be changed or applied.
    #[error("transaction is {state}; start a new one")]
    Closed { state: TxState },

    /// The engine could not be run to completion.
    #[error(transparent)]
    Engine(EngineError),

    /// Writing the spool failed.
    #[error("transaction spool I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

impl From<EngineError> for TransactionError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Failure { args, code } => TransactionError::Rejected { code, args },
            other => TransactionError::Engine(other),
        }
    }
}

/// Lifecycle of a [`Transaction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    /// Operations may be appended.
    Building,
    /// Markers written; only `apply` remains.
    Finalized,
    /// The engine accepted the batch.
    Applied,
    /// The engine was called and did not accept the batch.
    Failed,
}

impl std::fmt::Display for TxState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            TxState::Building => "building",
            TxState::Finalized => "finalized",
            TxState::Applied => "applied",
            TxState::Failed => "failed",
        })
    }
}

/// A single-use batch of ref mutations.
#[derive(Debug)]
pub struct Transaction {
    spool: BufWriter<File>,
    state: TxState,
    ops: usize,
}

impl Transaction {
    /// Open a spool and write the `start` marker.
    ///
    /// # Errors
    ///
    /// [`TransactionError::Io`] if no temporary file can be created.
    pub fn new() -> Result<Self, TransactionError> {
        let mut spool = BufWriter::new(tempfile::tempfile()?);
        spool.write_all(b"start")?;
        spool.write_all(NUL)?;
        Ok(Self {
            spool,
            state: TxState::Building,
            ops: 0,
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TxState {
        self.state
    }

    /// Number of operations appended.
    pub fn len(&self) -> usize {
        self.ops
    }

    /// Check if no operations were appended.
    pub fn is_empty(&self) -> bool {
        self.ops == 0
    }

    fn ensure_building(&self) -> Result<(), TransactionError> {
        match self.state {
            TxState::Building => Ok(()),
            state => Err(TransactionError::Closed { state }),
        }
    }

    fn write_op(&mut self, parts: &[&[u8]]) -> Result<(), TransactionError> {
        self.ensure_building()?;
        for part in parts {
            self.spool.write_all(part)?;
        }
        self.ops += 1;
        Ok(())
    }

    /// Create `refname` at `id`. Fails if the ref already exists when applied.
    ///
    /// # Errors
    ///
    /// [`TransactionError::InvalidTargetId`] if `id` is not a well-formed
    /// hash; nothing is written in that case.
    pub fn create(&mut self, refname: &str, id: &str) -> Result<(), TransactionError> {
        let oid = Oid::new(id).map_err(|source| TransactionError::InvalidTargetId {
            refname: refname.to_string(),
            id: id.to_string(),
            source,
        })?;
        self.write_op(&[
            b"create ",
            refname.as_bytes(),
            NUL,
            oid.as_str().as_bytes(),
            NUL,
        ])
    }

    /// Point `refname` at `new`, creating it if needed.
    pub fn update(&mut self, refname: &str, new: &Oid) -> Result<(), TransactionError> {
        self.write_op(&[
            b"update ",
            refname.as_bytes(),
            NUL,
            new.as_str().as_bytes(),
            NUL,
            NUL,
        ])
    }

    /// Delete `refname`.
    pub fn delete(&mut self, refname: &str) -> Result<(), TransactionError> {
        self.write_op(&[b"delete ", refname.as_bytes(), NUL, NUL])
    }

    /// Write the closing markers. Idempotent once finalized.
    pub fn finalize(&mut self) -> Result<(), TransactionError> {
        match self.state {
            TxState::Building => {
                self.spool.write_all(b"prepare")?;
                self.spool.write_all(NUL)?;
                self.spool.write_all(b"commit")?;
                self.spool.write_all(NUL)?;
                self.spool.flush()?;
                self.state = TxState::Finalized;
                Ok(())
            }
            TxState::Finalized => Ok(()),
            state => Err(TransactionError::Closed { state }),
        }
    }

    /// Finalize if needed and hand the batch to `store` in one call.
    ///
    /// # Errors
    ///
    /// - [`TransactionError::Rejected`] if the engine refused the batch
    /// - [`TransactionError::Closed`] if this transaction was already applied
    /// - [`TransactionError::Engine`] if the engine could not be run
    pub fn apply<S: RefStore + ?Sized>(&mut self, store: &mut S) -> Result<(), TransactionError> {
        self.finalize()?;

        let file = self.spool.get_mut();
        file.seek(SeekFrom::Start(0))?;

        debug!(ops = self.ops, "applying transaction");
        match store.apply_batch(file) {
            Ok(()) => {
                self.state = TxState::Applied;
                info!(ops = self.ops, "transaction applied");
                Ok(())
            }
            Err(e) => {
                self.state = TxState::Failed;
                Err(e.into())
            }
        }
    }
}

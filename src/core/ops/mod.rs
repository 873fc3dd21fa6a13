//! core::ops
//!
//! Single-writer coordination for mutating runs.
//!
//! # Modules
//!
//! - [`lock`] - Exclusive repository lock
//!
//! # Architecture
//!
//! Every mutating command holds the repo lock for its whole run. The core
//! pipelines never lock on their own; the CLI takes the lock around them.
//! A migration that fails halfway is not resumed under the same lock.

pub mod lock;

pub use lock::{LockError, RepoLock};

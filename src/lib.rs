//! refkeeper - transactional reorganization of a git repository's refs
//!
//! refkeeper rewrites the ref namespace of large shared repositories:
//! it moves branches into per-author namespaces, quarantines branches it
//! cannot attribute, expires stale refs, and moves developer branches into
//! hashed gitnamespaces.
//!
//! # Architecture
//!
//! The codebase follows a strict layered architecture:
//!
//! - [`cli`] - Command-line interface layer (parses args, delegates to pipelines)
//! - [`pipeline`] - Migration, expiry, and namespace orchestrators
//! - [`core`] - Domain types, rename planning, config, and locking
//! - [`git`] - The storage-engine capability and its implementations
//!
//! # Correctness Invariants
//!
//! refkeeper maintains the following invariants:
//!
//! 1. Every ref change goes through one atomic batch-update transaction
//! 2. Rename targets are proven conflict-free in memory before any write
//! 3. Malformed object ids never reach the engine
//! 4. A failed step stops the run and is reported with its step, refs, and exit code

pub mod cli;
pub mod core;
pub mod git;
pub mod pipeline;

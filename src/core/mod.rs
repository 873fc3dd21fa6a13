//! core
//!
//! Domain types and the in-memory planning structures.
//!
//! # Modules
//!
//! - [`types`] - Strong types: Oid
//! - [`reference`] - Reference model, classification, author attribution
//! - [`rename_index`] - Conflict-free rename planning over ref-name paths
//! - [`xform`] - Multi-hop rename audit log
//! - [`ops`] - Repository locking
//! - [`config`] - Configuration schema and loading
//! - [`paths`] - Path routing for refkeeper's own files
//!
//! # Design Principles
//!
//! - Nothing in `core` talks to the engine; planning is side-effect free
//! - Strong typing keeps malformed ids out of batch streams
//! - Schemas are strict and self-describing

pub mod config;
pub mod ops;
pub mod paths;
pub mod reference;
pub mod rename_index;
pub mod types;
pub mod xform;

//! cli::commands
//!
//! Command dispatch and handlers.
//!
//! # Architecture
//!
//! Each command handler:
//! 1. Opens the repository and merges config with its flags
//! 2. Takes the repository lock if it writes refs
//! 3. Runs one pipeline and prints its result on stdout
//!
//! Handlers do NOT build transactions themselves.

mod completion;
mod expire;
mod flatten;
mod list;
mod migrate;
mod namespace;
mod plan;

// Re-export command functions for testing and direct invocation
pub use completion::completion;
pub use expire::{expire, ExpireArgs};
pub use flatten::flatten;
pub use list::list;
pub use migrate::migrate;
pub use namespace::namespace_devs;
pub use plan::plan;

use crate::cli::args::Command;
use crate::cli::Context;
use crate::core::config::Config;
use crate::core::reference::TrustedDomain;
use crate::pipeline::MigrationSettings;
use anyhow::Result;

/// Dispatch a command to its handler.
pub fn dispatch(command: Command, ctx: &Context) -> Result<()> {
    match command {
        Command::Migrate { json } => migrate::migrate(ctx, json),
        Command::Flatten => flatten::flatten(ctx),
        Command::Expire {
            days,
            no_tip_age,
            no_merge_base,
            pattern,
            dry_run,
        } => expire::expire(
            ctx,
            &ExpireArgs {
                days,
                tip_age: !no_tip_age,
                merge_base_age: !no_merge_base,
                pattern,
                dry_run,
            },
        ),
        Command::NamespaceDevs => namespace::namespace_devs(ctx),
        Command::List { pattern, sort } => list::list(ctx, &pattern, sort.as_deref()),
        Command::Plan => plan::plan(ctx),
        Command::Completion { shell } => completion::completion(shell),
    }
}

/// Migration settings from merged config.
fn migration_settings(config: &Config) -> MigrationSettings {
    MigrationSettings {
        primary_branch: config.primary_branch().to_string(),
        trusted_domain: TrustedDomain::new(config.trusted_domain()),
        remote: config.remote().to_string(),
    }
}

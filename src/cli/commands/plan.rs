//! plan command - Preview the per-author renames

use super::migration_settings;
use crate::cli::Context;
use crate::pipeline::migrate::{categorize, plan_author_renames};
use anyhow::{Context as _, Result};

/// Print the per-author rename plan as `old<TAB>new` without writing.
///
/// Branches that would first be moved off a reserved prefix are listed
/// before the plan, which refers to them by their moved names.
///
/// Conflicts the plan resolved, and the refs that would be quarantined or
/// deleted, are summarized on stderr.
pub fn plan(ctx: &Context) -> Result<()> {
    let session = ctx.open()?;
    let settings = migration_settings(&session.config);

    let categories = categorize(&session.store, &settings).context("Failed to categorize refs")?;
    let plan = plan_author_renames(&categories).context("Failed to plan renames")?;

    for (old, moved) in &categories.set_aside {
        println!("{}\t{}", old, moved.name());
    }
    for rename in &plan.renames {
        println!("{}\t{}", rename.old, rename.new);
    }

    if !ctx.quiet {
        for conflict in &plan.conflicts {
            eprintln!(
                "conflict: {} blocked by {}, moved to {}",
                conflict.candidate, conflict.existing, conflict.displaced_to
            );
        }
        eprintln!(
            "{} to rename, {} to quarantine, {} to delete",
            plan.renames.len(),
            categories.untrusted.len(),
            categories.invalid.len()
        );
    }
    Ok(())
}

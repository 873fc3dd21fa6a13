//! flatten command - Drop the transitional author prefix

use std::io::Write;

use super::migration_settings;
use crate::cli::Context;
use crate::pipeline::Migration;
use anyhow::{Context as _, Result};

/// Run the flatten step and compaction by themselves.
pub fn flatten(ctx: &Context) -> Result<()> {
    let mut session = ctx.open()?;
    let _lock = session.lock()?;

    let settings = migration_settings(&session.config);
    let mut migration = Migration::new(&mut session.store, settings);
    let count = migration.flatten().context("Flatten failed")?;
    if count > 0 {
        migration.compact().context("Flatten failed")?;
    }

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    migration.xform().write_tsv(&mut out)?;
    out.flush()?;
    Ok(())
}

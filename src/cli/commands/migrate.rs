//! migrate command - Reorganize branches into per-author namespaces

use std::io::Write;

use super::migration_settings;
use crate::cli::Context;
use crate::pipeline::Migration;
use anyhow::{Context as _, Result};

/// Run a full migration and print the rename audit.
pub fn migrate(ctx: &Context, json: bool) -> Result<()> {
    let mut session = ctx.open()?;
    let _lock = session.lock()?;

    let settings = migration_settings(&session.config);
    let xform = Migration::new(&mut session.store, settings)
        .run()
        .context("Migration failed")?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    if json {
        xform.write_json(&mut out)?;
    } else {
        xform.write_tsv(&mut out)?;
    }
    out.flush()?;
    Ok(())
}

//! list command - Show refs with target and author

use std::io::Write;

use crate::cli::Context;
use crate::git::iter_refs;
use anyhow::{Context as _, Result};

/// Print `name<TAB>id<TAB>email` for every ref under `pattern`.
pub fn list(ctx: &Context, pattern: &str, sort: Option<&str>) -> Result<()> {
    let session = ctx.open()?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for reference in iter_refs(&session.store, pattern, sort).context("Failed to list refs")? {
        let reference = reference.context("Failed to list refs")?;
        writeln!(
            out,
            "{}\t{}\t{}",
            reference.name(),
            reference.target(),
            reference.author_email()
        )?;
    }
    out.flush()?;
    Ok(())
}

//! namespace-devs command - Move developer branches into gitnamespaces

use crate::cli::Context;
use crate::git::Timeouts;
use crate::pipeline::namespace::namespace_devs as rewrite;
use crate::pipeline::CommandHasher;
use anyhow::{Context as _, Result};

/// Hash usernames with the configured command and move their branches.
///
/// Prints `old<TAB>new` per moved branch.
pub fn namespace_devs(ctx: &Context) -> Result<()> {
    let mut session = ctx.open()?;
    let _lock = session.lock()?;

    let timeouts = Timeouts {
        exit: session.config.exit_timeout(),
        term: session.config.term_timeout(),
    };
    let hasher = CommandHasher::new(session.config.hash_command(), timeouts)?;

    let report = rewrite(&mut session.store, &hasher).context("Namespace rewrite failed")?;
    for (old, new) in &report.moved {
        println!("{old}\t{new}");
    }
    Ok(())
}

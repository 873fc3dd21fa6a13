//! expire command - Delete refs past the horizon

use crate::cli::Context;
use crate::core::reference::branch_ref;
use crate::pipeline::{ExpirePolicy, Expiry};
use anyhow::{bail, Context as _, Result};

/// Flags for [`expire`].
#[derive(Debug, Clone, Default)]
pub struct ExpireArgs {
    pub days: Option<u32>,
    pub tip_age: bool,
    pub merge_base_age: bool,
    pub pattern: Option<String>,
    pub dry_run: bool,
}

/// Expire old refs, or list what would expire with `dry_run`.
///
/// Prints `name<TAB>policy<TAB>time...` per expired ref.
pub fn expire(ctx: &Context, args: &ExpireArgs) -> Result<()> {
    let mut session = ctx.open()?;
    let config = &session.config;

    let tip_age = args.tip_age && config.expire_tip_age();
    let merge_base_age = args.merge_base_age && config.expire_merge_base_age();
    if !tip_age && !merge_base_age {
        bail!("Both expiry policies are disabled; nothing to do");
    }

    let policy = ExpirePolicy::new(&branch_ref(config.primary_branch()))
        .with_baseline(config.expire_baseline())
        .with_horizon_days(args.days.unwrap_or_else(|| config.horizon_days()))
        .with_pattern(args.pattern.clone().unwrap_or_else(|| config.expire_pattern()))
        .with_policies(tip_age, merge_base_age);

    let report = if args.dry_run {
        Expiry::new(&mut session.store, policy)
            .plan()
            .context("Expiry planning failed")?
    } else {
        let _lock = session.lock()?;
        Expiry::new(&mut session.store, policy)
            .run()
            .context("Expiry failed")?
    };

    for expired in &report.expired {
        println!("{}\t{}", expired.name, expired.reason);
    }
    Ok(())
}

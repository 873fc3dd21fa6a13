//! pipeline::expire
//!
//! Age-based ref deletion.
//!
//! # Policies
//!
//! - **Tip age**: the tip commit's author time is older than the cutoff.
//! - **Merge-base age**: the merge-base with the baseline ref was committed
//!   before the cutoff. This catches branches with fresh commits that forked
//!   from the mainline long ago and were never integrated.
//!
//! Both run over one enumeration. Deletions go into a single transaction
//! followed by one compaction, and only when something expired.
//!
//! # Example
//!
//! ```
//! use chrono::{TimeDelta, Utc};
//! use refkeeper::git::MemoryStore;
//! use refkeeper::pipeline::{ExpirePolicy, Expiry};
//!
//! let now = Utc::now();
//! let mut store = MemoryStore::new();
//! store.add_branch("refs/heads/master", "ci@twitter.com", now);
//! store.add_branch("refs/heads/stale", "a@twitter.com", now - TimeDelta::days(400));
//!
//! let report = Expiry::new(&mut store, ExpirePolicy::new("refs/heads/master"))
//!     .at(now)
//!     .run()
//!     .unwrap();
//!
//! assert_eq!(report.expired.len(), 1);
//! assert_eq!(store.ref_names(), vec!["refs/heads/master"]);
//! ```

use std::collections::BTreeSet;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::is_symbolic_head;
use crate::core::reference::REFS;
use crate::core::types::Oid;
use crate::git::{iter_with_id, EngineError, RefStore, Transaction, TransactionError};

/// Default horizon in days.
pub const DEFAULT_HORIZON_DAYS: u32 = 90;

/// Errors from an expiry run.
#[derive(Debug, Error)]
pub enum ExpireError {
    /// The baseline ref could not be resolved to a commit.
    #[error("cannot resolve baseline {refname}")]
    Baseline {
        refname: String,
        #[source]
        source: EngineError,
    },

    #[error("failed to enumerate refs")]
    Enumerate(#[source] EngineError),

    /// Reading a commit or merge-base failed.
    #[error("failed to inspect {refname}")]
    Inspect {
        refname: String,
        #[source]
        source: EngineError,
    },

    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error("failed to compact refs")]
    Compact(#[source] EngineError),
}

/// Which refs expire and when.
#[derive(Debug, Clone)]
pub struct ExpirePolicy {
    /// Maximum age.
    pub horizon: TimeDelta,
    /// Ref merge-bases are measured against.
    pub baseline: String,
    /// Refs that never expire.
    pub exempt: BTreeSet<String>,
    /// Apply the tip-age policy.
    pub tip_age: bool,
    /// Apply the merge-base-age policy.
    pub merge_base_age: bool,
    /// Enumeration prefix.
    pub pattern: String,
}

impl ExpirePolicy {
    /// Both policies, the default horizon, and `primary_ref` as baseline.
    pub fn new(primary_ref: &str) -> Self {
        Self {
            horizon: TimeDelta::days(i64::from(DEFAULT_HORIZON_DAYS)),
            baseline: primary_ref.to_string(),
            exempt: BTreeSet::from([primary_ref.to_string()]),
            tip_age: true,
            merge_base_age: true,
            pattern: REFS.to_string(),
        }
    }

    pub fn with_horizon_days(mut self, days: u32) -> Self {
        self.horizon = TimeDelta::days(i64::from(days));
        self
    }

    /// Measure merge-bases against `baseline`, which also becomes exempt.
    pub fn with_baseline(mut self, baseline: impl Into<String>) -> Self {
        self.baseline = baseline.into();
        self.exempt.insert(self.baseline.clone());
        self
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = pattern.into();
        self
    }

    pub fn with_policies(mut self, tip_age: bool, merge_base_age: bool) -> Self {
        self.tip_age = tip_age;
        self.merge_base_age = merge_base_age;
        self
    }
}

/// Why a ref expired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "policy", rename_all = "kebab-case")]
pub enum ExpireReason {
    TipAge {
        authored: DateTime<Utc>,
    },
    MergeBaseAge {
        merge_base: Oid,
        committed: DateTime<Utc>,
    },
}

impl std::fmt::Display for ExpireReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExpireReason::TipAge { authored } => {
                write!(f, "tip-age\t{}", authored.to_rfc3339())
            }
            ExpireReason::MergeBaseAge {
                merge_base,
                committed,
            } => write!(
                f,
                "merge-base-age\t{}\t{}",
                committed.to_rfc3339(),
                merge_base.short(12)
            ),
        }
    }
}

/// A ref chosen for deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Expired {
    pub name: String,
    pub reason: ExpireReason,
}

/// Outcome of planning or running an expiry.
#[derive(Debug, Clone, Serialize)]
pub struct ExpireReport {
    /// Anything older than this expired.
    pub cutoff: DateTime<Utc>,
    pub expired: Vec<Expired>,
    /// Refs examined and kept.
    pub retained: usize,
    /// Refs that do not point at a commit.
    pub skipped: Vec<String>,
}

/// One expiry run over a store.
pub struct Expiry<'s, S: RefStore + ?Sized> {
    store: &'s mut S,
    policy: ExpirePolicy,
    now: DateTime<Utc>,
}

impl<'s, S: RefStore + ?Sized> Expiry<'s, S> {
    pub fn new(store: &'s mut S, policy: ExpirePolicy) -> Self {
        Self {
            store,
            policy,
            now: Utc::now(),
        }
    }

    /// Measure ages from `now` instead of the current time.
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    pub fn cutoff(&self) -> DateTime<Utc> {
        self.now - self.policy.horizon
    }

    /// Decide what would expire without writing anything.
    pub fn plan(&self) -> Result<ExpireReport, ExpireError> {
        let cutoff = self.cutoff();
        let store = &*self.store;

        let baseline = if self.policy.merge_base_age {
            let id = store
                .resolve(&self.policy.baseline)
                .map_err(|source| ExpireError::Baseline {
                    refname: self.policy.baseline.clone(),
                    source,
                })?;
            Some(id)
        } else {
            None
        };

        let mut report = ExpireReport {
            cutoff,
            expired: Vec::new(),
            retained: 0,
            skipped: Vec::new(),
        };

        for entry in iter_with_id(store, &self.policy.pattern).map_err(ExpireError::Enumerate)? {
            let (name, id) = entry.map_err(ExpireError::Enumerate)?;
            if self.policy.exempt.contains(&name) || is_symbolic_head(&name) {
                continue;
            }

            match self.check(&name, &id, baseline.as_ref(), cutoff)? {
                Verdict::Expired(reason) => {
                    debug!(refname = %name, reason = %reason, "expired");
                    report.expired.push(Expired { name, reason });
                }
                Verdict::Retained => report.retained += 1,
                Verdict::NotACommit => {
                    warn!(refname = %name, id = %id, "ref does not point at a commit, skipping");
                    report.skipped.push(name);
                }
            }
        }

        Ok(report)
    }

    fn check(
        &self,
        name: &str,
        id: &Oid,
        baseline: Option<&Oid>,
        cutoff: DateTime<Utc>,
    ) -> Result<Verdict, ExpireError> {
        let inspect = |source| ExpireError::Inspect {
            refname: name.to_string(),
            source,
        };

        let tip = match self.store.commit(id) {
            Ok(commit) => commit,
            Err(EngineError::ObjectNotFound { .. }) => return Ok(Verdict::NotACommit),
            Err(e) => return Err(inspect(e)),
        };

        if self.policy.tip_age && tip.author.time < cutoff {
            return Ok(Verdict::Expired(ExpireReason::TipAge {
                authored: tip.author.time,
            }));
        }

        if let Some(baseline) = baseline {
            if let Some(merge_base) = self.store.merge_base(baseline, id).map_err(inspect)? {
                let committed = self.store.commit(&merge_base).map_err(inspect)?.commit_time();
                if committed < cutoff {
                    return Ok(Verdict::Expired(ExpireReason::MergeBaseAge {
                        merge_base,
                        committed,
                    }));
                }
            }
        }

        Ok(Verdict::Retained)
    }

    /// Delete everything [`Expiry::plan`] selects, then compact.
    pub fn run(self) -> Result<ExpireReport, ExpireError> {
        let report = self.plan()?;
        info!(
            cutoff = %report.cutoff.to_rfc3339(),
            count = report.expired.len(),
            retained = report.retained,
            "expiring refs"
        );
        if report.expired.is_empty() {
            return Ok(report);
        }

        let mut tx = Transaction::new()?;
        for expired in &report.expired {
            tx.delete(&expired.name)?;
        }
        tx.apply(&mut *self.store)?;
        self.store.compact().map_err(ExpireError::Compact)?;

        info!(count = report.expired.len(), "expired refs");
        Ok(report)
    }
}

enum Verdict {
    Expired(ExpireReason),
    Retained,
    NotACommit,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::MemoryStore;

    const MASTER: &str = "refs/heads/master";

    fn days_ago(now: DateTime<Utc>, days: i64) -> DateTime<Utc> {
        now - TimeDelta::days(days)
    }

    #[test]
    fn nothing_old_means_no_writes() {
        let now = Utc::now();
        let mut store = MemoryStore::new();
        store.add_branch(MASTER, "ci@twitter.com", now);
        store.add_branch("refs/heads/new", "a@twitter.com", days_ago(now, 1));

        let report = Expiry::new(&mut store, ExpirePolicy::new(MASTER))
            .at(now)
            .run()
            .unwrap();
        assert!(report.expired.is_empty());
        assert_eq!(report.retained, 1);
        assert_eq!(store.apply_calls(), 0);
        assert_eq!(store.compact_calls(), 0);
    }

    #[test]
    fn exempt_refs_survive_any_age() {
        let now = Utc::now();
        let mut store = MemoryStore::new();
        store.add_branch(MASTER, "ci@twitter.com", days_ago(now, 1000));

        let report = Expiry::new(&mut store, ExpirePolicy::new(MASTER))
            .at(now)
            .run()
            .unwrap();
        assert!(report.expired.is_empty());
        assert_eq!(store.ref_names(), vec![MASTER]);
    }

    #[test]
    fn tip_policy_can_be_disabled() {
        let now = Utc::now();
        let mut store = MemoryStore::new();
        store.add_branch(MASTER, "ci@twitter.com", now);
        store.add_branch("refs/heads/old", "a@twitter.com", days_ago(now, 200));

        let policy = ExpirePolicy::new(MASTER).with_policies(false, true);
        let report = Expiry::new(&mut store, policy).at(now).plan().unwrap();
        // Unrelated history has no merge-base, so nothing applies.
        assert!(report.expired.is_empty());
    }

    #[test]
    fn missing_baseline_is_an_error_only_when_needed() {
        let now = Utc::now();
        let mut store = MemoryStore::new();
        store.add_branch("refs/heads/x", "a@twitter.com", now);

        let err = Expiry::new(&mut store, ExpirePolicy::new(MASTER))
            .plan()
            .unwrap_err();
        assert!(matches!(err, ExpireError::Baseline { .. }));

        let policy = ExpirePolicy::new(MASTER).with_policies(true, false);
        assert!(Expiry::new(&mut store, policy).plan().is_ok());
    }

    #[test]
    fn non_commit_targets_are_skipped() {
        let now = Utc::now();
        let mut store = MemoryStore::new();
        store.add_branch(MASTER, "ci@twitter.com", now);
        let blob = Oid::new("b".repeat(40)).unwrap();
        store.set_ref("refs/heads/blob", &blob);

        let report = Expiry::new(&mut store, ExpirePolicy::new(MASTER))
            .at(now)
            .plan()
            .unwrap();
        assert_eq!(report.skipped, vec!["refs/heads/blob"]);
    }

    #[test]
    fn reason_display() {
        let now = DateTime::from_timestamp(0, 0).unwrap();
        let reason = ExpireReason::TipAge { authored: now };
        assert_eq!(reason.to_string(), "tip-age\t1970-01-01T00:00:00+00:00");
    }
}

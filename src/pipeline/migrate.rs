//! pipeline::migrate
//!
//! Reorganize a repository's branches into per-author namespaces.
//!
//! # Architecture
//!
//! A run is a fixed sequence of [`Step`]s:
//!
//! 1. Relocate the remote's tracking refs onto plain branches
//! 2. Categorize every branch by its tip author
//! 3. Plan `refs/heads/u/<author>/...` names through one shared
//!    [`RenameIndex`] and apply them
//! 4. Quarantine untrusted authors under `refs/heads/unknown/`
//! 5. Delete branches whose author email is malformed
//! 6. Sweep every other unsettled ref into quarantine
//! 7. Flatten `refs/heads/u/<author>/...` into `refs/heads/<author>/...`
//! 8. Compact ref storage
//!
//! Every rename goes through [`apply_renames`], so new names exist before the
//! old ones are removed. Candidate names are placed in a [`RenameIndex`]
//! around the refs that already exist, and its walk is what gets written.
//!
//! A branch named exactly like one of the reserved prefixes (`refs/heads/u`,
//! `refs/heads/unknown`) would block every name under it. Categorizing moves
//! such a branch aside to `<prefix>_` first, so the prefixes themselves are
//! never renamed.
//!
//! # Invariants
//!
//! - The primary branch is never renamed or deleted
//! - Tags and `refs/namespaces/` are never touched
//! - A step with nothing to do makes no engine write
//! - The first failing step stops the run; applied steps stay applied
//!
//! # Example
//!
//! ```
//! use chrono::Utc;
//! use refkeeper::git::MemoryStore;
//! use refkeeper::pipeline::{Migration, MigrationSettings};
//!
//! let mut store = MemoryStore::new();
//! store.add_branch("refs/heads/master", "ci@twitter.com", Utc::now());
//! store.add_branch("refs/heads/fix", "alice@twitter.com", Utc::now());
//!
//! let xform = Migration::new(&mut store, MigrationSettings::default())
//!     .run()
//!     .unwrap();
//!
//! assert_eq!(store.ref_names(), vec!["refs/heads/alice/fix", "refs/heads/master"]);
//! assert_eq!(xform.len(), 1);
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap};

use thiserror::Error;
use tracing::{debug, info, warn};

use super::{apply_renames, is_symbolic_head, Rename};
use crate::core::reference::{
    branch_ref, is_valid_segment, Identity, Reference, TrustedDomain, REFS, REFS_HEADS,
    REFS_NAMESPACES, REFS_REMOTES,
};
use crate::core::rename_index::{first_free, NameConflict, RenameError, RenameIndex};
use crate::core::types::{Oid, TypeError};
use crate::core::xform::XForm;
use crate::git::{iter_refs, EngineError, RefFormat, RefQuery, RefStore, Transaction, TransactionError};

/// Transitional per-author prefix, removed again by [`Migration::flatten`].
pub const AUTHOR_PREFIX: &str = "refs/heads/u";

/// Quarantine prefix for refs that cannot be attributed.
pub const UNKNOWN_PREFIX: &str = "refs/heads/unknown";

/// Settings for one migration run.
#[derive(Debug, Clone)]
pub struct MigrationSettings {
    /// Branch name (not full ref) that is never renamed.
    pub primary_branch: String,
    /// Domain whose local parts name authors.
    pub trusted_domain: TrustedDomain,
    /// Remote whose tracking refs are relocated.
    pub remote: String,
}

impl MigrationSettings {
    /// Full ref name of the primary branch.
    pub fn primary_ref(&self) -> String {
        branch_ref(&self.primary_branch)
    }
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            primary_branch: "master".to_string(),
            trusted_domain: TrustedDomain::new("twitter.com"),
            remote: "origin".to_string(),
        }
    }
}

/// The stages of a migration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    RelocateRemotes,
    Categorize,
    AuthorRenames,
    Quarantine,
    DeleteInvalid,
    Sweep,
    Flatten,
    Compact,
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Step::RelocateRemotes => "relocate-remotes",
            Step::Categorize => "categorize",
            Step::AuthorRenames => "author-renames",
            Step::Quarantine => "quarantine",
            Step::DeleteInvalid => "delete-invalid",
            Step::Sweep => "sweep",
            Step::Flatten => "flatten",
            Step::Compact => "compact",
        })
    }
}

/// What went wrong inside a step.
#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error(transparent)]
    Rename(#[from] RenameError),

    /// A ref's reported target is not an object id.
    #[error("ref {refname} has an unusable target")]
    InvalidTarget {
        refname: String,
        #[source]
        source: TypeError,
    },
}

/// A migration run stopped at `step`.
#[derive(Debug, Error)]
#[error("migration stopped at step {step}")]
pub struct MigrateError {
    pub step: Step,
    #[source]
    pub source: StepError,
}

trait InStep<T> {
    fn in_step(self, step: Step) -> Result<T, MigrateError>;
}

impl<T, E: Into<StepError>> InStep<T> for Result<T, E> {
    fn in_step(self, step: Step) -> Result<T, MigrateError> {
        self.map_err(|e| MigrateError {
            step,
            source: e.into(),
        })
    }
}

/// Branches partitioned by author attribution.
#[derive(Debug, Default, Clone)]
pub struct Categories {
    /// Trusted-domain branches keyed by author local part.
    pub by_author: BTreeMap<String, Vec<Reference>>,
    /// Branches from other domains, or authors unusable as a name segment.
    pub untrusted: Vec<Reference>,
    /// Branches whose author email has no local part.
    pub invalid: Vec<Reference>,
    /// Every branch name seen, including settled ones.
    pub occupied: BTreeSet<String>,
    /// Branches squatting on a reserved prefix, as `(name, moved)`. The
    /// buckets and `occupied` already use the moved names.
    pub set_aside: Vec<(String, Reference)>,
}

impl Categories {
    /// Number of branches that were bucketed.
    pub fn len(&self) -> usize {
        self.by_author.values().map(Vec::len).sum::<usize>() + self.untrusted.len() + self.invalid.len()
    }

    /// Check if no branch needs work.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A walked set of renames and the conflicts resolved while planning it.
#[derive(Debug, Default, Clone)]
pub struct RenamePlan {
    pub renames: Vec<Rename>,
    pub conflicts: Vec<NameConflict>,
}

/// Target name for `name` under `author`'s transitional namespace.
///
/// A branch already starting with the author's segment is not doubled:
/// `refs/heads/alice/x` becomes `refs/heads/u/alice/x` and `refs/heads/y`
/// becomes `refs/heads/u/alice/y`.
pub fn author_ref_name(name: &str, author: &str) -> String {
    let relative = name
        .strip_prefix(REFS_HEADS)
        .and_then(|rest| rest.strip_prefix('/'))
        .unwrap_or(name);
    let first = relative.split('/').next().unwrap_or_default();
    if first == author && relative.len() > author.len() {
        format!("{AUTHOR_PREFIX}/{relative}")
    } else {
        format!("{AUTHOR_PREFIX}/{author}/{relative}")
    }
}

/// Quarantine name for `name`.
///
/// Branches keep their relative path; any other ref keeps everything after
/// `refs/`.
pub fn unknown_ref_name(name: &str) -> String {
    let relative = name
        .strip_prefix(REFS_HEADS)
        .and_then(|rest| rest.strip_prefix('/'))
        .or_else(|| name.strip_prefix("refs/"))
        .unwrap_or(name);
    format!("{UNKNOWN_PREFIX}/{relative}")
}

enum Bucket {
    Author(String),
    Untrusted,
    Invalid,
}

fn under(name: &str, prefix: &str) -> bool {
    name.strip_prefix(prefix)
        .is_some_and(|rest| rest.starts_with('/'))
}

/// Partition `refs/heads` by author.
///
/// The primary branch and anything already under the author or unknown
/// prefixes is left out of every bucket. A branch sitting exactly on one of
/// those prefixes is reported in [`Categories::set_aside`] and bucketed under
/// its moved name; nothing is written here.
pub fn categorize<S: RefStore + ?Sized>(
    store: &S,
    settings: &MigrationSettings,
) -> Result<Categories, EngineError> {
    let primary = settings.primary_ref();
    let mut categories = Categories::default();

    let heads: Vec<Reference> = iter_refs(store, REFS_HEADS, None)?.collect::<Result<_, _>>()?;
    categories.occupied = heads.iter().map(|r| r.name().to_string()).collect();

    for reference in heads {
        let reference = if is_reserved(reference.name()) && reference.name() != primary {
            set_aside(&mut categories, reference)
        } else {
            reference
        };

        let name = reference.name();
        if name == primary || under(name, AUTHOR_PREFIX) || under(name, UNKNOWN_PREFIX) {
            continue;
        }

        let bucket = match reference.identity(&settings.trusted_domain) {
            Identity::Trusted(local) if is_valid_segment(local) => Bucket::Author(local.to_string()),
            Identity::Trusted(local) => {
                warn!(refname = name, author = local, "author is not a usable name segment");
                Bucket::Untrusted
            }
            Identity::Untrusted => Bucket::Untrusted,
            Identity::Malformed => Bucket::Invalid,
        };
        match bucket {
            Bucket::Author(author) => categories.by_author.entry(author).or_default().push(reference),
            Bucket::Untrusted => categories.untrusted.push(reference),
            Bucket::Invalid => categories.invalid.push(reference),
        }
    }

    Ok(categories)
}

fn is_reserved(name: &str) -> bool {
    name == AUTHOR_PREFIX || name == UNKNOWN_PREFIX
}

/// Pick the name a squatting branch moves to and record the move.
fn set_aside(categories: &mut Categories, reference: Reference) -> Reference {
    let aside = first_free(&format!("{}_", reference.name()), &categories.occupied);
    warn!(refname = reference.name(), aside = %aside, "branch sits on a reserved prefix");

    categories.occupied.remove(reference.name());
    categories.occupied.insert(aside.clone());
    let moved = Reference::new(aside, reference.target(), reference.author_email());
    categories
        .set_aside
        .push((reference.name().to_string(), moved.clone()));
    moved
}

/// Plan the per-author renames for `categories` through one shared index.
pub fn plan_author_renames(categories: &Categories) -> Result<RenamePlan, StepError> {
    let proposals = categories.by_author.iter().flat_map(|(author, refs)| {
        refs.iter()
            .map(move |r| (author_ref_name(r.name(), author), r))
    });
    plan_renames(proposals, &categories.occupied)
}

fn plan_renames<'r>(
    proposals: impl IntoIterator<Item = (String, &'r Reference)>,
    occupied: &BTreeSet<String>,
) -> Result<RenamePlan, StepError> {
    let mut index = RenameIndex::new();
    let mut ids: HashMap<String, Oid> = HashMap::new();

    for (candidate, reference) in proposals {
        let id = Oid::new(reference.target()).map_err(|source| StepError::InvalidTarget {
            refname: reference.name().to_string(),
            source,
        })?;
        index.propose_around(&candidate, reference.name(), occupied)?;
        ids.insert(reference.name().to_string(), id);
    }

    let renames = index
        .walk()
        .into_iter()
        .filter_map(|(new, old)| {
            let id = ids.get(&old)?.clone();
            Some(Rename { old, new, id })
        })
        .collect();
    Ok(RenamePlan {
        renames,
        conflicts: index.conflicts().to_vec(),
    })
}

fn occupied_names<S: RefStore + ?Sized>(store: &S, pattern: &str) -> Result<BTreeSet<String>, EngineError> {
    store
        .for_each_ref(&RefQuery::new(pattern, RefFormat::Name))?
        .collect()
}

/// One migration run over a store.
pub struct Migration<'s, S: RefStore + ?Sized> {
    store: &'s mut S,
    settings: MigrationSettings,
    xform: XForm,
}

impl<'s, S: RefStore + ?Sized> Migration<'s, S> {
    pub fn new(store: &'s mut S, settings: MigrationSettings) -> Self {
        Self {
            store,
            settings,
            xform: XForm::new(),
        }
    }

    /// Renames recorded so far.
    pub fn xform(&self) -> &XForm {
        &self.xform
    }

    /// Run every step in order and return the audit log.
    ///
    /// # Errors
    ///
    /// [`MigrateError`] naming the first step that failed. Steps before it
    /// remain applied.
    pub fn run(mut self) -> Result<XForm, MigrateError> {
        info!(git_dir = %self.store.git_dir().display(), "starting migration");

        self.relocate_remotes()?;
        let categories = self.categorize()?;
        self.author_renames(&categories)?;
        self.quarantine(&categories.untrusted)?;
        self.delete_invalid(&categories.invalid)?;
        self.sweep()?;
        self.flatten()?;
        self.compact()?;

        info!(renamed = self.xform.len(), "migration complete");
        Ok(self.xform)
    }

    /// Move `refs/remotes/<remote>/*` onto `refs/heads/*` in one transaction.
    ///
    /// The remote's `HEAD` and its copy of the primary branch are deleted
    /// without being recreated. A destination that already exists is moved
    /// aside with the usual `_` suffix rather than overwritten.
    pub fn relocate_remotes(&mut self) -> Result<usize, MigrateError> {
        let step = Step::RelocateRemotes;
        let prefix = format!("{REFS_REMOTES}/{}", self.settings.remote);

        let remote_refs: Vec<Reference> = iter_refs(&*self.store, &prefix, None)
            .in_step(step)?
            .collect::<Result<_, _>>()
            .in_step(step)?;
        if remote_refs.is_empty() {
            debug!(step = %step, "no remote-tracking refs");
            return Ok(0);
        }

        let mut occupied = occupied_names(&*self.store, REFS_HEADS).in_step(step)?;
        let mut tx = Transaction::new().in_step(step)?;
        let mut moved = Vec::new();

        for reference in &remote_refs {
            let Some(relative) = reference
                .name()
                .strip_prefix(&prefix)
                .and_then(|rest| rest.strip_prefix('/'))
            else {
                continue;
            };

            if relative != "HEAD" && relative != self.settings.primary_branch {
                let new = first_free(&branch_ref(relative), &occupied);
                tx.create(&new, reference.target()).in_step(step)?;
                occupied.insert(new.clone());
                moved.push((reference.name().to_string(), new));
            }
            tx.delete(reference.name()).in_step(step)?;
        }

        tx.apply(&mut *self.store).in_step(step)?;
        for (old, new) in &moved {
            debug!(step = %step, old = %old, new = %new, "relocated");
            self.xform.record(old, new);
        }
        info!(step = %step, count = remote_refs.len(), "relocated remote-tracking refs");
        Ok(moved.len())
    }

    /// Bucket every branch by author.
    ///
    /// Branches squatting on a reserved prefix are moved aside in one
    /// transaction before the buckets are returned.
    pub fn categorize(&mut self) -> Result<Categories, MigrateError> {
        let step = Step::Categorize;
        let categories = categorize(&*self.store, &self.settings).in_step(step)?;

        if !categories.set_aside.is_empty() {
            let mut tx = Transaction::new().in_step(step)?;
            for (old, moved) in &categories.set_aside {
                tx.create(moved.name(), moved.target()).in_step(step)?;
                tx.delete(old).in_step(step)?;
            }
            tx.apply(&mut *self.store).in_step(step)?;
            for (old, moved) in &categories.set_aside {
                debug!(step = %step, old = %old, new = %moved.name(), "moved aside");
                self.xform.record(old, moved.name());
            }
        }

        info!(
            step = %Step::Categorize,
            authors = categories.by_author.len(),
            untrusted = categories.untrusted.len(),
            invalid = categories.invalid.len(),
            "categorized branches"
        );
        Ok(categories)
    }

    /// Move attributable branches under `refs/heads/u/<author>/`.
    pub fn author_renames(&mut self, categories: &Categories) -> Result<usize, MigrateError> {
        let step = Step::AuthorRenames;
        let plan = plan_author_renames(categories).in_step(step)?;
        for conflict in &plan.conflicts {
            debug!(
                step = %step,
                candidate = %conflict.candidate,
                existing = %conflict.existing,
                displaced_to = %conflict.displaced_to,
                "name conflict resolved"
            );
        }
        self.apply_step(step, &plan.renames)
    }

    /// Move `refs` under `refs/heads/unknown/`.
    pub fn quarantine(&mut self, refs: &[Reference]) -> Result<usize, MigrateError> {
        let step = Step::Quarantine;
        if refs.is_empty() {
            return Ok(0);
        }
        let occupied = occupied_names(&*self.store, REFS_HEADS).in_step(step)?;
        let proposals = refs.iter().map(|r| (unknown_ref_name(r.name()), r));
        let plan = plan_renames(proposals, &occupied).in_step(step)?;
        self.apply_step(step, &plan.renames)
    }

    /// Delete `refs` in one transaction without renaming them.
    pub fn delete_invalid(&mut self, refs: &[Reference]) -> Result<usize, MigrateError> {
        let step = Step::DeleteInvalid;
        if refs.is_empty() {
            return Ok(0);
        }
        let mut tx = Transaction::new().in_step(step)?;
        for reference in refs {
            warn!(
                step = %step,
                refname = reference.name(),
                email = reference.author_email(),
                "deleting ref with malformed author"
            );
            tx.delete(reference.name()).in_step(step)?;
        }
        tx.apply(&mut *self.store).in_step(step)?;
        info!(step = %step, count = refs.len(), "deleted refs");
        Ok(refs.len())
    }

    fn is_settled(&self, reference: &Reference) -> bool {
        let name = reference.name();
        name == self.settings.primary_ref()
            || reference.is_tag()
            || under(name, REFS_NAMESPACES)
            || under(name, AUTHOR_PREFIX)
            || under(name, UNKNOWN_PREFIX)
            || is_symbolic_head(name)
    }

    /// Quarantine every ref that no earlier step settled.
    pub fn sweep(&mut self) -> Result<usize, MigrateError> {
        let step = Step::Sweep;
        let all: Vec<Reference> = iter_refs(&*self.store, REFS, None)
            .in_step(step)?
            .collect::<Result<_, _>>()
            .in_step(step)?;

        let occupied: BTreeSet<String> = all
            .iter()
            .map(|r| r.name().to_string())
            .filter(|name| under(name, REFS_HEADS))
            .collect();
        let leftovers: Vec<&Reference> = all.iter().filter(|r| !self.is_settled(r)).collect();
        if leftovers.is_empty() {
            return Ok(0);
        }

        let proposals = leftovers.into_iter().map(|r| (unknown_ref_name(r.name()), r));
        let plan = plan_renames(proposals, &occupied).in_step(step)?;
        self.apply_step(step, &plan.renames)
    }

    /// Move `refs/heads/u/<rest>` to `refs/heads/<rest>`.
    ///
    /// Idempotent: with nothing left under the author prefix it makes no
    /// engine write.
    pub fn flatten(&mut self) -> Result<usize, MigrateError> {
        let step = Step::Flatten;
        let heads: Vec<Reference> = iter_refs(&*self.store, REFS_HEADS, None)
            .in_step(step)?
            .collect::<Result<_, _>>()
            .in_step(step)?;

        let occupied: BTreeSet<String> = heads.iter().map(|r| r.name().to_string()).collect();
        let proposals: Vec<(String, &Reference)> = heads
            .iter()
            .filter_map(|r| {
                let rest = r.name().strip_prefix(AUTHOR_PREFIX)?.strip_prefix('/')?;
                Some((branch_ref(rest), r))
            })
            .collect();
        if proposals.is_empty() {
            debug!(step = %step, "nothing to flatten");
            return Ok(0);
        }

        let plan = plan_renames(proposals, &occupied).in_step(step)?;
        self.apply_step(step, &plan.renames)
    }

    /// Pack ref storage.
    pub fn compact(&mut self) -> Result<(), MigrateError> {
        self.store.compact().in_step(Step::Compact)?;
        info!(step = %Step::Compact, "compacted refs");
        Ok(())
    }

    fn apply_step(&mut self, step: Step, renames: &[Rename]) -> Result<usize, MigrateError> {
        apply_renames(&mut *self.store, renames).in_step(step)?;
        for rename in renames {
            debug!(step = %step, old = %rename.old, new = %rename.new, "renamed");
            self.xform.record(&rename.old, &rename.new);
        }
        if !renames.is_empty() {
            info!(step = %step, count = renames.len(), "renamed refs");
        }
        Ok(renames.len())
    }
}

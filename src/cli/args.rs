//! cli::args
//!
//! Command-line argument definitions using clap derive.
//!
//! # Global Flags
//!
//! These flags are available on all commands:
//! - `--help` / `-h`: Show help
//! - `--version`: Show version
//! - `--git-dir <path>`: Repository to operate on
//! - `--debug`: Enable debug logging
//! - `--quiet` / `-q`: Only log warnings and errors

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// refkeeper - reorganize and expire refs in large shared repositories
#[derive(Parser, Debug)]
#[command(name = "refkeeper")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Repository to operate on (overrides $REFKEEPER_GIT_DIR and config)
    #[arg(long, global = true, value_name = "PATH")]
    pub git_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true, conflicts_with = "quiet")]
    pub debug: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Parser::parse()
    }
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Reorganize branches into per-author namespaces
    #[command(
        name = "migrate",
        long_about = "Reorganize every branch into a per-author namespace.\n\n\
            Remote-tracking refs become plain branches, branches by trusted authors \
            move to refs/heads/<author>/..., branches by anyone else move to \
            refs/heads/unknown/..., and branches whose author email has no local \
            part are deleted. The primary branch and tags are never touched.\n\n\
            Each step is one atomic batch. A failing step stops the run; steps \
            already applied stay applied.",
        after_help = "\
OUTPUT:
    One line per renamed ref on stdout: the final name, then every earlier
    name back to the original, tab-separated. Logs go to stderr.

EXAMPLES:
    # Migrate the configured repository
    refkeeper migrate

    # Migrate a specific mirror and keep a JSON audit
    refkeeper --git-dir /repos/source/full.git migrate --json > audit.json"
    )]
    Migrate {
        /// Print the rename audit as JSON
        #[arg(long)]
        json: bool,
    },

    /// Remove the transitional refs/heads/u/ prefix
    #[command(
        name = "flatten",
        long_about = "Move refs/heads/u/<author>/... to refs/heads/<author>/... and compact.\n\n\
            This is the last renaming step of `migrate`, runnable on its own to finish \
            an interrupted migration. Running it again is a no-op."
    )]
    Flatten,

    /// Delete refs that are too old
    #[command(
        name = "expire",
        long_about = "Delete refs whose tip, or whose merge-base with the baseline, is older \
            than the horizon.\n\n\
            The primary branch and the baseline never expire. Deletions are applied in \
            one batch, followed by compaction.",
        after_help = "\
EXAMPLES:
    # Preview what would expire
    refkeeper expire --dry-run

    # Expire branches untouched for 30 days, ignoring merge-bases
    refkeeper expire --days 30 --no-merge-base --pattern refs/heads"
    )]
    Expire {
        /// Horizon in days (default from config, else 90)
        #[arg(long, value_name = "DAYS", value_parser = clap::value_parser!(u32).range(1..))]
        days: Option<u32>,

        /// Do not expire on tip age
        #[arg(long)]
        no_tip_age: bool,

        /// Do not expire on merge-base age
        #[arg(long)]
        no_merge_base: bool,

        /// Ref prefix to examine (default from config, else refs)
        #[arg(long, value_name = "PREFIX")]
        pattern: Option<String>,

        /// Report what would expire without deleting anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Move developer branches into hashed gitnamespaces
    #[command(
        name = "namespace-devs",
        long_about = "Move every refs/heads/<user>/... branch into \
            refs/namespaces/<ns>/refs/heads/<user>/..., where <ns> comes from the \
            configured hash command.\n\n\
            The hash command reads usernames on stdin, one per line, and prints \
            `user<TAB>namespace` lines."
    )]
    NamespaceDevs,

    /// List refs with their target and author
    #[command(name = "list")]
    List {
        /// Ref prefix to list
        #[arg(default_value = "refs")]
        pattern: String,

        /// Sort key, e.g. refname or -committerdate
        #[arg(long, value_name = "KEY")]
        sort: Option<String>,
    },

    /// Show the per-author rename plan without applying it
    #[command(name = "plan")]
    Plan,

    /// Generate shell completion scripts
    #[command(
        name = "completion",
        after_help = "\
EXAMPLES:
    # Bash (add to ~/.bashrc)
    refkeeper completion bash >> ~/.bashrc

    # Zsh (add to ~/.zshrc)
    refkeeper completion zsh >> ~/.zshrc"
    )]
    Completion {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Supported shells for completion
#[derive(clap::ValueEnum, Debug, Clone, Copy)]
#[allow(clippy::enum_variant_names)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
}

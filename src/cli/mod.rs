//! cli
//!
//! Command-line interface layer for refkeeper.
//!
//! # Responsibilities
//!
//! - Parse command-line arguments and global flags
//! - Set up logging on stderr
//! - Resolve the repository and configuration, then delegate to handlers
//!
//! # Architecture
//!
//! The CLI layer is thin. Handlers build settings from config and flags and
//! call into [`crate::pipeline`]; all ref changes flow through the
//! pipelines' transactions. Standard output carries command results only.

pub mod args;
pub mod commands;

pub use args::{Cli, Shell};

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context as _, Result};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::core::config::Config;
use crate::core::ops::RepoLock;
use crate::core::paths::RepoPaths;
use crate::git::{GitStore, RefStore, Timeouts};

/// Environment variable naming the repository.
pub const GIT_DIR_ENV: &str = "REFKEEPER_GIT_DIR";

/// Flags shared by every command.
#[derive(Debug, Clone, Default)]
pub struct Context {
    /// Repository given with `--git-dir`.
    pub git_dir: Option<PathBuf>,
    /// Debug logging enabled.
    pub debug: bool,
    /// Warnings and errors only.
    pub quiet: bool,
}

/// An opened repository with its merged configuration.
pub struct Session {
    pub store: GitStore,
    pub config: Config,
    pub paths: RepoPaths,
}

impl Session {
    /// Take the repository lock for a mutating command.
    pub fn lock(&self) -> Result<RepoLock> {
        RepoLock::acquire(&self.paths).context("Failed to lock repository")
    }
}

impl Context {
    /// Repository from the flag, then the environment, then global config.
    fn resolve_git_dir(&self, global: &Config) -> Result<PathBuf> {
        if let Some(dir) = &self.git_dir {
            return Ok(dir.clone());
        }
        if let Some(dir) = std::env::var_os(GIT_DIR_ENV).filter(|v| !v.is_empty()) {
            return Ok(PathBuf::from(dir));
        }
        global.git_dir().map(Path::to_path_buf).ok_or_else(|| {
            anyhow!("No repository given. Use --git-dir, set ${GIT_DIR_ENV}, or set git_dir in the config")
        })
    }

    /// Open the repository and load its configuration.
    pub fn open(&self) -> Result<Session> {
        let global = Config::load(None).context("Failed to load config")?.config;
        let git_dir = self.resolve_git_dir(&global)?;

        let store = GitStore::open(&git_dir)
            .with_context(|| format!("Failed to open repository {}", git_dir.display()))?;
        let config = Config::load(Some(store.git_dir()))
            .context("Failed to load config")?
            .config;
        debug!(
            global = ?config.global_config_loaded_from(),
            repo = ?config.repo_config_loaded_from(),
            "loaded config"
        );

        let paths = RepoPaths::new(store.git_dir());
        let store = store
            .with_program(config.git_program())
            .with_timeouts(Timeouts {
                exit: config.exit_timeout(),
                term: config.term_timeout(),
            })
            .with_write_timeout(config.write_timeout());

        Ok(Session {
            store,
            config,
            paths,
        })
    }
}

/// Install the stderr log subscriber.
///
/// `RUST_LOG` wins when set; otherwise `--debug` and `--quiet` pick the level.
pub fn init_logging(debug: bool, quiet: bool) {
    let default = if debug {
        "refkeeper=debug"
    } else if quiet {
        "warn"
    } else {
        "refkeeper=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(debug)
        .try_init();
}

/// Run the CLI application.
///
/// This is the main entry point called from `main.rs`.
pub fn run() -> Result<()> {
    let cli = Cli::parse_args();
    init_logging(cli.debug, cli.quiet);

    let ctx = Context {
        git_dir: cli.git_dir,
        debug: cli.debug,
        quiet: cli.quiet,
    };

    commands::dispatch(cli.command, &ctx)
}

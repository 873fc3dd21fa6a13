//! core::config
//!
//! Configuration schema and loading.
//!
//! # Overview
//!
//! refkeeper has two configuration scopes:
//! - **Global**: User-level settings, including the default repository
//! - **Repo**: Per-repository overrides stored inside the git directory
//!
//! # Precedence
//!
//! Configuration values are resolved in this order (later overrides earlier):
//! 1. Default values
//! 2. Global config file
//! 3. Repo config file
//! 4. CLI flags (not handled here)
//!
//! # Global Config Locations
//!
//! Searched in order:
//! 1. `$REFKEEPER_CONFIG` if set
//! 2. `$XDG_CONFIG_HOME/refkeeper/config.toml`
//! 3. `~/.refkeeper/config.toml`
//!
//! # Example
//!
//! ```no_run
//! use refkeeper::core::config::Config;
//! use std::path::Path;
//!
//! let result = Config::load(Some(Path::new("/repos/source/full.git"))).unwrap();
//! let config = result.config;
//!
//! println!("Primary: {}", config.primary_branch());
//! println!("Horizon: {} days", config.horizon_days());
//! ```

pub mod schema;

pub use schema::{EngineConfig, ExpireConfig, GlobalConfig, NamespaceConfig, RepoConfig};

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

use crate::core::paths::RepoPaths;

/// Default primary branch.
pub const DEFAULT_PRIMARY_BRANCH: &str = "master";
/// Default trusted email domain.
pub const DEFAULT_TRUSTED_DOMAIN: &str = "twitter.com";
/// Default remote.
pub const DEFAULT_REMOTE: &str = "origin";
/// Default expiry horizon.
pub const DEFAULT_HORIZON_DAYS: u32 = 90;
/// Default external namespace hasher.
pub const DEFAULT_HASH_COMMAND: &[&str] = &["twgit", "hash", "--repo=source", "--role=dev", "-"];

const DEFAULT_EXIT_TIMEOUT_SECS: u64 = 15;
const DEFAULT_TERM_TIMEOUT_SECS: u64 = 5;
const DEFAULT_WRITE_TIMEOUT_SECS: u64 = 60 * 60;

/// Errors from configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("invalid config value: {0}")]
    InvalidValue(String),
}

/// Result of loading configuration.
#[derive(Debug)]
pub struct ConfigLoadResult {
    /// The loaded configuration.
    pub config: Config,
}

/// Merged configuration from all sources.
///
/// Accessors apply precedence automatically: repo over global over default.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Global configuration
    pub global: GlobalConfig,
    /// Repository configuration (if one was found)
    pub repo: Option<RepoConfig>,
    global_path: Option<PathBuf>,
    repo_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from default locations.
    ///
    /// If `git_dir` is provided, also loads that repository's config.
    ///
    /// # Errors
    ///
    /// Returns an error if config files exist but cannot be parsed or fail
    /// validation. Missing config files are not an error.
    pub fn load(git_dir: Option<&Path>) -> Result<ConfigLoadResult, ConfigError> {
        let (global, global_path) = Self::load_global()?;

        let (repo, repo_path) = match git_dir {
            Some(dir) => Self::load_repo(dir)?,
            None => (None, None),
        };

        global.validate()?;
        if let Some(ref r) = repo {
            r.validate()?;
        }

        Ok(ConfigLoadResult {
            config: Config {
                global,
                repo,
                global_path,
                repo_path,
            },
        })
    }

    /// Load global configuration from standard locations.
    fn load_global() -> Result<(GlobalConfig, Option<PathBuf>), ConfigError> {
        for path in Self::global_candidates() {
            if path.exists() {
                debug!(path = %path.display(), "loading global config");
                let config = Self::read_config(&path)?;
                return Ok((config, Some(path)));
            }
        }
        Ok((GlobalConfig::default(), None))
    }

    fn global_candidates() -> Vec<PathBuf> {
        let mut candidates = Vec::new();
        if let Ok(path) = std::env::var("REFKEEPER_CONFIG") {
            candidates.push(PathBuf::from(path));
        }
        if let Ok(xdg_home) = std::env::var("XDG_CONFIG_HOME") {
            candidates.push(PathBuf::from(xdg_home).join("refkeeper/config.toml"));
        }
        if let Some(home) = dirs::home_dir() {
            candidates.push(home.join(".refkeeper/config.toml"));
        }
        candidates
    }

    /// Load repository configuration from inside the git directory.
    fn load_repo(git_dir: &Path) -> Result<(Option<RepoConfig>, Option<PathBuf>), ConfigError> {
        let path = RepoPaths::new(git_dir).repo_config_path();
        if !path.exists() {
            return Ok((None, None));
        }
        debug!(path = %path.display(), "loading repo config");
        let config = Self::read_config(&path)?;
        Ok((Some(config), Some(path)))
    }

    fn read_config<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&contents).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    // =========================================================================
    // Accessor methods with precedence
    // =========================================================================

    /// Repository named by the global config, if any.
    pub fn git_dir(&self) -> Option<&Path> {
        self.global.git_dir.as_deref().map(Path::new)
    }

    /// Primary branch short name.
    ///
    /// Defaults to "master".
    pub fn primary_branch(&self) -> &str {
        self.repo
            .as_ref()
            .and_then(|r| r.primary_branch.as_deref())
            .or(self.global.primary_branch.as_deref())
            .unwrap_or(DEFAULT_PRIMARY_BRANCH)
    }

    /// Trusted author email domain.
    ///
    /// Defaults to "twitter.com".
    pub fn trusted_domain(&self) -> &str {
        self.repo
            .as_ref()
            .and_then(|r| r.trusted_domain.as_deref())
            .or(self.global.trusted_domain.as_deref())
            .unwrap_or(DEFAULT_TRUSTED_DOMAIN)
    }

    /// Remote whose tracking refs are relocated.
    ///
    /// Defaults to "origin".
    pub fn remote(&self) -> &str {
        self.repo
            .as_ref()
            .and_then(|r| r.remote.as_deref())
            .or(self.global.remote.as_deref())
            .unwrap_or(DEFAULT_REMOTE)
    }

    fn engine_field<T>(&self, f: impl Fn(&EngineConfig) -> Option<T>) -> Option<T> {
        self.repo
            .as_ref()
            .and_then(|r| r.engine.as_ref())
            .and_then(&f)
            .or_else(|| self.global.engine.as_ref().and_then(&f))
    }

    fn expire_field<T>(&self, f: impl Fn(&ExpireConfig) -> Option<T>) -> Option<T> {
        self.repo
            .as_ref()
            .and_then(|r| r.expire.as_ref())
            .and_then(&f)
            .or_else(|| self.global.expire.as_ref().and_then(&f))
    }

    /// Git executable.
    pub fn git_program(&self) -> String {
        self.engine_field(|e| e.git.clone())
            .unwrap_or_else(|| "git".to_string())
    }

    /// How long a child may take to exit on its own.
    pub fn exit_timeout(&self) -> Duration {
        Duration::from_secs(
            self.engine_field(|e| e.exit_timeout_secs)
                .unwrap_or(DEFAULT_EXIT_TIMEOUT_SECS),
        )
    }

    /// How long to wait after each termination signal.
    pub fn term_timeout(&self) -> Duration {
        Duration::from_secs(
            self.engine_field(|e| e.term_timeout_secs)
                .unwrap_or(DEFAULT_TERM_TIMEOUT_SECS),
        )
    }

    /// How long a ref write (batch apply, packing) may run.
    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(
            self.engine_field(|e| e.write_timeout_secs)
                .unwrap_or(DEFAULT_WRITE_TIMEOUT_SECS),
        )
    }

    /// Expiry horizon in days.
    pub fn horizon_days(&self) -> u32 {
        self.expire_field(|e| e.horizon_days)
            .unwrap_or(DEFAULT_HORIZON_DAYS)
    }

    /// Full ref name that merge-base ages are measured against.
    ///
    /// Defaults to the primary branch.
    pub fn expire_baseline(&self) -> String {
        self.expire_field(|e| e.baseline.clone())
            .unwrap_or_else(|| crate::core::reference::branch_ref(self.primary_branch()))
    }

    /// Whether tip age expires refs.
    pub fn expire_tip_age(&self) -> bool {
        self.expire_field(|e| e.tip_age).unwrap_or(true)
    }

    /// Whether merge-base age expires refs.
    pub fn expire_merge_base_age(&self) -> bool {
        self.expire_field(|e| e.merge_base_age).unwrap_or(true)
    }

    /// Enumeration prefix for expiry.
    pub fn expire_pattern(&self) -> String {
        self.expire_field(|e| e.pattern.clone())
            .unwrap_or_else(|| crate::core::reference::REFS.to_string())
    }

    /// External namespace hasher program and arguments.
    pub fn hash_command(&self) -> Vec<String> {
        self.repo
            .as_ref()
            .and_then(|r| r.namespace.as_ref())
            .and_then(|n| n.hash_command.clone())
            .or_else(|| {
                self.global
                    .namespace
                    .as_ref()
                    .and_then(|n| n.hash_command.clone())
            })
            .unwrap_or_else(|| DEFAULT_HASH_COMMAND.iter().map(|s| s.to_string()).collect())
    }

    /// Get the path to the loaded global config file.
    pub fn global_config_loaded_from(&self) -> Option<&Path> {
        self.global_path.as_deref()
    }

    /// Get the path to the loaded repo config file.
    pub fn repo_config_loaded_from(&self) -> Option<&Path> {
        self.repo_path.as_deref()
    }
}

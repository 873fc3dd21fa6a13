//! core::config::schema
//!
//! Configuration schema types.
//!
//! # Global Config
//!
//! Located at (in order of precedence):
//! 1. `$REFKEEPER_CONFIG` if set
//! 2. `$XDG_CONFIG_HOME/refkeeper/config.toml`
//! 3. `~/.refkeeper/config.toml` (canonical write location)
//!
//! # Repo Config
//!
//! Located at `<git_dir>/refkeeper/config.toml`.
//!
//! # Validation
//!
//! Config values are validated after parsing (e.g., the trusted domain must
//! not carry an `@`, timeouts must be positive).

use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::core::reference::is_valid_branch_name;

/// Global configuration (user scope).
///
/// # Example
///
/// ```toml
/// git_dir = "/repos/source/full.git"
/// primary_branch = "master"
/// trusted_domain = "twitter.com"
///
/// [engine]
/// exit_timeout_secs = 30
///
/// [expire]
/// horizon_days = 60
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct GlobalConfig {
    /// Repository to operate on when no flag or env var names one
    pub git_dir: Option<String>,

    /// Branch exempt from renaming and expiry
    pub primary_branch: Option<String>,

    /// Email domain that identifies authors
    pub trusted_domain: Option<String>,

    /// Remote whose tracking refs are relocated
    pub remote: Option<String>,

    /// Engine invocation settings
    pub engine: Option<EngineConfig>,

    /// Expiry defaults
    pub expire: Option<ExpireConfig>,

    /// Dev-namespace rewrite settings
    pub namespace: Option<NamespaceConfig>,
}

impl GlobalConfig {
    /// Validate the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if any value is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(git_dir) = &self.git_dir {
            if git_dir.is_empty() {
                return Err(ConfigError::InvalidValue(
                    "git_dir cannot be empty".to_string(),
                ));
            }
        }
        validate_shared(
            self.primary_branch.as_deref(),
            self.trusted_domain.as_deref(),
            self.remote.as_deref(),
        )?;
        if let Some(engine) = &self.engine {
            engine.validate()?;
        }
        if let Some(expire) = &self.expire {
            expire.validate()?;
        }
        if let Some(namespace) = &self.namespace {
            namespace.validate()?;
        }
        Ok(())
    }
}

/// Repository configuration.
///
/// Same keys as [`GlobalConfig`] minus `git_dir`, which would be circular.
///
/// # Example
///
/// ```toml
/// primary_branch = "main"
///
/// [expire]
/// baseline = "refs/heads/release"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RepoConfig {
    /// Branch exempt from renaming and expiry
    pub primary_branch: Option<String>,

    /// Email domain that identifies authors
    pub trusted_domain: Option<String>,

    /// Remote whose tracking refs are relocated
    pub remote: Option<String>,

    /// Engine invocation settings
    pub engine: Option<EngineConfig>,

    /// Expiry settings
    pub expire: Option<ExpireConfig>,

    /// Dev-namespace rewrite settings
    pub namespace: Option<NamespaceConfig>,
}

impl RepoConfig {
    /// Validate the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if any value is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_shared(
            self.primary_branch.as_deref(),
            self.trusted_domain.as_deref(),
            self.remote.as_deref(),
        )?;
        if let Some(engine) = &self.engine {
            engine.validate()?;
        }
        if let Some(expire) = &self.expire {
            expire.validate()?;
        }
        if let Some(namespace) = &self.namespace {
            namespace.validate()?;
        }
        Ok(())
    }
}

fn validate_shared(
    primary_branch: Option<&str>,
    trusted_domain: Option<&str>,
    remote: Option<&str>,
) -> Result<(), ConfigError> {
    if let Some(branch) = primary_branch {
        if !is_valid_branch_name(branch) {
            return Err(ConfigError::InvalidValue(format!(
                "invalid primary branch name '{}'",
                branch
            )));
        }
    }

    if let Some(domain) = trusted_domain {
        if domain.is_empty() || domain.contains('@') {
            return Err(ConfigError::InvalidValue(format!(
                "trusted_domain must be a bare domain, got '{}'",
                domain
            )));
        }
    }

    if let Some(remote) = remote {
        if remote.is_empty() || remote.contains('/') {
            return Err(ConfigError::InvalidValue(format!(
                "invalid remote name '{}'",
                remote
            )));
        }
    }

    Ok(())
}

/// Engine invocation settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Git executable (default: "git")
    pub git: Option<String>,

    /// Seconds to wait for a child to exit on its own
    pub exit_timeout_secs: Option<u64>,

    /// Seconds to wait after each termination signal
    pub term_timeout_secs: Option<u64>,

    /// Seconds a ref write (update-ref, pack-refs) may run
    pub write_timeout_secs: Option<u64>,
}

impl EngineConfig {
    /// Validate the engine settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if matches!(self.git.as_deref(), Some("")) {
            return Err(ConfigError::InvalidValue(
                "engine.git cannot be empty".to_string(),
            ));
        }
        if [self.exit_timeout_secs, self.term_timeout_secs, self.write_timeout_secs].contains(&Some(0)) {
            return Err(ConfigError::InvalidValue(
                "engine timeouts must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Expiry settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ExpireConfig {
    /// Age in days past which a ref expires
    pub horizon_days: Option<u32>,

    /// Ref that merge-base ages are measured against
    pub baseline: Option<String>,

    /// Expire on tip author time
    pub tip_age: Option<bool>,

    /// Expire on merge-base commit time
    pub merge_base_age: Option<bool>,

    /// Enumeration prefix
    pub pattern: Option<String>,
}

impl ExpireConfig {
    /// Validate the expiry settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.horizon_days == Some(0) {
            return Err(ConfigError::InvalidValue(
                "expire.horizon_days must be positive".to_string(),
            ));
        }
        if matches!(self.baseline.as_deref(), Some("")) {
            return Err(ConfigError::InvalidValue(
                "expire.baseline cannot be empty".to_string(),
            ));
        }
        if matches!(self.pattern.as_deref(), Some("")) {
            return Err(ConfigError::InvalidValue(
                "expire.pattern cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Dev-namespace rewrite settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct NamespaceConfig {
    /// Program and arguments mapping usernames to namespace ids
    pub hash_command: Option<Vec<String>>,
}

impl NamespaceConfig {
    /// Validate the namespace settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(command) = &self.hash_command {
            if command.first().map_or(true, |program| program.is_empty()) {
                return Err(ConfigError::InvalidValue(
                    "namespace.hash_command needs a program".to_string(),
                ));
            }
        }
        Ok(())
    }
}

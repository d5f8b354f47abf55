//! TOML-based configuration for a bridged repository.
//!
//! One config file describes one exported repository: where the Git
//! repository lives, which branch is served, how the revision cache behaves,
//! how pushes are performed, and which linked repositories are consulted
//! when resolving submodule contents.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::ConfigError;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level bridge configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// The exported repository.
    pub repository: RepositoryConfig,

    /// Revision cache behaviour.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Push behaviour.
    #[serde(default)]
    pub push: PushConfig,

    /// Linked repositories used to resolve submodule contents, in priority
    /// order.
    #[serde(default)]
    pub linked: Vec<LinkedRepositoryConfig>,
}

// ---------------------------------------------------------------------------
// Repository
// ---------------------------------------------------------------------------

/// The exported Git repository and branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Filesystem path of the Git repository (bare or non-bare).
    pub path: PathBuf,

    /// Name of the branch served to SVN clients (default `master`).
    #[serde(default = "default_branch")]
    pub branch: String,
}

fn default_branch() -> String {
    "master".into()
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

/// Revision cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Schema version embedded in the side-branch ref name.
    #[serde(default = "default_schema")]
    pub schema: u32,

    /// Whether rename detection runs during cache extension.
    #[serde(default = "default_rename_detection")]
    pub rename_detection: bool,

    /// Similarity threshold (percent) for rename detection.
    #[serde(default = "default_rename_threshold")]
    pub rename_threshold: u16,

    /// Milliseconds between side-branch ref flushes during a long cache
    /// extension, so partial progress survives a crash.
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
}

fn default_schema() -> u32 {
    1
}
fn default_rename_detection() -> bool {
    true
}
fn default_rename_threshold() -> u16 {
    60
}
fn default_flush_interval_ms() -> u64 {
    2500
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            schema: default_schema(),
            rename_detection: default_rename_detection(),
            rename_threshold: default_rename_threshold(),
            flush_interval_ms: default_flush_interval_ms(),
        }
    }
}

impl CacheConfig {
    /// The side-branch ref holding the revision cache for `branch`.
    pub fn cache_ref(&self, branch: &str) -> String {
        format!("refs/git-as-svn/v{}/{}", self.schema, branch)
    }
}

// ---------------------------------------------------------------------------
// Push
// ---------------------------------------------------------------------------

/// How commits reach the exported branch.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PushMode {
    /// Atomic compare-and-swap on the ref inside the process.
    #[default]
    Simple,
    /// Shell out to `git push` so server-side hooks run.
    Native,
}

/// Push settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PushConfig {
    /// Push mode (default `simple`).
    #[serde(default)]
    pub mode: PushMode,
}

// ---------------------------------------------------------------------------
// Linked repositories
// ---------------------------------------------------------------------------

/// A repository consulted when resolving submodule commits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkedRepositoryConfig {
    /// Filesystem path of the linked Git repository.
    pub path: PathBuf,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl BridgeConfig {
    /// Load and validate a configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }
        let raw = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&raw).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Validate field constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.repository.branch.is_empty() || self.repository.branch.contains('/') {
            return Err(ConfigError::InvalidValue {
                field: "repository.branch".into(),
                detail: "must be a non-empty single-level branch name".into(),
            });
        }
        if self.cache.rename_threshold > 100 {
            return Err(ConfigError::InvalidValue {
                field: "cache.rename_threshold".into(),
                detail: "must be a percentage in [0, 100]".into(),
            });
        }
        if self.cache.flush_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "cache.flush_interval_ms".into(),
                detail: "must be greater than zero".into(),
            });
        }
        Ok(())
    }

    /// A config with defaults for the given repository path, used by tests
    /// and by the CLI when no config file is given.
    pub fn for_repository<P: Into<PathBuf>>(path: P, branch: &str) -> Self {
        Self {
            repository: RepositoryConfig {
                path: path.into(),
                branch: branch.to_string(),
            },
            cache: CacheConfig::default(),
            push: PushConfig::default(),
            linked: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal() {
        let toml_str = r#"
            [repository]
            path = "/srv/git/project.git"
        "#;
        let config: BridgeConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.repository.branch, "master");
        assert_eq!(config.cache.schema, 1);
        assert!(config.cache.rename_detection);
        assert_eq!(config.push.mode, PushMode::Simple);
        assert!(config.linked.is_empty());
    }

    #[test]
    fn test_parse_full() {
        let toml_str = r#"
            [repository]
            path = "/srv/git/project.git"
            branch = "main"

            [cache]
            schema = 2
            rename_detection = false
            flush_interval_ms = 500

            [push]
            mode = "native"

            [[linked]]
            path = "/srv/git/lib.git"
        "#;
        let config: BridgeConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.repository.branch, "main");
        assert_eq!(config.cache.cache_ref("main"), "refs/git-as-svn/v2/main");
        assert!(!config.cache.rename_detection);
        assert_eq!(config.push.mode, PushMode::Native);
        assert_eq!(config.linked.len(), 1);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = BridgeConfig::for_repository("/tmp/repo", "master");
        config.repository.branch = "a/b".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));

        let mut config = BridgeConfig::for_repository("/tmp/repo", "master");
        config.cache.rename_threshold = 101;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            BridgeConfig::load("/nonexistent/bridge.toml"),
            Err(ConfigError::FileNotFound(_))
        ));
    }
}

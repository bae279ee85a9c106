//! Configuration of the repository registry.
//!
//! A registry is described by a TOML file:
//!
//! ```toml
//! [pool]
//! maxPoolSize = 20
//! blockingTimeoutMillis = 100
//!
//! [[repositories]]
//! name = "default"
//! path = "/var/lib/docrepo/default"
//! default = true
//! [repositories.pool]
//! maxActive = 4
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::pool::{PoolConfig, PoolConfigOverride};

/// directory under the backend path used when no binary root is configured
const DEFAULT_BINARY_DIR: &str = "binaries";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level registry configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// pool settings shared by every repository
    #[serde(default)]
    pub pool: PoolConfigOverride,

    #[serde(default)]
    pub repositories: Vec<RepositoryConfig>,
}

impl RegistryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: RegistryConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn pool(mut self, pool: PoolConfigOverride) -> Self {
        self.pool = pool;
        self
    }

    pub fn repository(mut self, repository: RepositoryConfig) -> Self {
        self.repositories.push(repository);
        self
    }

    /// Check names are unique and at most one repository is the default.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut names = HashSet::new();
        for repo in &self.repositories {
            if repo.name.trim().is_empty() {
                return Err(ConfigError::Invalid("repository name must not be empty".to_string()));
            }
            if !names.insert(repo.name.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate repository name: {}", repo.name)));
            }
        }

        let defaults = self.repositories.iter().filter(|r| r.default).count();
        if defaults > 1 {
            return Err(ConfigError::Invalid(format!(
                "{} repositories are marked default, at most one may be",
                defaults
            )));
        }
        Ok(())
    }

    /// Effective pool configuration of one repository.
    ///
    /// Built-in defaults, then `[pool]`, then the repository's own section.
    pub fn effective_pool(&self, repository: &RepositoryConfig) -> Result<PoolConfig, ConfigError> {
        let config = PoolConfig::default().merge(&self.pool.merge(&repository.pool));
        config.validate()?;
        Ok(config)
    }
}

/// Configuration of one repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryConfig {
    pub name: String,
    /// backend git repository
    pub path: PathBuf,
    #[serde(default)]
    pub default: bool,
    #[serde(default, alias = "binaryRoot", skip_serializing_if = "Option::is_none")]
    pub binary_root: Option<PathBuf>,
    /// node id on the cluster bus; clustering is off when unset
    #[serde(default, alias = "clusterNodeId", skip_serializing_if = "Option::is_none")]
    pub cluster_node: Option<String>,
    /// create the backend when the path holds no repository yet
    #[serde(default = "default_create")]
    pub create: bool,
    #[serde(default, skip_serializing_if = "PoolConfigOverride::is_empty")]
    pub pool: PoolConfigOverride,
}

fn default_create() -> bool {
    true
}

impl RepositoryConfig {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            default: false,
            binary_root: None,
            cluster_node: None,
            create: true,
            pool: PoolConfigOverride::default(),
        }
    }

    pub fn default(mut self, default: bool) -> Self {
        self.default = default;
        self
    }

    pub fn pool(mut self, pool: impl Into<PoolConfigOverride>) -> Self {
        self.pool = pool.into();
        self
    }

    pub fn binary_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.binary_root = Some(root.into());
        self
    }

    pub fn cluster_node(mut self, node: impl Into<String>) -> Self {
        self.cluster_node = Some(node.into());
        self
    }

    pub fn create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    /// where binaries of this repository are stored
    pub fn binary_root_path(&self) -> PathBuf {
        self.binary_root
            .clone()
            .unwrap_or_else(|| self.path.join(DEFAULT_BINARY_DIR))
    }
}

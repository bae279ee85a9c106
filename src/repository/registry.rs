//! The set of repositories a process serves.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{info, warn};

use super::error::{RegistryError, RegistryResult};
use super::instance::Repository;
use crate::config::RegistryConfig;
use crate::invalidation::ClusterBus;
use crate::session::Session;

/// name looked up when no repository is flagged as the default
pub const DEFAULT_REPOSITORY_NAME: &str = "default";

/// Named repositories, in registration order.
///
/// Built explicitly at startup and passed to whoever needs it.
#[derive(Debug, Default)]
pub struct RepositoryRegistry {
    repositories: RwLock<Vec<Arc<Repository>>>,
}

impl RepositoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open every repository of a configuration.
    pub fn from_config(config: &RegistryConfig) -> RegistryResult<Self> {
        Self::from_config_with_bus(config, None)
    }

    /// Like [`from_config`](Self::from_config), wiring clustered
    /// repositories to `bus`.
    pub fn from_config_with_bus(
        config: &RegistryConfig,
        bus: Option<Arc<dyn ClusterBus>>,
    ) -> RegistryResult<Self> {
        config.validate().map_err(|source| RegistryError::Configuration {
            repository: String::new(),
            source,
        })?;

        let registry = Self::new();
        for repo_config in &config.repositories {
            let pool = config
                .effective_pool(repo_config)
                .map_err(|source| RegistryError::Configuration {
                    repository: repo_config.name.clone(),
                    source,
                })?;

            let mut builder = Repository::builder(repo_config.clone()).pool_config(pool);
            if let Some(bus) = &bus {
                builder = builder.cluster_bus(bus.clone());
            }
            registry.add_repository(builder.build()?);
        }
        Ok(registry)
    }

    /// Register a repository, replacing one with the same name in place.
    pub fn add_repository(&self, repository: Repository) -> Arc<Repository> {
        let repository = Arc::new(repository);
        let mut repositories = self.repositories.write();

        match repositories.iter_mut().find(|r| r.name() == repository.name()) {
            Some(slot) => {
                warn!(repository = %repository.name(), "replacing already registered repository");
                *slot = repository.clone();
            }
            None => {
                info!(repository = %repository.name(), "repository registered");
                repositories.push(repository.clone());
            }
        }
        repository
    }

    /// Unregister a repository; removing an unknown name is a no-op.
    pub fn remove_repository(&self, name: &str) -> Option<Arc<Repository>> {
        let mut repositories = self.repositories.write();
        let index = repositories.iter().position(|r| r.name() == name)?;
        info!(repository = %name, "repository removed");
        Some(repositories.remove(index))
    }

    pub fn get_repository(&self, name: &str) -> RegistryResult<Arc<Repository>> {
        self.repositories
            .read()
            .iter()
            .find(|r| r.name() == name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    /// The repository flagged default, else the one named `default`, else
    /// the first registered.
    pub fn get_default_repository(&self) -> RegistryResult<Arc<Repository>> {
        let repositories = self.repositories.read();
        repositories
            .iter()
            .find(|r| r.is_default())
            .or_else(|| repositories.iter().find(|r| r.name() == DEFAULT_REPOSITORY_NAME))
            .or_else(|| repositories.first())
            .cloned()
            .ok_or(RegistryError::NoRepositoryConfigured)
    }

    pub fn repository_names(&self) -> Vec<String> {
        self.repositories
            .read()
            .iter()
            .map(|r| r.name().to_string())
            .collect()
    }

    pub fn repositories(&self) -> Vec<Arc<Repository>> {
        self.repositories.read().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.repositories.read().is_empty()
    }

    /// Open a session on a named repository, or on the default one.
    pub fn open_session(&self, name: Option<&str>, principal: &str) -> RegistryResult<Session> {
        let repository = match name {
            Some(name) => self.get_repository(name)?,
            None => self.get_default_repository()?,
        };
        Ok(repository.open_session(principal)?)
    }

    /// Remove every repository and close their pools.
    pub fn shutdown(&self) {
        let repositories = std::mem::take(&mut *self.repositories.write());
        for repository in repositories {
            repository.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RepositoryConfig;
    use crate::pool::PoolConfigOverride;
    use tempfile::TempDir;

    fn repo(dir: &TempDir, name: &str) -> Repository {
        Repository::builder(RepositoryConfig::new(name, dir.path().join(name)))
            .build()
            .unwrap()
    }

    #[test]
    fn test_default_is_first_registered() {
        let dir = TempDir::new().unwrap();
        let registry = RepositoryRegistry::new();
        registry.add_repository(repo(&dir, "a"));
        registry.add_repository(repo(&dir, "b"));

        assert_eq!(registry.get_default_repository().unwrap().name(), "a");
        assert_eq!(registry.repository_names(), vec!["a", "b"]);
    }

    #[test]
    fn test_default_resolution_order() {
        let dir = TempDir::new().unwrap();
        let registry = RepositoryRegistry::new();
        registry.add_repository(repo(&dir, "a"));
        registry.add_repository(repo(&dir, "default"));
        assert_eq!(registry.get_default_repository().unwrap().name(), "default");

        let flagged = Repository::builder(RepositoryConfig::new("c", dir.path().join("c")).default(true))
            .build()
            .unwrap();
        registry.add_repository(flagged);
        assert_eq!(registry.get_default_repository().unwrap().name(), "c");
    }

    #[test]
    fn test_empty_registry() {
        let registry = RepositoryRegistry::new();
        assert!(matches!(
            registry.get_default_repository(),
            Err(RegistryError::NoRepositoryConfigured)
        ));
        assert!(matches!(registry.get_repository("x"), Err(RegistryError::NotFound(_))));
        assert!(registry.open_session(None, "alice").is_err());
    }

    #[test]
    fn test_replace_keeps_position() {
        let dir = TempDir::new().unwrap();
        let registry = RepositoryRegistry::new();
        registry.add_repository(repo(&dir, "a"));
        registry.add_repository(repo(&dir, "b"));
        let replaced = registry.add_repository(repo(&dir, "a"));

        assert_eq!(registry.repository_names(), vec!["a", "b"]);
        assert!(Arc::ptr_eq(&registry.get_repository("a").unwrap(), &replaced));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let registry = RepositoryRegistry::new();
        registry.add_repository(repo(&dir, "a"));

        assert!(registry.remove_repository("a").is_some());
        assert!(registry.remove_repository("a").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_from_config_merges_pool_layers() {
        let dir = TempDir::new().unwrap();
        let config = RegistryConfig::new()
            .pool(PoolConfigOverride {
                blocking_timeout_millis: Some(250),
                ..Default::default()
            })
            .repository(
                RepositoryConfig::new("main", dir.path().join("main")).pool(PoolConfigOverride {
                    max_pool_size: Some(3),
                    ..Default::default()
                }),
            );

        let registry = RepositoryRegistry::from_config(&config).unwrap();
        let repo = registry.get_repository("main").unwrap();
        assert_eq!(repo.pool().config().max_pool_size, 3);
        assert_eq!(repo.pool().config().blocking_timeout_millis, 250);

        let session = registry.open_session(Some("main"), "alice").unwrap();
        assert!(session.is_live());
    }

    #[test]
    fn test_shutdown_ends_sessions() {
        let dir = TempDir::new().unwrap();
        let registry = RepositoryRegistry::new();
        registry.add_repository(repo(&dir, "a"));
        let session = registry.open_session(Some("a"), "alice").unwrap();

        registry.shutdown();
        assert!(registry.is_empty());
        assert!(!session.is_live());
    }
}

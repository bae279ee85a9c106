//! A configured repository: backend pool, binary store and session plumbing.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing::{info, warn};

use super::error::{RegistryError, RegistryResult};
use super::factory::GitConnectionFactory;
use crate::binary::BinaryStore;
use crate::config::RepositoryConfig;
use crate::invalidation::{ClusterBus, InvalidationPropagator, SessionInfo};
use crate::model::SchemaRegistry;
use crate::pool::{ConnectionPool, PoolConfig, PoolStatus};
use crate::session::{Session, SessionResult};
use crate::storage::GitBackend;

/// One named document repository.
///
/// Shared as `Arc<Repository>`; sessions only keep a weak reference so a
/// repository removed from the registry goes away with its last user.
pub struct Repository {
    name: String,
    default: bool,
    path: PathBuf,
    pool: ConnectionPool<GitConnectionFactory>,
    binaries: BinaryStore,
    propagator: InvalidationPropagator,
    schemas: SchemaRegistry,
    /// serialises flushes of in-process sessions
    write_lock: Mutex<()>,
}

impl Repository {
    pub fn builder(config: RepositoryConfig) -> RepositoryBuilder {
        RepositoryBuilder::new(config)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_default(&self) -> bool {
        self.default
    }

    /// backend location
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pool(&self) -> &ConnectionPool<GitConnectionFactory> {
        &self.pool
    }

    pub fn pool_status(&self) -> PoolStatus {
        self.pool.status()
    }

    pub fn binaries(&self) -> &BinaryStore {
        &self.binaries
    }

    pub fn propagator(&self) -> &InvalidationPropagator {
        &self.propagator
    }

    pub fn schemas(&self) -> &SchemaRegistry {
        &self.schemas
    }

    pub(crate) fn lock_writes(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock()
    }

    /// Open a session for `principal`, holding one pooled connection.
    pub fn open_session(self: &Arc<Self>, principal: &str) -> SessionResult<Session> {
        let connection = self.pool.acquire()?;
        Ok(Session::open(self, connection, principal))
    }

    pub fn active_sessions(&self) -> Vec<SessionInfo> {
        self.propagator.active_sessions()
    }

    /// Close the pool; open sessions keep their connection until closed.
    pub fn shutdown(&self) {
        self.pool.close();
        info!(repository = %self.name, "repository shut down");
    }
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("name", &self.name)
            .field("default", &self.default)
            .field("path", &self.path)
            .field("pool", &self.pool.status())
            .finish()
    }
}

/// Builder for [`Repository`].
pub struct RepositoryBuilder {
    config: RepositoryConfig,
    pool: Option<PoolConfig>,
    schemas: SchemaRegistry,
    bus: Option<Arc<dyn ClusterBus>>,
}

impl RepositoryBuilder {
    pub fn new(config: RepositoryConfig) -> Self {
        Self {
            config,
            pool: None,
            schemas: SchemaRegistry::builtin(),
            bus: None,
        }
    }

    /// effective pool settings; defaults to the built-in ones merged with
    /// the repository's own override
    pub fn pool_config(mut self, pool: PoolConfig) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn schemas(mut self, schemas: SchemaRegistry) -> Self {
        self.schemas = schemas;
        self
    }

    /// bus used when the repository has a cluster node id
    pub fn cluster_bus(mut self, bus: Arc<dyn ClusterBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn build(self) -> RegistryResult<Repository> {
        let name = self.config.name.clone();
        let pool_config = self
            .pool
            .unwrap_or_else(|| PoolConfig::default().merge(&self.config.pool));
        pool_config
            .validate()
            .map_err(|source| RegistryError::Configuration {
                repository: name.clone(),
                source,
            })?;

        let backend = if self.config.create {
            GitBackend::open_or_init(&self.config.path)
        } else {
            GitBackend::open(&self.config.path)
        };
        backend.map_err(|source| RegistryError::Backend {
            repository: name.clone(),
            source,
        })?;

        let binaries = BinaryStore::open(self.config.binary_root_path()).map_err(|source| {
            RegistryError::Binary {
                repository: name.clone(),
                source,
            }
        })?;

        let mut propagator = InvalidationPropagator::new(name.clone());
        match (&self.config.cluster_node, self.bus) {
            (Some(node), Some(bus)) => propagator = propagator.with_cluster(bus, node.clone()),
            (Some(node), None) => {
                warn!(repository = %name, node = %node, "cluster node configured without a bus, clustering disabled");
            }
            _ => {}
        }

        let pool = ConnectionPool::new(
            name.clone(),
            pool_config,
            GitConnectionFactory::new(&self.config.path),
        );
        pool.warm_up().map_err(|source| RegistryError::Pool {
            repository: name.clone(),
            source,
        })?;

        info!(
            repository = %name,
            path = %self.config.path.display(),
            max_pool_size = pool_config.max_pool_size,
            clustered = propagator.cluster_node().is_some(),
            "repository opened"
        );

        Ok(Repository {
            name,
            default: self.config.default,
            path: self.config.path,
            pool,
            binaries,
            propagator,
            schemas: self.schemas,
            write_lock: Mutex::new(()),
        })
    }
}

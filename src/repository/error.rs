//! registry errors

use thiserror::Error;

use crate::binary::BinaryError;
use crate::config::ConfigError;
use crate::pool::PoolError;
use crate::session::SessionError;
use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum RegistryError {
    /// no repository is registered at all
    #[error("no repository configured")]
    NoRepositoryConfigured,

    #[error("repository not found: {0}")]
    NotFound(String),

    #[error("invalid configuration for repository {repository}: {source}")]
    Configuration {
        repository: String,
        #[source]
        source: ConfigError,
    },

    #[error("failed to open backend of repository {repository}: {source}")]
    Backend {
        repository: String,
        #[source]
        source: StorageError,
    },

    #[error("failed to open binary store of repository {repository}: {source}")]
    Binary {
        repository: String,
        #[source]
        source: BinaryError,
    },

    #[error("failed to warm up pool of repository {repository}: {source}")]
    Pool {
        repository: String,
        #[source]
        source: PoolError,
    },

    #[error(transparent)]
    Session(#[from] SessionError),
}

impl RegistryError {
    pub fn is_not_found(&self) -> bool {
        match self {
            RegistryError::NotFound(_) | RegistryError::NoRepositoryConfigured => true,
            RegistryError::Session(e) => e.is_not_found(),
            _ => false,
        }
    }
}

pub type RegistryResult<T> = Result<T, RegistryError>;

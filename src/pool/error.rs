//! connection pool errors

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PoolError {
    /// no connection was released before the blocking timeout elapsed
    #[error("timed out after {waited:?} waiting for a connection to {pool}")]
    Timeout { pool: String, waited: Duration },

    /// all `max` connections are in use and the caller asked not to wait
    #[error("connection pool {pool} exhausted ({max} connections in use)")]
    Exhausted { pool: String, max: usize },

    /// the factory could not open a new connection
    #[error("failed to open connection to {pool}: {source}")]
    Connect {
        pool: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// the pool was shut down
    #[error("connection pool {0} is closed")]
    Closed(String),
}

impl PoolError {
    /// check if waiting and retrying may succeed
    pub fn is_retriable(&self) -> bool {
        matches!(self, PoolError::Timeout { .. } | PoolError::Exhausted { .. })
    }
}

pub type PoolResult<T> = Result<T, PoolError>;

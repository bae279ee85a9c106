//! bounded pooling of backend connections
//!
//! a session holds exactly one [`PooledConnection`] for its whole life and
//! gives it back by dropping it.

mod config;
mod connection;
mod error;

pub use config::{
    PoolConfig, PoolConfigOverride, DEFAULT_BLOCKING_TIMEOUT_MILLIS, DEFAULT_MAX_POOL_SIZE,
    DEFAULT_MIN_POOL_SIZE,
};
pub use connection::{ConnectionFactory, ConnectionPool, PoolStatus, PooledConnection};
pub use error::{PoolError, PoolResult};

//! pool sizing and layered configuration.
//!
//! Configuration comes in layers: built-in defaults, a process-wide
//! `[pool]` section, then each repository's own `[repositories.pool]`.
//! A layer only sets the fields it names; later layers win.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

pub const DEFAULT_MAX_POOL_SIZE: usize = 20;
pub const DEFAULT_MIN_POOL_SIZE: usize = 0;
pub const DEFAULT_BLOCKING_TIMEOUT_MILLIS: u64 = 100;

/// Effective pool configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolConfig {
    /// hard cap on live connections (idle + in use)
    pub max_pool_size: usize,
    /// idle connections kept open even when stale ones are returned
    pub min_pool_size: usize,
    /// how long `acquire` waits for a free connection, 0 = never wait
    pub blocking_timeout_millis: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_pool_size: DEFAULT_MAX_POOL_SIZE,
            min_pool_size: DEFAULT_MIN_POOL_SIZE,
            blocking_timeout_millis: DEFAULT_BLOCKING_TIMEOUT_MILLIS,
        }
    }
}

impl PoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_pool_size(mut self, max: usize) -> Self {
        self.max_pool_size = max;
        self
    }

    pub fn min_pool_size(mut self, min: usize) -> Self {
        self.min_pool_size = min;
        self
    }

    pub fn blocking_timeout_millis(mut self, millis: u64) -> Self {
        self.blocking_timeout_millis = millis;
        self
    }

    pub fn blocking_timeout(&self) -> Duration {
        Duration::from_millis(self.blocking_timeout_millis)
    }

    /// apply an override: its set fields win, ours fill the rest
    pub fn merge(&self, over: &PoolConfigOverride) -> PoolConfig {
        PoolConfig {
            max_pool_size: over.max_pool_size.unwrap_or(self.max_pool_size),
            min_pool_size: over.min_pool_size.unwrap_or(self.min_pool_size),
            blocking_timeout_millis: over
                .blocking_timeout_millis
                .unwrap_or(self.blocking_timeout_millis),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_pool_size == 0 {
            return Err(ConfigError::Invalid("maxPoolSize must be at least 1".to_string()));
        }
        if self.min_pool_size > self.max_pool_size {
            return Err(ConfigError::Invalid(format!(
                "minPoolSize ({}) exceeds maxPoolSize ({})",
                self.min_pool_size, self.max_pool_size
            )));
        }
        Ok(())
    }
}

/// A partial pool configuration, as read from a config file.
///
/// Accepts the camel case option names, their legacy aliases
/// (`maxActive`, `maxIdle`, `maxWait`) and snake case.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfigOverride {
    #[serde(default, alias = "maxPoolSize", alias = "maxActive", alias = "max_active")]
    pub max_pool_size: Option<usize>,
    #[serde(default, alias = "minPoolSize", alias = "maxIdle", alias = "max_idle")]
    pub min_pool_size: Option<usize>,
    #[serde(
        default,
        alias = "blockingTimeoutMillis",
        alias = "maxWait",
        alias = "max_wait"
    )]
    pub blocking_timeout_millis: Option<u64>,
}

impl PoolConfigOverride {
    /// layer `later` on top of this override
    pub fn merge(&self, later: &PoolConfigOverride) -> PoolConfigOverride {
        PoolConfigOverride {
            max_pool_size: later.max_pool_size.or(self.max_pool_size),
            min_pool_size: later.min_pool_size.or(self.min_pool_size),
            blocking_timeout_millis: later.blocking_timeout_millis.or(self.blocking_timeout_millis),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == PoolConfigOverride::default()
    }
}

impl From<PoolConfig> for PoolConfigOverride {
    fn from(config: PoolConfig) -> Self {
        Self {
            max_pool_size: Some(config.max_pool_size),
            min_pool_size: Some(config.min_pool_size),
            blocking_timeout_millis: Some(config.blocking_timeout_millis),
        }
    }
}

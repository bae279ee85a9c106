//! Bounded connection pooling for backend access.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::pool::config::PoolConfig;
use crate::pool::error::{PoolError, PoolResult};

/// Opens and checks the connections a pool hands out.
pub trait ConnectionFactory: Send + Sync + 'static {
    type Connection: Send;

    /// open a new low-level connection
    fn connect(&self) -> Result<Self::Connection, Box<dyn std::error::Error + Send + Sync>>;

    /// whether a connection should be closed rather than reused
    fn is_stale(&self, _conn: &Self::Connection) -> bool {
        false
    }
}

/// Snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// open connections, idle or in use
    pub live: usize,
    pub idle: usize,
    /// callers blocked in `acquire`
    pub waiting: usize,
    pub max: usize,
}

impl PoolStatus {
    pub fn in_use(&self) -> usize {
        self.live - self.idle
    }
}

struct PoolState<C> {
    idle: Vec<C>,
    live: usize,
    waiting: usize,
    closed: bool,
}

struct PoolInner<F: ConnectionFactory> {
    name: String,
    config: PoolConfig,
    factory: F,
    state: Mutex<PoolState<F::Connection>>,
    available: Condvar,
}

impl<F: ConnectionFactory> PoolInner<F> {
    fn release(&self, conn: F::Connection) {
        let stale = self.factory.is_stale(&conn);
        let mut state = self.state.lock();

        if state.closed {
            state.live -= 1;
        } else if stale && state.idle.len() >= self.config.min_pool_size {
            state.live -= 1;
            debug!(pool = %self.name, "closing stale connection");
        } else {
            state.idle.push(conn);
        }

        drop(state);
        self.available.notify_one();
    }

    fn connect(&self) -> PoolResult<F::Connection> {
        self.factory.connect().map_err(|source| PoolError::Connect {
            pool: self.name.clone(),
            source,
        })
    }

    /// give back a slot reserved for a connection that never opened
    fn cancel_reservation(&self) {
        self.state.lock().live -= 1;
        self.available.notify_one();
    }
}

/// A bounded pool of backend connections.
///
/// Clone this to share across threads - it uses Arc internally.
pub struct ConnectionPool<F: ConnectionFactory> {
    inner: Arc<PoolInner<F>>,
}

impl<F: ConnectionFactory> Clone for ConnectionPool<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: ConnectionFactory> ConnectionPool<F> {
    /// Create a pool; connections are opened lazily.
    pub fn new(name: impl Into<String>, config: PoolConfig, factory: F) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                name: name.into(),
                config,
                factory,
                state: Mutex::new(PoolState {
                    idle: Vec::new(),
                    live: 0,
                    waiting: 0,
                    closed: false,
                }),
                available: Condvar::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn factory(&self) -> &F {
        &self.inner.factory
    }

    /// Get a connection, waiting up to the configured blocking timeout.
    pub fn acquire(&self) -> PoolResult<PooledConnection<F>> {
        self.acquire_timeout(self.inner.config.blocking_timeout())
    }

    /// Get a connection without waiting.
    pub fn try_acquire(&self) -> PoolResult<PooledConnection<F>> {
        self.acquire_timeout(Duration::ZERO)
    }

    /// Get a connection, waiting at most `timeout` for one to be released.
    pub fn acquire_timeout(&self, timeout: Duration) -> PoolResult<PooledConnection<F>> {
        let started = Instant::now();
        let deadline = started + timeout;
        let max = self.inner.config.max_pool_size;
        let mut state = self.inner.state.lock();

        loop {
            if state.closed {
                return Err(PoolError::Closed(self.inner.name.clone()));
            }

            if let Some(conn) = state.idle.pop() {
                // the popped connection keeps its slot while it is checked
                drop(state);
                if !self.inner.factory.is_stale(&conn) {
                    return Ok(self.wrap(conn));
                }
                debug!(pool = %self.inner.name, "dropping stale idle connection");
                drop(conn);
                state = self.inner.state.lock();
                state.live -= 1;
                continue;
            }

            if state.live < max {
                state.live += 1;
                drop(state);
                return match self.inner.connect() {
                    Ok(conn) => Ok(self.wrap(conn)),
                    Err(e) => {
                        self.inner.cancel_reservation();
                        warn!(pool = %self.inner.name, error = %e, "failed to open connection");
                        Err(e)
                    }
                };
            }

            if timeout.is_zero() {
                return Err(PoolError::Exhausted {
                    pool: self.inner.name.clone(),
                    max,
                });
            }

            state.waiting += 1;
            let result = self.inner.available.wait_until(&mut state, deadline);
            state.waiting -= 1;

            if result.timed_out() && state.idle.is_empty() && state.live >= max {
                return Err(PoolError::Timeout {
                    pool: self.inner.name.clone(),
                    waited: started.elapsed(),
                });
            }
        }
    }

    fn wrap(&self, conn: F::Connection) -> PooledConnection<F> {
        PooledConnection {
            conn: Some(conn),
            pool: Arc::clone(&self.inner),
        }
    }

    /// Open connections until `min_pool_size` are idle.
    pub fn warm_up(&self) -> PoolResult<usize> {
        let mut opened = 0;
        loop {
            {
                let mut state = self.inner.state.lock();
                if state.closed
                    || state.idle.len() >= self.inner.config.min_pool_size
                    || state.live >= self.inner.config.max_pool_size
                {
                    break;
                }
                state.live += 1;
            }

            match self.inner.connect() {
                Ok(conn) => {
                    self.inner.state.lock().idle.push(conn);
                    self.inner.available.notify_one();
                    opened += 1;
                }
                Err(e) => {
                    self.inner.cancel_reservation();
                    return Err(e);
                }
            }
        }

        if opened > 0 {
            debug!(pool = %self.inner.name, opened, "pool warmed up");
        }
        Ok(opened)
    }

    pub fn status(&self) -> PoolStatus {
        let state = self.inner.state.lock();
        PoolStatus {
            live: state.live,
            idle: state.idle.len(),
            waiting: state.waiting,
            max: self.inner.config.max_pool_size,
        }
    }

    /// Close idle connections and refuse new acquisitions.
    ///
    /// Connections still in use are closed when they are released.
    pub fn close(&self) {
        let idle = {
            let mut state = self.inner.state.lock();
            state.closed = true;
            let idle = std::mem::take(&mut state.idle);
            state.live -= idle.len();
            idle
        };
        drop(idle);
        self.inner.available.notify_all();
        debug!(pool = %self.inner.name, "pool closed");
    }
}

/// A connection borrowed from the pool, returned when dropped.
pub struct PooledConnection<F: ConnectionFactory> {
    conn: Option<F::Connection>,
    pool: Arc<PoolInner<F>>,
}

impl<F: ConnectionFactory> Deref for PooledConnection<F> {
    type Target = F::Connection;

    fn deref(&self) -> &Self::Target {
        // only `None` while dropping
        match self.conn.as_ref() {
            Some(conn) => conn,
            None => unreachable!("pooled connection used after release"),
        }
    }
}

impl<F: ConnectionFactory> DerefMut for PooledConnection<F> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match self.conn.as_mut() {
            Some(conn) => conn,
            None => unreachable!("pooled connection used after release"),
        }
    }
}

impl<F: ConnectionFactory> Drop for PooledConnection<F> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}

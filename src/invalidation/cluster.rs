//! cluster bus: invalidations between processes sharing a backend
//!
//! delivery is fire-and-forget. A node that has not joined, or that
//! never drains, simply misses messages.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use super::message::InvalidationMessage;

#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    #[error("cluster bus unavailable: {0}")]
    Unavailable(String),
}

/// Transport for invalidations between repository instances.
pub trait ClusterBus: Send + Sync {
    /// Announce a node so it starts receiving messages for `repository`.
    fn join(&self, repository: &str, node: &str) -> Result<(), ClusterError>;

    /// Send to every other node of the message's repository.
    fn publish(&self, from_node: &str, message: &InvalidationMessage) -> Result<(), ClusterError>;

    /// Take everything queued for a node.
    fn drain(&self, repository: &str, node: &str) -> Result<Vec<InvalidationMessage>, ClusterError>;
}

/// In-process bus, for tests and single-host deployments.
#[derive(Debug, Default)]
pub struct InMemoryClusterBus {
    queues: Mutex<HashMap<(String, String), VecDeque<InvalidationMessage>>>,
}

impl InMemoryClusterBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// messages waiting for a node
    pub fn pending(&self, repository: &str, node: &str) -> usize {
        self.queues
            .lock()
            .get(&(repository.to_string(), node.to_string()))
            .map_or(0, VecDeque::len)
    }
}

impl ClusterBus for InMemoryClusterBus {
    fn join(&self, repository: &str, node: &str) -> Result<(), ClusterError> {
        self.queues
            .lock()
            .entry((repository.to_string(), node.to_string()))
            .or_default();
        Ok(())
    }

    fn publish(&self, from_node: &str, message: &InvalidationMessage) -> Result<(), ClusterError> {
        let mut queues = self.queues.lock();
        for ((repository, node), queue) in queues.iter_mut() {
            if repository == &message.repository && node != from_node {
                queue.push_back(message.clone());
            }
        }
        Ok(())
    }

    fn drain(&self, repository: &str, node: &str) -> Result<Vec<InvalidationMessage>, ClusterError> {
        let mut queues = self.queues.lock();
        Ok(queues
            .get_mut(&(repository.to_string(), node.to_string()))
            .map(|queue| queue.drain(..).collect())
            .unwrap_or_default())
    }
}

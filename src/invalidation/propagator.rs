//! fan-out of invalidations to the live sessions of one repository

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, warn};

use super::cluster::ClusterBus;
use super::message::{InvalidationMessage, Invalidations};

/// what the propagator knows about a registered session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: String,
    pub principal: String,
    pub opened_at: DateTime<Utc>,
}

impl SessionInfo {
    pub fn new(id: impl Into<String>, principal: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            principal: principal.into(),
            opened_at: Utc::now(),
        }
    }
}

struct Inbox {
    sender: Sender<InvalidationMessage>,
    info: SessionInfo,
}

struct ClusterLink {
    bus: Arc<dyn ClusterBus>,
    node: String,
}

/// Delivers invalidations from a saving session to its peers.
///
/// Every session registers an inbox on open. Delivery never fails the
/// sender: inboxes whose receiver is gone are dropped with a warning.
pub struct InvalidationPropagator {
    repository: String,
    inboxes: RwLock<HashMap<String, Inbox>>,
    cluster: Option<ClusterLink>,
}

impl InvalidationPropagator {
    pub fn new(repository: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            inboxes: RwLock::new(HashMap::new()),
            cluster: None,
        }
    }

    /// also exchange invalidations with other nodes over `bus`
    pub fn with_cluster(mut self, bus: Arc<dyn ClusterBus>, node: impl Into<String>) -> Self {
        let node = node.into();
        if let Err(e) = bus.join(&self.repository, &node) {
            warn!(repository = %self.repository, node = %node, error = %e, "failed to join cluster bus");
        }
        self.cluster = Some(ClusterLink { bus, node });
        self
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn cluster_node(&self) -> Option<&str> {
        self.cluster.as_ref().map(|c| c.node.as_str())
    }

    /// Register a session and return its inbox.
    pub fn register(&self, info: SessionInfo) -> Receiver<InvalidationMessage> {
        let (sender, receiver) = mpsc::channel();
        debug!(repository = %self.repository, session = %info.id, "session registered");
        self.inboxes.write().insert(info.id.clone(), Inbox { sender, info });
        receiver
    }

    pub fn unregister(&self, session_id: &str) {
        if self.inboxes.write().remove(session_id).is_some() {
            debug!(repository = %self.repository, session = %session_id, "session unregistered");
        }
    }

    /// Send invalidations from `origin` to every other session, then to the cluster.
    pub fn propagate(&self, origin: &str, invalidations: &Invalidations) {
        let messages = invalidations.messages(&self.repository);
        if messages.is_empty() {
            return;
        }

        self.deliver(Some(origin), &messages);

        if let Some(cluster) = &self.cluster {
            for message in &messages {
                if let Err(e) = cluster.bus.publish(&cluster.node, message) {
                    warn!(
                        repository = %self.repository,
                        node = %cluster.node,
                        error = %e,
                        "failed to publish invalidation to cluster"
                    );
                }
            }
        }
    }

    /// Pull pending cluster messages into every local inbox.
    pub fn receive_cluster(&self) {
        let Some(cluster) = &self.cluster else {
            return;
        };

        match cluster.bus.drain(&self.repository, &cluster.node) {
            Ok(messages) if !messages.is_empty() => {
                debug!(repository = %self.repository, count = messages.len(), "received cluster invalidations");
                self.deliver(None, &messages);
            }
            Ok(_) => {}
            Err(e) => {
                warn!(repository = %self.repository, node = %cluster.node, error = %e, "failed to drain cluster bus");
            }
        }
    }

    fn deliver(&self, origin: Option<&str>, messages: &[InvalidationMessage]) {
        let mut dead = Vec::new();
        {
            let inboxes = self.inboxes.read();
            for (id, inbox) in inboxes.iter() {
                if Some(id.as_str()) == origin {
                    continue;
                }
                let delivered = messages
                    .iter()
                    .all(|message| inbox.sender.send(message.clone()).is_ok());
                if !delivered {
                    dead.push(id.clone());
                }
            }
        }

        if !dead.is_empty() {
            let mut inboxes = self.inboxes.write();
            for id in dead {
                warn!(repository = %self.repository, session = %id, "dropping unreachable session inbox");
                inboxes.remove(&id);
            }
        }
    }

    /// sessions currently registered, oldest first
    pub fn active_sessions(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> = self
            .inboxes
            .read()
            .values()
            .map(|inbox| inbox.info.clone())
            .collect();
        sessions.sort_by(|a, b| a.opened_at.cmp(&b.opened_at).then_with(|| a.id.cmp(&b.id)));
        sessions
    }

    pub fn active_count(&self) -> usize {
        self.inboxes.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invalidation::{InMemoryClusterBus, InvalidationKind};
    use crate::storage::NodeId;
    use std::thread;

    fn modified(id: &NodeId) -> Invalidations {
        let mut inv = Invalidations::new();
        inv.modified.insert(id.clone());
        inv
    }

    #[test]
    fn test_origin_is_skipped() {
        let propagator = InvalidationPropagator::new("docs");
        let a = propagator.register(SessionInfo::new("a", "alice"));
        let b = propagator.register(SessionInfo::new("b", "bob"));
        let id = NodeId::generate();

        propagator.propagate("a", &modified(&id));

        assert!(a.try_recv().is_err());
        let message = b.try_recv().unwrap();
        assert_eq!(message.kind, InvalidationKind::Modified);
        assert_eq!(message.ids, vec![id]);
    }

    #[test]
    fn test_dead_inbox_is_pruned() {
        let propagator = InvalidationPropagator::new("docs");
        let _a = propagator.register(SessionInfo::new("a", "alice"));
        drop(propagator.register(SessionInfo::new("b", "bob")));
        assert_eq!(propagator.active_count(), 2);

        propagator.propagate("a", &modified(&NodeId::root()));
        assert_eq!(propagator.active_count(), 1);
        assert_eq!(propagator.active_sessions()[0].id, "a");
    }

    #[test]
    fn test_unregister() {
        let propagator = InvalidationPropagator::new("docs");
        let _a = propagator.register(SessionInfo::new("a", "alice"));
        propagator.unregister("a");
        propagator.unregister("a");
        assert_eq!(propagator.active_count(), 0);
    }

    #[test]
    fn test_cluster_roundtrip() {
        let bus: Arc<dyn ClusterBus> = Arc::new(InMemoryClusterBus::new());
        let first = InvalidationPropagator::new("docs").with_cluster(bus.clone(), "n1");
        let second = InvalidationPropagator::new("docs").with_cluster(bus, "n2");

        let inbox = second.register(SessionInfo::new("s", "bob"));
        first.propagate("x", &modified(&NodeId::root()));
        assert!(inbox.try_recv().is_err());

        second.receive_cluster();
        assert_eq!(inbox.try_recv().unwrap().ids, vec![NodeId::root()]);
    }

    #[test]
    fn test_concurrent_propagation() {
        let propagator = Arc::new(InvalidationPropagator::new("docs"));
        let inbox = propagator.register(SessionInfo::new("reader", "alice"));

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let propagator = propagator.clone();
                thread::spawn(move || {
                    propagator.propagate(&format!("writer-{}", i), &modified(&NodeId::generate()));
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(inbox.try_iter().count(), 4);
    }
}

//! invalidation messages

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::storage::{BatchOutcome, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvalidationKind {
    /// the node record changed
    Modified,
    /// the node no longer exists
    Deleted,
    /// the node's children list changed
    ChildrenChanged,
}

impl fmt::Display for InvalidationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidationKind::Modified => write!(f, "modified"),
            InvalidationKind::Deleted => write!(f, "deleted"),
            InvalidationKind::ChildrenChanged => write!(f, "children-changed"),
        }
    }
}

/// one kind of change to a set of nodes of one repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationMessage {
    pub repository: String,
    pub ids: Vec<NodeId>,
    pub kind: InvalidationKind,
}

/// id sets produced by one flush
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invalidations {
    pub modified: BTreeSet<NodeId>,
    pub deleted: BTreeSet<NodeId>,
    pub children_changed: BTreeSet<NodeId>,
}

impl Invalidations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.modified.is_empty() && self.deleted.is_empty() && self.children_changed.is_empty()
    }

    /// one message per non-empty kind
    pub fn messages(&self, repository: &str) -> Vec<InvalidationMessage> {
        [
            (InvalidationKind::Modified, &self.modified),
            (InvalidationKind::Deleted, &self.deleted),
            (InvalidationKind::ChildrenChanged, &self.children_changed),
        ]
        .into_iter()
        .filter(|(_, ids)| !ids.is_empty())
        .map(|(kind, ids)| InvalidationMessage {
            repository: repository.to_string(),
            ids: ids.iter().cloned().collect(),
            kind,
        })
        .collect()
    }
}

impl From<&BatchOutcome> for Invalidations {
    // created ids go out as modified: a peer may hold a cached absence
    fn from(outcome: &BatchOutcome) -> Self {
        Self {
            modified: outcome.modified.union(&outcome.created).cloned().collect(),
            deleted: outcome.deleted.clone(),
            children_changed: outcome.children_changed.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::CommitId;

    #[test]
    fn test_one_message_per_kind() {
        let mut inv = Invalidations::new();
        assert!(inv.messages("r").is_empty());

        inv.modified.insert(NodeId::generate());
        inv.modified.insert(NodeId::generate());
        inv.children_changed.insert(NodeId::root());

        let messages = inv.messages("r");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].kind, InvalidationKind::Modified);
        assert_eq!(messages[0].ids.len(), 2);
        assert_eq!(messages[1].kind, InvalidationKind::ChildrenChanged);
        assert!(messages.iter().all(|m| m.repository == "r"));
    }

    #[test]
    fn test_created_ids_are_sent_as_modified() {
        let created = NodeId::generate();
        let updated = NodeId::generate();
        let outcome = BatchOutcome {
            commit: CommitId::from_hex("0123456789abcdef0123456789abcdef01234567").unwrap(),
            created: [created.clone()].into(),
            modified: [updated.clone()].into(),
            deleted: Default::default(),
            children_changed: [NodeId::root()].into(),
        };

        let inv = Invalidations::from(&outcome);
        assert!(inv.modified.contains(&created));
        assert!(inv.modified.contains(&updated));
        assert!(inv.deleted.is_empty());
        assert_eq!(inv.children_changed.len(), 1);
    }
}

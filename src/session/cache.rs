//! per-session cache of node records and children indexes
//!
//! entries are never refetched eagerly: an invalidation only marks them
//! stale, and the next read goes back to the backend.

use std::collections::{HashMap, HashSet};

use crate::invalidation::{InvalidationKind, InvalidationMessage};
use crate::storage::{ChildIndex, NodeId, NodeRecord};

#[derive(Debug, Default)]
pub(crate) struct LocalCache {
    /// `None` caches a known absence
    records: HashMap<NodeId, Option<NodeRecord>>,
    children: HashMap<NodeId, ChildIndex>,
    stale_records: HashSet<NodeId>,
    stale_children: HashSet<NodeId>,
}

impl LocalCache {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// fresh cached record; `Some(None)` when the node is known absent
    pub(crate) fn record(&self, id: &NodeId) -> Option<Option<&NodeRecord>> {
        if self.stale_records.contains(id) {
            return None;
        }
        self.records.get(id).map(Option::as_ref)
    }

    pub(crate) fn put_record(&mut self, id: NodeId, record: Option<NodeRecord>) {
        self.stale_records.remove(&id);
        self.records.insert(id, record);
    }

    pub(crate) fn children(&self, id: &NodeId) -> Option<&ChildIndex> {
        if self.stale_children.contains(id) {
            return None;
        }
        self.children.get(id)
    }

    pub(crate) fn put_children(&mut self, id: NodeId, children: ChildIndex) {
        self.stale_children.remove(&id);
        self.children.insert(id, children);
    }

    pub(crate) fn mark_record_stale(&mut self, id: &NodeId) {
        if self.records.contains_key(id) {
            self.stale_records.insert(id.clone());
        }
    }

    pub(crate) fn mark_children_stale(&mut self, id: &NodeId) {
        if self.children.contains_key(id) {
            self.stale_children.insert(id.clone());
        }
    }

    pub(crate) fn invalidate(&mut self, id: &NodeId) {
        self.mark_record_stale(id);
        self.mark_children_stale(id);
    }

    pub(crate) fn apply(&mut self, message: &InvalidationMessage) {
        for id in &message.ids {
            match message.kind {
                InvalidationKind::Modified => self.mark_record_stale(id),
                InvalidationKind::Deleted => self.invalidate(id),
                InvalidationKind::ChildrenChanged => self.mark_children_stale(id),
            }
        }
    }

    pub(crate) fn is_stale(&self, id: &NodeId) -> bool {
        self.stale_records.contains(id) || self.stale_children.contains(id)
    }

    /// cached records, fresh or not
    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }

    pub(crate) fn clear(&mut self) {
        self.records.clear();
        self.children.clear();
        self.stale_records.clear();
        self.stale_children.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::NodeName;

    fn message(kind: InvalidationKind, id: &NodeId) -> InvalidationMessage {
        InvalidationMessage {
            repository: "docs".to_string(),
            ids: vec![id.clone()],
            kind,
        }
    }

    #[test]
    fn test_modified_only_marks_record() {
        let mut cache = LocalCache::new();
        let id = NodeId::generate();
        cache.put_record(id.clone(), Some(NodeRecord::new(id.clone(), None, NodeName::new("a").unwrap(), "File")));
        cache.put_children(id.clone(), ChildIndex::new());

        cache.apply(&message(InvalidationKind::Modified, &id));
        assert!(cache.record(&id).is_none());
        assert!(cache.children(&id).is_some());

        cache.put_record(id.clone(), None);
        assert_eq!(cache.record(&id), Some(None));
    }

    #[test]
    fn test_deleted_marks_both() {
        let mut cache = LocalCache::new();
        let id = NodeId::generate();
        cache.put_record(id.clone(), None);
        cache.put_children(id.clone(), ChildIndex::new());

        cache.apply(&message(InvalidationKind::Deleted, &id));
        assert!(cache.record(&id).is_none());
        assert!(cache.children(&id).is_none());
        assert!(cache.is_stale(&id));
    }

    #[test]
    fn test_unknown_ids_are_ignored() {
        let mut cache = LocalCache::new();
        let id = NodeId::generate();
        cache.apply(&message(InvalidationKind::ChildrenChanged, &id));
        assert!(!cache.is_stale(&id));
        assert_eq!(cache.len(), 0);
    }
}

//! changes a session has made but not saved yet.
//!
//! the pending set is an overlay: reads through the session see it on top
//! of the cached backend state, and `save` turns it into one write batch.

use std::collections::{BTreeSet, HashMap};

use crate::storage::{ChildIndex, NodeId, NodeRecord, WriteBatch};

#[derive(Debug, Default)]
pub(crate) struct PendingChanges {
    /// new nodes in creation order, parents first
    creates: Vec<NodeId>,
    /// current local state of created and updated nodes
    records: HashMap<NodeId, NodeRecord>,
    /// updated nodes with the version they were read at
    updates: Vec<(NodeId, u64)>,
    deletes: Vec<(NodeId, u64)>,
}

impl PendingChanges {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.creates.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }

    pub(crate) fn is_created(&self, id: &NodeId) -> bool {
        self.creates.contains(id)
    }

    pub(crate) fn is_deleted(&self, id: &NodeId) -> bool {
        self.deletes.iter().any(|(d, _)| d == id)
    }

    pub(crate) fn record(&self, id: &NodeId) -> Option<&NodeRecord> {
        self.records.get(id)
    }

    pub(crate) fn create(&mut self, record: NodeRecord) {
        self.creates.push(record.id.clone());
        self.records.insert(record.id.clone(), record);
    }

    /// stage a new state for a node read at `read_version`
    ///
    /// repeated updates keep the version of the first read
    pub(crate) fn update(&mut self, record: NodeRecord, read_version: u64) {
        let id = record.id.clone();
        let tracked = self.is_created(&id) || self.updates.iter().any(|(u, _)| u == &id);
        if !tracked {
            self.updates.push((id.clone(), read_version));
        }
        self.records.insert(id, record);
    }

    /// stage removal of a node read at `read_version`
    pub(crate) fn delete(&mut self, id: &NodeId, read_version: u64) {
        self.records.remove(id);

        if let Some(pos) = self.creates.iter().position(|c| c == id) {
            // never reached the backend
            self.creates.remove(pos);
            return;
        }

        let expected = match self.updates.iter().position(|(u, _)| u == id) {
            Some(pos) => self.updates.remove(pos).1,
            None => read_version,
        };
        if !self.is_deleted(id) {
            self.deletes.push((id.clone(), expected));
        }
    }

    /// the children of `parent` as this session sees them
    pub(crate) fn overlay_children(&self, parent: &NodeId, mut base: ChildIndex) -> ChildIndex {
        base.retain(|name, id| {
            if self.is_deleted(id) {
                return false;
            }
            match self.records.get(id) {
                Some(record) => record.parent_id.as_ref() == Some(parent) && record.name.as_str() == name,
                None => true,
            }
        });

        for record in self.records.values() {
            if record.parent_id.as_ref() == Some(parent) {
                base.insert(record.name.as_str().to_string(), record.id.clone());
            }
        }
        base
    }

    /// versions checked in during this session, in order
    pub(crate) fn versions_of(&self, source: &NodeId) -> Vec<NodeId> {
        self.creates
            .iter()
            .filter(|id| {
                self.records
                    .get(*id)
                    .map_or(false, |r| r.is_version && r.source_id.as_ref() == Some(source))
            })
            .cloned()
            .collect()
    }

    /// every node a flush of this set would touch, parents included
    pub(crate) fn touched(&self) -> BTreeSet<NodeId> {
        let mut touched: BTreeSet<NodeId> = self
            .creates
            .iter()
            .chain(self.updates.iter().map(|(id, _)| id))
            .chain(self.deletes.iter().map(|(id, _)| id))
            .cloned()
            .collect();
        touched.extend(self.records.values().filter_map(|r| r.parent_id.clone()));
        touched
    }

    pub(crate) fn to_batch(&self) -> WriteBatch {
        let mut batch = WriteBatch::new();
        for id in &self.creates {
            if let Some(record) = self.records.get(id) {
                batch.create(record.clone());
            }
        }
        for (id, expected) in &self.updates {
            if let Some(record) = self.records.get(id) {
                batch.update(record.clone(), *expected);
            }
        }
        for (id, expected) in &self.deletes {
            batch.delete(id.clone(), *expected);
        }
        batch
    }

    pub(crate) fn clear(&mut self) {
        self.creates.clear();
        self.records.clear();
        self.updates.clear();
        self.deletes.clear();
    }
}

//! write batches: the unit a session flushes in one commit.
//!
//! a batch is staged against a snapshot of `main`. Creates are applied
//! first, then updates, then deletes. Every rule that can be broken by a
//! concurrent writer is re-checked here against the snapshot:
//! - updates and deletes name the version they were based on
//! - sibling names stay unique
//! - a move never lands inside its own subtree
//! - a deleted node keeps no surviving children
//!
//! any violation fails the whole batch with `StorageError::Conflict`.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use git2::Repository;

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::record::{self, ChildIndex, NodeRecord};
use crate::storage::tree::{self, TreeHandle, TreeMutator};
use crate::storage::types::{CommitId, NodeId};

/// an ordered set of node writes
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    pub(crate) creates: Vec<NodeRecord>,
    pub(crate) updates: Vec<(NodeRecord, u64)>,
    pub(crate) deletes: Vec<(NodeId, u64)>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// create a node; parents must be created before their children
    pub fn create(&mut self, record: NodeRecord) -> &mut Self {
        self.creates.push(record);
        self
    }

    /// replace a node that was read at `expected_version`
    pub fn update(&mut self, record: NodeRecord, expected_version: u64) -> &mut Self {
        self.updates.push((record, expected_version));
        self
    }

    /// delete a node that was read at `expected_version`
    pub fn delete(&mut self, id: NodeId, expected_version: u64) -> &mut Self {
        self.deletes.push((id, expected_version));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.creates.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.creates.len() + self.updates.len() + self.deletes.len()
    }

    /// (created, updated, deleted) counts
    pub fn counts(&self) -> (usize, usize, usize) {
        (self.creates.len(), self.updates.len(), self.deletes.len())
    }
}

/// what a successfully committed batch changed
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub commit: CommitId,
    pub created: BTreeSet<NodeId>,
    pub modified: BTreeSet<NodeId>,
    pub deleted: BTreeSet<NodeId>,
    /// nodes whose children list changed
    pub children_changed: BTreeSet<NodeId>,
}

/// a validated batch, ready to be written into a tree
pub(crate) struct StagedBatch {
    records: BTreeMap<NodeId, Option<NodeRecord>>,
    children: BTreeMap<NodeId, ChildIndex>,
    versions: BTreeMap<NodeId, Vec<NodeId>>,
    created: BTreeSet<NodeId>,
    modified: BTreeSet<NodeId>,
    deleted: BTreeSet<NodeId>,
}

impl StagedBatch {
    /// turn the staged state into blob edits
    pub(crate) fn write_into(&self, repo: &Repository, mutator: &mut TreeMutator<'_>) -> StorageResult<()> {
        for (id, children) in &self.children {
            if children.is_empty() {
                mutator.remove(tree::children_path(id));
            } else {
                let blob = record::write_blob(repo, &record::serialize_children(children)?)?;
                mutator.upsert(tree::children_path(id), blob);
            }
        }

        for (source, versions) in &self.versions {
            let blob = record::write_blob(repo, &record::serialize_versions(versions)?)?;
            mutator.upsert(tree::versions_path(source), blob);
        }

        // records last: a deleted node must not keep a children index
        for (id, node) in &self.records {
            match node {
                Some(node) => {
                    let blob = record::write_blob(repo, &record::serialize_record(node)?)?;
                    mutator.upsert(tree::node_path(id), blob);
                }
                None => {
                    mutator.remove(tree::node_path(id));
                    mutator.remove(tree::children_path(id));
                }
            }
        }

        Ok(())
    }

    pub(crate) fn into_outcome(self, commit: CommitId) -> BatchOutcome {
        let children_changed = self
            .children
            .into_keys()
            .filter(|id| !self.deleted.contains(id))
            .collect();

        BatchOutcome {
            commit,
            created: self.created,
            modified: self.modified,
            deleted: self.deleted,
            children_changed,
        }
    }
}

/// stage `batch` on top of `tree`
pub(crate) fn stage(repo: &Repository, tree: &TreeHandle<'_>, batch: &WriteBatch) -> StorageResult<StagedBatch> {
    let mut view = StagingView::new(repo, tree);

    for node in &batch.creates {
        view.apply_create(node.clone())?;
    }
    for (node, expected) in &batch.updates {
        view.apply_update(node.clone(), *expected)?;
    }
    for (id, expected) in &batch.deletes {
        view.apply_delete(id, *expected)?;
    }
    view.check_orphans()?;

    view.finish()
}

/// the snapshot plus the batch applied so far
struct StagingView<'a, 'repo> {
    repo: &'repo Repository,
    tree: &'a TreeHandle<'repo>,
    loaded: HashMap<NodeId, Option<NodeRecord>>,
    records: BTreeMap<NodeId, Option<NodeRecord>>,
    children: HashMap<NodeId, ChildIndex>,
    children_changed: BTreeSet<NodeId>,
    versions: BTreeMap<NodeId, Vec<NodeId>>,
    created: BTreeSet<NodeId>,
    modified: BTreeSet<NodeId>,
    deleted: BTreeSet<NodeId>,
    conflicts: BTreeSet<NodeId>,
}

impl<'a, 'repo> StagingView<'a, 'repo> {
    fn new(repo: &'repo Repository, tree: &'a TreeHandle<'repo>) -> Self {
        Self {
            repo,
            tree,
            loaded: HashMap::new(),
            records: BTreeMap::new(),
            children: HashMap::new(),
            children_changed: BTreeSet::new(),
            versions: BTreeMap::new(),
            created: BTreeSet::new(),
            modified: BTreeSet::new(),
            deleted: BTreeSet::new(),
            conflicts: BTreeSet::new(),
        }
    }

    fn record(&mut self, id: &NodeId) -> StorageResult<Option<NodeRecord>> {
        if let Some(staged) = self.records.get(id) {
            return Ok(staged.clone());
        }
        if let Some(loaded) = self.loaded.get(id) {
            return Ok(loaded.clone());
        }
        let loaded = self.tree.read_node(self.repo, id)?;
        self.loaded.insert(id.clone(), loaded.clone());
        Ok(loaded)
    }

    fn children_mut(&mut self, id: &NodeId) -> StorageResult<&mut ChildIndex> {
        if !self.children.contains_key(id) {
            let index = self.tree.read_children(self.repo, id)?;
            self.children.insert(id.clone(), index);
        }
        self.children
            .get_mut(id)
            .ok_or_else(|| StorageError::Internal(format!("children of {} not loaded", id)))
    }

    fn versions_mut(&mut self, id: &NodeId) -> StorageResult<&mut Vec<NodeId>> {
        if !self.versions.contains_key(id) {
            let list = self.tree.read_versions(self.repo, id)?;
            self.versions.insert(id.clone(), list);
        }
        self.versions
            .get_mut(id)
            .ok_or_else(|| StorageError::Internal(format!("versions of {} not loaded", id)))
    }

    fn conflict(&mut self, id: &NodeId) {
        self.conflicts.insert(id.clone());
    }

    /// true when `ancestor` is `start` or one of its ancestors
    fn is_ancestor_or_self(&mut self, ancestor: &NodeId, start: &NodeId) -> StorageResult<bool> {
        let mut visited = HashSet::new();
        let mut current = Some(start.clone());

        while let Some(id) = current {
            if &id == ancestor {
                return Ok(true);
            }
            if !visited.insert(id.clone()) {
                break;
            }
            current = self.record(&id)?.and_then(|r| r.parent_id);
        }

        Ok(false)
    }

    fn apply_create(&mut self, node: NodeRecord) -> StorageResult<()> {
        let id = node.id.clone();
        if self.record(&id)?.is_some() {
            self.conflict(&id);
            return Ok(());
        }

        if let Some(parent) = node.parent_id.clone() {
            if self.record(&parent)?.is_none() {
                self.conflict(&id);
                return Ok(());
            }
            let name = node.name.as_str().to_string();
            let children = self.children_mut(&parent)?;
            if children.contains_key(&name) {
                self.conflict(&id);
                return Ok(());
            }
            children.insert(name, id.clone());
            self.children_changed.insert(parent);
        } else if node.is_version {
            if let Some(source) = node.source_id.clone() {
                self.versions_mut(&source)?.push(id.clone());
            }
        }

        self.created.insert(id.clone());
        self.records.insert(id, Some(node));
        Ok(())
    }

    fn apply_update(&mut self, node: NodeRecord, expected: u64) -> StorageResult<()> {
        let id = node.id.clone();
        let Some(current) = self.record(&id)? else {
            self.conflict(&id);
            return Ok(());
        };
        if current.version != expected {
            self.conflict(&id);
            return Ok(());
        }

        let moved = current.parent_id != node.parent_id || current.name != node.name;
        if moved {
            let Some(new_parent) = node.parent_id.clone() else {
                self.conflict(&id);
                return Ok(());
            };
            if self.record(&new_parent)?.is_none() || self.is_ancestor_or_self(&id, &new_parent)? {
                self.conflict(&id);
                return Ok(());
            }

            let new_name = node.name.as_str().to_string();
            let taken = self
                .children_mut(&new_parent)?
                .get(&new_name)
                .map_or(false, |existing| existing != &id);
            if taken {
                self.conflict(&id);
                return Ok(());
            }

            if let Some(old_parent) = current.parent_id.clone() {
                let old_children = self.children_mut(&old_parent)?;
                if old_children.get(current.name.as_str()) == Some(&id) {
                    old_children.remove(current.name.as_str());
                }
                self.children_changed.insert(old_parent);
            }
            self.children_mut(&new_parent)?.insert(new_name, id.clone());
            self.children_changed.insert(new_parent);
        }

        let mut next = node;
        next.version = current.version;
        next.created_at = current.created_at;
        let next = next.next_version();

        self.modified.insert(id.clone());
        self.records.insert(id, Some(next));
        Ok(())
    }

    fn apply_delete(&mut self, id: &NodeId, expected: u64) -> StorageResult<()> {
        let Some(current) = self.record(id)? else {
            self.conflict(id);
            return Ok(());
        };
        if current.version != expected || id.is_root() {
            self.conflict(id);
            return Ok(());
        }

        if let Some(parent) = current.parent_id.clone() {
            let children = self.children_mut(&parent)?;
            if children.get(current.name.as_str()) == Some(id) {
                children.remove(current.name.as_str());
            }
            self.children_changed.insert(parent);
        }

        self.modified.remove(id);
        self.deleted.insert(id.clone());
        self.records.insert(id.clone(), None);
        Ok(())
    }

    /// a deleted node must not keep children that survive the batch
    fn check_orphans(&mut self) -> StorageResult<()> {
        let deleted: Vec<NodeId> = self.deleted.iter().cloned().collect();
        for id in deleted {
            let children: Vec<NodeId> = self.children_mut(&id)?.values().cloned().collect();
            for child in children {
                if self.record(&child)?.is_some() {
                    self.conflict(&id);
                    self.conflict(&child);
                }
            }
        }
        Ok(())
    }

    fn finish(self) -> StorageResult<StagedBatch> {
        if !self.conflicts.is_empty() {
            return Err(StorageError::Conflict {
                ids: self.conflicts.into_iter().collect(),
            });
        }

        let mut children_index = self.children;
        let children = self
            .children_changed
            .into_iter()
            .filter_map(|id| children_index.remove(&id).map(|index| (id, index)))
            .collect();

        Ok(StagedBatch {
            records: self.records,
            children,
            versions: self.versions,
            created: self.created,
            modified: self.modified,
            deleted: self.deleted,
        })
    }
}

//! tree operations for node storage.
//!
//! in Git, a tree is a directory. In docrepo the root tree contains:
//! - `nodes/{shard}/{id}.json`: one blob per node record
//! - `children/{shard}/{parent}.json`: the name -> id index of each folder
//! - `versions/{shard}/{source}.json`: check-in ordered version ids
//!
//! the shard is the last two characters of the id, which keeps directory
//! fan-out bounded without a separate allocation table.

use std::collections::BTreeMap;
use std::path::Path;

use git2::{FileMode, ObjectType, Oid, Repository, Tree};

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::record::{self, ChildIndex, NodeRecord};
use crate::storage::types::{NodeId, TreeId};

pub(crate) const NODES_DIR: &str = "nodes";
pub(crate) const CHILDREN_DIR: &str = "children";
pub(crate) const VERSIONS_DIR: &str = "versions";

/// path of a node record inside the root tree
pub(crate) fn node_path(id: &NodeId) -> String {
    format!("{}/{}/{}.json", NODES_DIR, id.shard(), id)
}

/// path of the children index of a node
pub(crate) fn children_path(id: &NodeId) -> String {
    format!("{}/{}/{}.json", CHILDREN_DIR, id.shard(), id)
}

/// path of the version index of a source document
pub(crate) fn versions_path(id: &NodeId) -> String {
    format!("{}/{}/{}.json", VERSIONS_DIR, id.shard(), id)
}

/// A read only handle to a git tree at a specific commit
///
/// think of it as a snapshot - it won't change even if new commits are made.
#[derive(Debug)]
pub struct TreeHandle<'repo> {
    tree: Tree<'repo>,
}

impl<'repo> TreeHandle<'repo> {
    pub(crate) fn new(tree: Tree<'repo>) -> Self {
        Self { tree }
    }

    pub fn id(&self) -> TreeId {
        TreeId::new(self.tree.id())
    }

    pub(crate) fn inner(&self) -> &Tree<'repo> {
        &self.tree
    }

    /// get the blob id stored at `path`, if any
    pub(crate) fn blob_at(&self, path: &str) -> StorageResult<Option<Oid>> {
        let entry = match self.tree.get_path(Path::new(path)) {
            Ok(entry) => entry,
            Err(e) if e.code() == git2::ErrorCode::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::Git(e)),
        };

        if entry.kind() != Some(ObjectType::Blob) {
            return Err(StorageError::UnexpectedEntryType {
                path: path.into(),
                expected: "blob (file)".to_string(),
                found: format!("{:?}", entry.kind()),
            });
        }

        Ok(Some(entry.id()))
    }

    /// blob id of a node record
    pub fn node_blob(&self, id: &NodeId) -> StorageResult<Option<Oid>> {
        self.blob_at(&node_path(id))
    }

    /// check if a node exists
    pub fn node_exists(&self, id: &NodeId) -> StorageResult<bool> {
        Ok(self.node_blob(id)?.is_some())
    }

    /// read and decode a node record
    pub fn read_node(&self, repo: &Repository, id: &NodeId) -> StorageResult<Option<NodeRecord>> {
        match self.node_blob(id)? {
            Some(blob) => {
                let bytes = record::read_blob(repo, blob)?;
                Ok(Some(record::deserialize_record(&bytes, id)?))
            }
            None => Ok(None),
        }
    }

    /// read the children index of a node, empty when it has none
    pub fn read_children(&self, repo: &Repository, id: &NodeId) -> StorageResult<ChildIndex> {
        match self.blob_at(&children_path(id))? {
            Some(blob) => record::deserialize_children(&record::read_blob(repo, blob)?),
            None => Ok(ChildIndex::new()),
        }
    }

    /// read the version ids of a source document
    pub fn read_versions(&self, repo: &Repository, id: &NodeId) -> StorageResult<Vec<NodeId>> {
        match self.blob_at(&versions_path(id))? {
            Some(blob) => record::deserialize_versions(&record::read_blob(repo, blob)?),
            None => Ok(Vec::new()),
        }
    }

    /// list every node id under `nodes/`
    pub fn list_nodes(&self, repo: &Repository) -> StorageResult<Vec<NodeId>> {
        let nodes = match self.tree.get_name(NODES_DIR) {
            Some(entry) if entry.kind() == Some(ObjectType::Tree) => repo.find_tree(entry.id())?,
            _ => return Ok(Vec::new()),
        };

        let mut ids = Vec::new();
        for shard in nodes.iter() {
            if shard.kind() != Some(ObjectType::Tree) {
                continue;
            }
            let shard_tree = repo.find_tree(shard.id())?;
            for entry in shard_tree.iter() {
                let Some(name) = entry.name() else { continue };
                let Some(id) = name.strip_suffix(".json") else { continue };
                if let Ok(id) = NodeId::new(id) {
                    ids.push(id);
                }
            }
        }

        Ok(ids)
    }
}

/// a mutable tree builder for making changes
///
/// this adds up path edits and produces a new tree when it's final;
/// the original tree is not modified. Directories left empty by removals
/// are dropped, git does not track empty trees.
///
/// # Usage Pattern
///
/// ```ignore
/// let mut mutator = TreeMutator::from_tree(repo, &tree);
/// mutator.upsert(node_path(&id), blob_id);
/// mutator.remove(children_path(&id));
/// let new_tree_id = mutator.write()?;
/// ```
pub struct TreeMutator<'repo> {
    repo: &'repo Repository,
    base: Option<Tree<'repo>>,
    /// path -> new blob (`None` removes the entry)
    edits: BTreeMap<String, Option<Oid>>,
}

impl<'repo> TreeMutator<'repo> {
    /// create a new TreeMutator from an existing tree
    pub fn from_tree(repo: &'repo Repository, tree: &TreeHandle<'repo>) -> Self {
        Self {
            repo,
            base: Some(tree.inner().clone()),
            edits: BTreeMap::new(),
        }
    }

    /// create a new TreeMutator for an empty tree
    pub fn empty(repo: &'repo Repository) -> Self {
        Self {
            repo,
            base: None,
            edits: BTreeMap::new(),
        }
    }

    /// insert or replace the blob at `path`
    pub fn upsert(&mut self, path: impl Into<String>, blob: Oid) {
        self.edits.insert(path.into(), Some(blob));
    }

    /// remove the entry at `path` (no-op when absent)
    pub fn remove(&mut self, path: impl Into<String>) {
        self.edits.insert(path.into(), None);
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    /// write all changes and return the new root tree ID
    pub fn write(self) -> StorageResult<TreeId> {
        let edits: Vec<(&str, Option<Oid>)> =
            self.edits.iter().map(|(path, blob)| (path.as_str(), *blob)).collect();

        let root = match apply_edits(self.repo, self.base.as_ref(), edits)? {
            Some(oid) => oid,
            None => self.repo.treebuilder(None)?.write()?,
        };

        Ok(TreeId::new(root))
    }
}

/// rebuild one tree level, recursing into the subdirectories that have edits
///
/// returns `None` when the resulting tree is empty
fn apply_edits(
    repo: &Repository,
    base: Option<&Tree<'_>>,
    edits: Vec<(&str, Option<Oid>)>,
) -> StorageResult<Option<Oid>> {
    let mut builder = repo.treebuilder(base)?;
    let mut nested: BTreeMap<&str, Vec<(&str, Option<Oid>)>> = BTreeMap::new();

    for (path, blob) in edits {
        match path.split_once('/') {
            Some((dir, rest)) => nested.entry(dir).or_default().push((rest, blob)),
            None => match blob {
                Some(oid) => {
                    builder.insert(path, oid, FileMode::Blob.into())?;
                }
                None => {
                    if builder.get(path)?.is_some() {
                        builder.remove(path)?;
                    }
                }
            },
        }
    }

    for (dir, sub_edits) in nested {
        let existing = builder
            .get(dir)?
            .filter(|entry| entry.kind() == Some(ObjectType::Tree))
            .map(|entry| entry.id());
        let subtree = existing.map(|oid| repo.find_tree(oid)).transpose()?;

        match apply_edits(repo, subtree.as_ref(), sub_edits)? {
            Some(oid) => {
                builder.insert(dir, oid, FileMode::Tree.into())?;
            }
            None => {
                if builder.get(dir)?.is_some() {
                    builder.remove(dir)?;
                }
            }
        }
    }

    if builder.len() == 0 {
        return Ok(None);
    }
    Ok(Some(builder.write()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup_repo() -> (TempDir, Repository) {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        (dir, repo)
    }

    fn handle(repo: &Repository, id: TreeId) -> TreeHandle<'_> {
        TreeHandle::new(repo.find_tree(id.raw()).unwrap())
    }

    #[test]
    fn test_paths_are_sharded() {
        let id = NodeId::new("01arz3ndektsv4rrffq69g5fav").unwrap();
        assert_eq!(node_path(&id), "nodes/av/01arz3ndektsv4rrffq69g5fav.json");
        assert_eq!(children_path(&id), "children/av/01arz3ndektsv4rrffq69g5fav.json");
        assert_eq!(versions_path(&id), "versions/av/01arz3ndektsv4rrffq69g5fav.json");
    }

    #[test]
    fn test_upsert_and_lookup() {
        let (_dir, repo) = setup_repo();
        let blob = repo.blob(b"{}").unwrap();
        let id = NodeId::new("node1").unwrap();

        let mut mutator = TreeMutator::empty(&repo);
        mutator.upsert(node_path(&id), blob);
        let tree_id = mutator.write().unwrap();

        let tree = handle(&repo, tree_id);
        assert_eq!(tree.node_blob(&id).unwrap(), Some(blob));
        assert!(!tree.node_exists(&NodeId::new("other").unwrap()).unwrap());
        assert_eq!(tree.list_nodes(&repo).unwrap(), vec![id]);
    }

    #[test]
    fn test_edits_preserve_untouched_entries() {
        let (_dir, repo) = setup_repo();
        let blob_a = repo.blob(b"a").unwrap();
        let blob_b = repo.blob(b"b").unwrap();
        let a = NodeId::new("aa").unwrap();
        let b = NodeId::new("ba").unwrap();

        let mut mutator = TreeMutator::empty(&repo);
        mutator.upsert(node_path(&a), blob_a);
        let first = mutator.write().unwrap();

        let base = handle(&repo, first);
        let mut mutator = TreeMutator::from_tree(&repo, &base);
        mutator.upsert(node_path(&b), blob_b);
        let second = mutator.write().unwrap();

        let tree = handle(&repo, second);
        assert_eq!(tree.node_blob(&a).unwrap(), Some(blob_a));
        assert_eq!(tree.node_blob(&b).unwrap(), Some(blob_b));
    }

    #[test]
    fn test_remove_prunes_empty_directories() {
        let (_dir, repo) = setup_repo();
        let blob = repo.blob(b"x").unwrap();
        let id = NodeId::new("node1").unwrap();

        let mut mutator = TreeMutator::empty(&repo);
        mutator.upsert(node_path(&id), blob);
        let tree_id = mutator.write().unwrap();

        let base = handle(&repo, tree_id);
        let mut mutator = TreeMutator::from_tree(&repo, &base);
        mutator.remove(node_path(&id));
        mutator.remove("nodes/zz/missing.json");
        let tree_id = mutator.write().unwrap();

        let tree = handle(&repo, tree_id);
        assert!(tree.inner().get_name(NODES_DIR).is_none());
        assert!(tree.list_nodes(&repo).unwrap().is_empty());
    }
}

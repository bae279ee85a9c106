//! Core Git backend connection.
//!
//! A `GitBackend` wraps one opened `git2::Repository`: it is the low-level
//! connection that the pool hands out to sessions. Handles are `Send` but
//! not `Sync`, so each one is owned by exactly one session at a time.
//! Several handles may point at the same directory, concurrently or from
//! different processes; writers serialise on the compare-and-swap of `main`.

use std::path::{Path, PathBuf};

use git2::Repository;
use tracing::{debug, instrument};

use crate::storage::batch::{self, BatchOutcome, WriteBatch};
use crate::storage::commit::{self, CommitBuilder, CommitInfo};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::record::{ChildIndex, NodeRecord};
use crate::storage::refs::RefManager;
use crate::storage::tree::TreeMutator;
use crate::storage::types::{CommitId, GitSignature, NodeId};

/// how many times a batch is rebuilt after losing the race on `main`
const MAX_CAS_ATTEMPTS: usize = 8;

/// One connection to a git-backed document repository.
pub struct GitBackend {
    repo: Repository,
    path: PathBuf,
}

impl GitBackend {
    /// Open an existing repository.
    #[instrument(level = "debug")]
    pub fn open(path: &Path) -> StorageResult<Self> {
        let repo = Repository::open(path).map_err(|_| StorageError::NotInitialized(path.to_path_buf()))?;
        if !RefManager::main_exists(&repo) {
            return Err(StorageError::EmptyRepository);
        }

        Ok(Self {
            repo,
            path: path.to_path_buf(),
        })
    }

    /// Initialize a new repository holding only the root node.
    #[instrument(level = "debug")]
    pub fn init(path: &Path) -> StorageResult<Self> {
        let repo = Repository::init(path)?;
        let commit_id = commit::create_initial_commit(&repo, &GitSignature::docrepo())?;
        RefManager::init_main_branch(&repo, commit_id)?;
        debug!(path = %path.display(), commit = %commit_id.short(), "initialized backend");

        Ok(Self {
            repo,
            path: path.to_path_buf(),
        })
    }

    /// Open or initialize a repository.
    pub fn open_or_init(path: &Path) -> StorageResult<Self> {
        if path.join(".git").exists() {
            Self::open(path)
        } else {
            Self::init(path)
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// cheap liveness probe used by the pool before reusing a connection
    pub fn is_healthy(&self) -> bool {
        self.path.exists() && RefManager::head_commit(&self.repo).is_ok()
    }

    /// Get the current tip of `main`.
    pub fn head(&self) -> StorageResult<CommitId> {
        RefManager::head_commit(&self.repo)
    }

    pub fn get_commit(&self, id: CommitId) -> StorageResult<CommitInfo> {
        commit::get_commit(&self.repo, id)
    }

    /// Read a node record at a commit.
    pub fn read_node(&self, id: &NodeId, at: CommitId) -> StorageResult<Option<NodeRecord>> {
        let tree = commit::get_tree_at_commit(&self.repo, at)?;
        tree.read_node(&self.repo, id)
    }

    /// Read the children index (name -> id) of a node at a commit.
    pub fn read_children(&self, id: &NodeId, at: CommitId) -> StorageResult<ChildIndex> {
        let tree = commit::get_tree_at_commit(&self.repo, at)?;
        tree.read_children(&self.repo, id)
    }

    /// Read the version ids of a source document at a commit.
    pub fn read_versions(&self, id: &NodeId, at: CommitId) -> StorageResult<Vec<NodeId>> {
        let tree = commit::get_tree_at_commit(&self.repo, at)?;
        tree.read_versions(&self.repo, id)
    }

    /// Write a batch as one commit on `main`.
    ///
    /// The batch is staged against the current head. When another writer
    /// advances `main` first, the batch is staged again on the new head;
    /// only genuine record conflicts surface as `StorageError::Conflict`.
    #[instrument(skip(self, batch, signature), fields(path = %self.path.display(), ops = batch.len()))]
    pub fn write_batch(
        &self,
        batch: &WriteBatch,
        signature: &GitSignature,
        message: &str,
    ) -> StorageResult<BatchOutcome> {
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let head = self.head()?;
            let tree = commit::get_tree_at_commit(&self.repo, head)?;
            let staged = batch::stage(&self.repo, &tree, batch)?;

            let mut mutator = TreeMutator::from_tree(&self.repo, &tree);
            staged.write_into(&self.repo, &mut mutator)?;
            let tree_id = mutator.write()?;

            let commit_id = CommitBuilder::new(&self.repo)
                .tree(tree_id)
                .parent(head)
                .message(message)
                .signature(signature.clone())
                .commit()?;

            match RefManager::update_main_if_unchanged(&self.repo, head, commit_id) {
                Ok(()) => {
                    debug!(commit = %commit_id.short(), attempt, "batch committed");
                    return Ok(staged.into_outcome(commit_id));
                }
                Err(e) if e.is_retriable() => {
                    debug!(attempt, "main moved during write, restaging batch");
                }
                Err(e) => return Err(e),
            }
        }

        Err(StorageError::ConcurrentModification {
            branch: RefManager::MAIN.to_string(),
        })
    }

    /// Get commit history of `main`, newest first.
    pub fn history(&self, limit: Option<usize>) -> StorageResult<Vec<CommitInfo>> {
        let iter = commit::history(&self.repo, self.head()?)?;
        match limit {
            Some(n) => iter.take(n).collect(),
            None => iter.collect(),
        }
    }

    /// Get statistics about the repository at a commit.
    pub fn stats(&self, at: CommitId) -> StorageResult<RepositoryStats> {
        let tree = commit::get_tree_at_commit(&self.repo, at)?;
        let node_count = tree.list_nodes(&self.repo)?.len();
        let commit_count = commit::history(&self.repo, at)?.count();

        Ok(RepositoryStats {
            head: at,
            node_count,
            commit_count,
        })
    }
}

/// Statistics about the repository.
#[derive(Debug, Clone)]
pub struct RepositoryStats {
    pub head: CommitId,
    pub node_count: usize,
    pub commit_count: usize,
}

impl std::fmt::Display for RepositoryStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Repository Statistics:")?;
        writeln!(f, "  Head: {}", self.head.short())?;
        writeln!(f, "  Nodes: {}", self.node_count)?;
        writeln!(f, "  Commits: {}", self.commit_count)
    }
}

//! Branch and reference management.
//!
//! docrepo keeps a single branch, `main`. Every writer advances it with a
//! compare-and-swap so two processes sharing a backend never lose commits.

use git2::Repository;

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::CommitId;

/// Manages Git references.
pub struct RefManager;

impl RefManager {
    pub const MAIN: &'static str = "main";
    pub const MAIN_REF: &'static str = "refs/heads/main";

    /// Resolve `main` to its current commit ID.
    pub fn head_commit(repo: &Repository) -> StorageResult<CommitId> {
        let reference = match repo.find_reference(Self::MAIN_REF) {
            Ok(r) => r,
            Err(e) if e.code() == git2::ErrorCode::NotFound => {
                return Err(StorageError::EmptyRepository)
            }
            Err(e) => return Err(StorageError::Git(e)),
        };

        let commit = reference
            .peel_to_commit()
            .map_err(|_| StorageError::RefNotFound(Self::MAIN.to_string()))?;

        Ok(CommitId::new(commit.id()))
    }

    /// Check if `main` exists.
    pub fn main_exists(repo: &Repository) -> bool {
        repo.find_reference(Self::MAIN_REF).is_ok()
    }

    /// Advance `main` only if it still points to the expected commit.
    ///
    /// The check and the write happen atomically inside libgit2, so this is
    /// safe across processes sharing the repository.
    pub fn update_main_if_unchanged(
        repo: &Repository,
        expected: CommitId,
        new_target: CommitId,
    ) -> StorageResult<()> {
        let current = Self::head_commit(repo)?;
        if current != expected {
            return Err(StorageError::ConcurrentModification {
                branch: Self::MAIN.to_string(),
            });
        }

        let log = format!("advance main to {}", new_target.short());
        match repo.reference_matching(Self::MAIN_REF, new_target.raw(), true, expected.raw(), &log) {
            Ok(_) => Ok(()),
            Err(e) if e.code() == git2::ErrorCode::Modified => {
                Err(StorageError::ConcurrentModification {
                    branch: Self::MAIN.to_string(),
                })
            }
            Err(e) => Err(StorageError::Git(e)),
        }
    }

    /// Initialize the main branch if it doesn't exist.
    ///
    /// Also ensures HEAD points to main.
    pub fn init_main_branch(repo: &Repository, initial_commit: CommitId) -> StorageResult<()> {
        if !Self::main_exists(repo) {
            let commit = repo.find_commit(initial_commit.raw())?;
            repo.branch(Self::MAIN, &commit, false)?;
        }

        repo.set_head(Self::MAIN_REF)?;
        Ok(())
    }
}

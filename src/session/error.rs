//! session errors

use std::fmt;

use thiserror::Error;

use crate::binary::BinaryError;
use crate::model::SchemaError;
use crate::pool::PoolError;
use crate::storage::{InvalidNameError, NodeId, StorageError};

/// lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    /// flushing pending changes
    Saving,
    /// final flush before closing
    Committing,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Open => write!(f, "open"),
            SessionState::Saving => write!(f, "saving"),
            SessionState::Committing => write!(f, "committing"),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    /// absent, deleted in this session, or not readable by the principal
    #[error("document not found: {0}")]
    DocumentNotFound(String),

    /// another writer changed these nodes first; pending changes were dropped
    #[error("concurrent update of {} document(s): {}", ids.len(), join_ids(ids))]
    ConcurrentUpdate { ids: Vec<NodeId> },

    #[error("invalid tree operation: {0}")]
    InvalidTreeOperation(String),

    #[error(transparent)]
    InvalidName(#[from] InvalidNameError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Binary(#[from] BinaryError),

    #[error("backend error in repository {repository} (session {session}): {source}")]
    Backend {
        repository: String,
        session: String,
        #[source]
        source: StorageError,
    },

    #[error("session {session} is {state}")]
    NotLive { session: String, state: SessionState },

    #[error("repository {0} is no longer available")]
    RepositoryClosed(String),
}

fn join_ids(ids: &[NodeId]) -> String {
    ids.iter().map(NodeId::as_str).collect::<Vec<_>>().join(", ")
}

impl SessionError {
    pub fn is_not_found(&self) -> bool {
        match self {
            SessionError::DocumentNotFound(_) => true,
            SessionError::Binary(e) => e.is_not_found(),
            SessionError::Backend { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// check if repeating the unit of work may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            SessionError::ConcurrentUpdate { .. } => true,
            SessionError::Pool(e) => e.is_retriable(),
            _ => false,
        }
    }
}

pub type SessionResult<T> = Result<T, SessionError>;

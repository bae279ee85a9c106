//! storage layer for docrepo
//!
//! this module is the connector to the git object database that backs a
//! repository. The upper layers (pool, sessions) use this API and never
//! touch git2 directly.
//!
//!  # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       GitBackend                            │
//! │      (one connection: read nodes, write batches, history)   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!        ┌─────────────────────┼─────────────────────┐
//!        │                     │                     │
//!        ▼                     ▼                     ▼
//!  ┌─────────────┐       ┌─────────────┐       ┌─────────────┐
//!  │    batch    │       │   record    │       │    refs     │
//!  │  (staging)  │       │ (node json) │       │   (main)    │
//!  └─────────────┘       └─────────────┘       └─────────────┘
//!         │                     │                     │
//!         └──────────┬──────────┴──────────┬──────────┘
//!                    ▼                     ▼
//!             ┌─────────────┐       ┌─────────────┐
//!             │    tree     │       │   commit    │
//!             │  (layout)   │       │  (history)  │
//!             └─────────────┘       └─────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use docrepo::storage::{GitBackend, NodeId, NodeName, NodeRecord, WriteBatch};
//!
//! let backend = GitBackend::open_or_init(Path::new("./repo"))?;
//! let root = NodeId::root();
//!
//! let mut batch = WriteBatch::new();
//! batch.create(NodeRecord::new(NodeId::generate(), Some(root.clone()), NodeName::new("docs")?, "Folder"));
//! let outcome = backend.write_batch(&batch, &GitSignature::docrepo(), "create docs")?;
//!
//! let children = backend.read_children(&root, outcome.commit)?;
//! ```

mod backend;
mod batch;
mod commit;
mod error;
mod record;
mod refs;
mod tree;
mod types;

pub use backend::{GitBackend, RepositoryStats};
pub use batch::{BatchOutcome, WriteBatch};
pub use commit::{CommitInfo, CommitMessage};
pub use error::{StorageError, StorageResult};
pub use record::{Ace, ChildIndex, NodeRecord, DEFAULT_LIFECYCLE};
pub use types::{CommitId, GitSignature, InvalidNameError, NodeId, NodeName, TreeId};
pub(crate) use types::generate_id;

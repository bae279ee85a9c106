//! docrepo - a hierarchical document repository on top of git
//!
//! Documents live in a tree of typed nodes stored in a git repository;
//! every save is one commit. Callers work through sessions, which cache
//! what they read, stage their changes locally and keep each other's
//! caches fresh through invalidation messages. Binary content is kept
//! beside the tree in a content-addressed store.
//!
//! # Example
//!
//! ```no_run
//! use std::collections::BTreeMap;
//!
//! use docrepo::config::{RegistryConfig, RepositoryConfig};
//! use docrepo::model::{PropertyValue, NOTE_TYPE};
//! use docrepo::RepositoryRegistry;
//!
//! let config = RegistryConfig::new()
//!     .repository(RepositoryConfig::new("default", "./repo").default(true));
//! let registry = RepositoryRegistry::from_config(&config).unwrap();
//!
//! let mut session = registry.open_session(None, "alice").unwrap();
//! let mut props = BTreeMap::new();
//! props.insert("dc:title".to_string(), PropertyValue::from("Hello"));
//! session.create_document("/", "hello", NOTE_TYPE, props).unwrap();
//! session.commit().unwrap();
//! ```

pub mod binary;
pub mod config;
pub mod invalidation;
pub mod model;
pub mod pool;
pub mod repository;
pub mod session;
pub mod storage;

pub use binary::{BinaryRef, BinaryStore};
pub use model::{DocumentModel, PropertyValue, SchemaRegistry};
pub use repository::{RegistryError, Repository, RepositoryRegistry};
pub use session::{DocRef, Session, SessionError};
pub use storage::{GitBackend, NodeId, StorageError};

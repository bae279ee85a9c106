use std::fmt;

use crate::model::DocumentModel;
use crate::storage::NodeId;

/// How a caller names a document: by id or by absolute path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocRef {
    Id(NodeId),
    /// `/`-separated names from the root, `/` itself is the root
    Path(String),
}

impl DocRef {
    pub fn root() -> Self {
        DocRef::Id(NodeId::root())
    }
}

impl From<NodeId> for DocRef {
    fn from(id: NodeId) -> Self {
        DocRef::Id(id)
    }
}

impl From<&NodeId> for DocRef {
    fn from(id: &NodeId) -> Self {
        DocRef::Id(id.clone())
    }
}

impl From<&str> for DocRef {
    fn from(path: &str) -> Self {
        DocRef::Path(path.to_string())
    }
}

impl From<String> for DocRef {
    fn from(path: String) -> Self {
        DocRef::Path(path)
    }
}

impl From<&DocumentModel> for DocRef {
    fn from(doc: &DocumentModel) -> Self {
        DocRef::Id(doc.id().clone())
    }
}

impl fmt::Display for DocRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocRef::Id(id) => write!(f, "{}", id),
            DocRef::Path(path) => write!(f, "{}", path),
        }
    }
}

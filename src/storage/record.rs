//! Blob operations for node storage.
//!
//! Each node is stored as a separate JSON file with a consistent format
//! that carries metadata for version tracking and conflict detection.
//! The children and versions indexes are stored as JSON blobs as well.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use git2::{Oid, Repository};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{NodeId, NodeName};

/// lifecycle state given to freshly created documents
pub const DEFAULT_LIFECYCLE: &str = "project";

/// one access control entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ace {
    pub principal: String,
    pub permission: String,
    pub granted: bool,
}

impl Ace {
    pub fn grant(principal: impl Into<String>, permission: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            permission: permission.into(),
            granted: true,
        }
    }

    pub fn deny(principal: impl Into<String>, permission: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            permission: permission.into(),
            granted: false,
        }
    }
}

/// a stored document node with metadata and property data
///
/// The internal format stored in Git:
/// ```text
/// {
///   "_id": "01hx...",
///   "_parent": "00000000000000000000000000",
///   "_name": "report",
///   "_type": "File",
///   "_version": 3,
///   "_created_at": "2024-01-01T00:00:00Z",
///   "_modified_at": "2024-01-02T00:00:00Z",
///   "_lifecycle": "project",
///   "dc:title": "Quarterly report"
/// }
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRecord {
    /// immutable id (must match the file name without .json)
    pub id: NodeId,
    /// parent node, `None` for the root and for version nodes
    pub parent_id: Option<NodeId>,
    pub name: NodeName,
    pub doc_type: String,
    /// version counter for optimistic concurrency control
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub lifecycle_state: String,
    pub is_version: bool,
    pub is_proxy: bool,
    /// source document for versions and proxies
    pub source_id: Option<NodeId>,
    pub version_label: Option<String>,
    pub acl: Vec<Ace>,
    /// schema-prefixed property values (`dc:title`, `file:content`, ...)
    pub properties: BTreeMap<String, Value>,
}

impl NodeRecord {
    /// creates a new node record at version 1
    pub fn new(id: NodeId, parent_id: Option<NodeId>, name: NodeName, doc_type: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            parent_id,
            name,
            doc_type: doc_type.into(),
            version: 1,
            created_at: now,
            modified_at: now,
            lifecycle_state: DEFAULT_LIFECYCLE.to_string(),
            is_version: false,
            is_proxy: false,
            source_id: None,
            version_label: None,
            acl: Vec::new(),
            properties: BTreeMap::new(),
        }
    }

    /// the record every repository starts with
    pub fn root() -> Self {
        Self::new(NodeId::root(), None, NodeName::root(), "Root")
    }

    /// the stored successor of this record
    ///
    /// increments version and updates the timestamp
    pub fn next_version(mut self) -> Self {
        self.version += 1;
        self.modified_at = Utc::now();
        self
    }

    /// get a property value by xpath
    pub fn get(&self, xpath: &str) -> Option<&Value> {
        self.properties.get(xpath)
    }

    /// versions live outside the tree
    pub fn is_attached(&self) -> bool {
        self.parent_id.is_some() || self.id.is_root()
    }
}

/// internal format for JSON serialization
///
/// uses `_` prefix for metadata fields, property names always carry a schema prefix
#[derive(Serialize, Deserialize)]
struct NodeJson {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_parent", default, skip_serializing_if = "Option::is_none")]
    parent: Option<String>,
    #[serde(rename = "_name")]
    name: String,
    #[serde(rename = "_type")]
    doc_type: String,
    #[serde(rename = "_version")]
    version: u64,
    #[serde(rename = "_created_at")]
    created_at: DateTime<Utc>,
    #[serde(rename = "_modified_at")]
    modified_at: DateTime<Utc>,
    #[serde(rename = "_lifecycle")]
    lifecycle: String,
    #[serde(rename = "_is_version", default)]
    is_version: bool,
    #[serde(rename = "_is_proxy", default)]
    is_proxy: bool,
    #[serde(rename = "_source", default, skip_serializing_if = "Option::is_none")]
    source: Option<String>,
    #[serde(rename = "_label", default, skip_serializing_if = "Option::is_none")]
    label: Option<String>,
    #[serde(rename = "_acl", default, skip_serializing_if = "Vec::is_empty")]
    acl: Vec<Ace>,
    #[serde(flatten)]
    properties: BTreeMap<String, Value>,
}

/// serialize a node to JSON bytes
///
/// uses BTreeMap for consistent key ordering (important for git deduplication)
pub fn serialize_record(record: &NodeRecord) -> StorageResult<Vec<u8>> {
    let json = NodeJson {
        id: record.id.as_str().to_string(),
        parent: record.parent_id.as_ref().map(|p| p.as_str().to_string()),
        name: record.name.as_str().to_string(),
        doc_type: record.doc_type.clone(),
        version: record.version,
        created_at: record.created_at,
        modified_at: record.modified_at,
        lifecycle: record.lifecycle_state.clone(),
        is_version: record.is_version,
        is_proxy: record.is_proxy,
        source: record.source_id.as_ref().map(|s| s.as_str().to_string()),
        label: record.version_label.clone(),
        acl: record.acl.clone(),
        properties: record.properties.clone(),
    };

    let bytes = serde_json::to_vec_pretty(&json)?;
    Ok(bytes)
}

/// deserialize a node from JSON bytes
///
/// validates that the id in the JSON matches the expected id
pub fn deserialize_record(bytes: &[u8], expected_id: &NodeId) -> StorageResult<NodeRecord> {
    let json: NodeJson = serde_json::from_slice(bytes)?;

    if json.id != expected_id.as_str() {
        return Err(StorageError::CorruptedData {
            path: format!("{}.json", expected_id).into(),
            reason: format!(
                "node id mismatch: file name suggests '{}' but content has '{}'",
                expected_id, json.id
            ),
        });
    }

    Ok(NodeRecord {
        id: expected_id.clone(),
        parent_id: json.parent.map(NodeId::new).transpose()?,
        name: NodeName::try_from(json.name)?,
        doc_type: json.doc_type,
        version: json.version,
        created_at: json.created_at,
        modified_at: json.modified_at,
        lifecycle_state: json.lifecycle,
        is_version: json.is_version,
        is_proxy: json.is_proxy,
        source_id: json.source.map(NodeId::new).transpose()?,
        version_label: json.label,
        acl: json.acl,
        properties: json.properties,
    })
}

/// children of one node, keyed by name
///
/// the BTreeMap gives listing order and unique sibling names for free
pub type ChildIndex = BTreeMap<String, NodeId>;

pub fn serialize_children(children: &ChildIndex) -> StorageResult<Vec<u8>> {
    Ok(serde_json::to_vec_pretty(children)?)
}

pub fn deserialize_children(bytes: &[u8]) -> StorageResult<ChildIndex> {
    Ok(serde_json::from_slice(bytes)?)
}

/// version ids of one source document, in check-in order
pub fn serialize_versions(versions: &[NodeId]) -> StorageResult<Vec<u8>> {
    Ok(serde_json::to_vec_pretty(versions)?)
}

pub fn deserialize_versions(bytes: &[u8]) -> StorageResult<Vec<NodeId>> {
    Ok(serde_json::from_slice(bytes)?)
}

/// write raw bytes as a blob to the repository
///
/// returns the blob Oid (SHA-1 hash of the content)
pub fn write_blob(repo: &Repository, bytes: &[u8]) -> StorageResult<Oid> {
    Ok(repo.blob(bytes)?)
}

/// read a blob's content from the repository
pub fn read_blob(repo: &Repository, blob_id: Oid) -> StorageResult<Vec<u8>> {
    let blob = repo.find_blob(blob_id)?;
    Ok(blob.content().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> NodeRecord {
        let mut record = NodeRecord::new(
            NodeId::new("node1").unwrap(),
            Some(NodeId::root()),
            NodeName::new("report").unwrap(),
            "File",
        );
        record
            .properties
            .insert("dc:title".to_string(), Value::String("Quarterly".to_string()));
        record.acl.push(Ace::grant("alice", "Read"));
        record
    }

    #[test]
    fn test_record_creation() {
        let record = sample();
        assert_eq!(record.version, 1);
        assert_eq!(record.lifecycle_state, DEFAULT_LIFECYCLE);
        assert_eq!(record.get("dc:title"), Some(&Value::String("Quarterly".to_string())));
        assert!(record.is_attached());
    }

    #[test]
    fn test_serialization_format() {
        let bytes = serialize_record(&sample()).unwrap();
        let parsed: Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(parsed["_id"], "node1");
        assert_eq!(parsed["_version"], 1);
        assert_eq!(parsed["dc:title"], "Quarterly");
        assert!(parsed.get("_source").is_none());
    }

    #[test]
    fn test_serialization_preserves_metadata() {
        let mut record = sample();
        record.is_proxy = true;
        record.source_id = Some(NodeId::new("target").unwrap());

        let bytes = serialize_record(&record).unwrap();
        let restored = deserialize_record(&bytes, &record.id).unwrap();
        assert_eq!(restored, record);
    }

    #[test]
    fn test_root_record_roundtrip() {
        let root = NodeRecord::root();
        let bytes = serialize_record(&root).unwrap();
        let restored = deserialize_record(&bytes, &NodeId::root()).unwrap();
        assert_eq!(restored.name.as_str(), "");
        assert!(restored.parent_id.is_none());
        assert!(restored.is_attached());
    }

    #[test]
    fn test_next_version() {
        let record = sample();
        let created = record.modified_at;
        let next = record.next_version();
        assert_eq!(next.version, 2);
        assert!(next.modified_at >= created);
    }

    #[test]
    fn test_id_mismatch_detection() {
        let bytes = serialize_record(&sample()).unwrap();
        let result = deserialize_record(&bytes, &NodeId::new("other").unwrap());
        assert!(matches!(result, Err(StorageError::CorruptedData { .. })));
    }

    #[test]
    fn test_children_index_is_sorted() {
        let mut children = ChildIndex::new();
        children.insert("b".to_string(), NodeId::new("id-b").unwrap());
        children.insert("a".to_string(), NodeId::new("id-a").unwrap());

        let bytes = serialize_children(&children).unwrap();
        let restored = deserialize_children(&bytes).unwrap();
        let names: Vec<_> = restored.keys().cloned().collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}

//! In-memory documents.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};

use super::registry::SchemaRegistry;
use super::schema::Schema;
use super::types::PropertyValue;
use crate::storage::{Ace, NodeId, NodeRecord};

/// A document as seen by a session.
///
/// Built from a node record at the version the session read. Local edits
/// are tracked per property and only reach the repository through
/// `Session::save_document`.
#[derive(Debug, Clone)]
pub struct DocumentModel {
    record: NodeRecord,
    path: String,
    properties: BTreeMap<String, PropertyValue>,
    dirty: BTreeSet<String>,
    acl_dirty: bool,
    lifecycle_dirty: bool,
}

impl DocumentModel {
    pub(crate) fn from_record(record: NodeRecord, path: String, schemas: &SchemaRegistry) -> Self {
        let properties = schemas.decode_all(&record.doc_type, &record.properties);
        Self {
            record,
            path,
            properties,
            dirty: BTreeSet::new(),
            acl_dirty: false,
            lifecycle_dirty: false,
        }
    }

    pub fn id(&self) -> &NodeId {
        &self.record.id
    }

    pub fn parent_id(&self) -> Option<&NodeId> {
        self.record.parent_id.as_ref()
    }

    pub fn name(&self) -> &str {
        self.record.name.as_str()
    }

    /// absolute path, `/` for the root
    ///
    /// versions live outside the tree and report their source's path
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn doc_type(&self) -> &str {
        &self.record.doc_type
    }

    pub fn property(&self, xpath: &str) -> Option<&PropertyValue> {
        self.properties.get(xpath)
    }

    pub fn properties(&self) -> &BTreeMap<String, PropertyValue> {
        &self.properties
    }

    /// set a property and mark it dirty; validated on save
    pub fn set_property(&mut self, xpath: impl Into<String>, value: impl Into<PropertyValue>) {
        let xpath = xpath.into();
        self.properties.insert(xpath.clone(), value.into());
        self.dirty.insert(xpath);
    }

    pub fn remove_property(&mut self, xpath: &str) -> Option<PropertyValue> {
        let old = self.properties.remove(xpath);
        if old.is_some() {
            self.dirty.insert(xpath.to_string());
        }
        old
    }

    /// properties of one schema, keyed by field name without prefix
    pub fn properties_for<'a>(&'a self, schema: &'a Schema) -> BTreeMap<&'a str, &'a PropertyValue> {
        schema
            .fields
            .iter()
            .filter_map(|field| {
                self.properties
                    .get(&schema.xpath(&field.name))
                    .map(|value| (field.name.as_str(), value))
            })
            .collect()
    }

    pub fn title(&self) -> Option<&str> {
        self.property("dc:title").and_then(PropertyValue::as_str)
    }

    pub fn acl(&self) -> &[Ace] {
        &self.record.acl
    }

    pub fn set_acl(&mut self, acl: Vec<Ace>) {
        self.record.acl = acl;
        self.acl_dirty = true;
    }

    pub fn lifecycle_state(&self) -> &str {
        &self.record.lifecycle_state
    }

    pub fn set_lifecycle_state(&mut self, state: impl Into<String>) {
        self.record.lifecycle_state = state.into();
        self.lifecycle_dirty = true;
    }

    pub fn is_version(&self) -> bool {
        self.record.is_version
    }

    pub fn is_proxy(&self) -> bool {
        self.record.is_proxy
    }

    pub fn is_folder(&self, schemas: &SchemaRegistry) -> bool {
        schemas.check_folderish(self.doc_type()).is_ok()
    }

    /// source document of a version or proxy
    pub fn source_id(&self) -> Option<&NodeId> {
        self.record.source_id.as_ref()
    }

    pub fn version_label(&self) -> Option<&str> {
        self.record.version_label.as_deref()
    }

    /// the record version this document was read at
    pub fn change_token(&self) -> u64 {
        self.record.version
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.record.created_at
    }

    pub fn modified_at(&self) -> DateTime<Utc> {
        self.record.modified_at
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty() || self.acl_dirty || self.lifecycle_dirty
    }

    /// dirty properties, `None` for removed ones
    pub fn dirty_properties(&self) -> BTreeMap<&str, Option<&PropertyValue>> {
        self.dirty
            .iter()
            .map(|xpath| (xpath.as_str(), self.properties.get(xpath)))
            .collect()
    }

    /// copy the local edits onto `target`, leaving its other fields alone
    pub(crate) fn apply_to(&self, target: &mut NodeRecord) {
        for xpath in &self.dirty {
            match self.properties.get(xpath) {
                Some(value) => {
                    target.properties.insert(xpath.clone(), value.to_json());
                }
                None => {
                    target.properties.remove(xpath);
                }
            }
        }
        if self.acl_dirty {
            target.acl = self.record.acl.clone();
        }
        if self.lifecycle_dirty {
            target.lifecycle_state = self.record.lifecycle_state.clone();
        }
    }

    pub(crate) fn record(&self) -> &NodeRecord {
        &self.record
    }
}

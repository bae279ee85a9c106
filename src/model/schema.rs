//! Schema and document type definitions.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::types::{PropertyType, PropertyValue};

/// One typed field of a schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    /// Field name without the schema prefix.
    pub name: String,
    pub field_type: PropertyType,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, field_type: PropertyType) -> Self {
        Self {
            name: name.into(),
            field_type,
        }
    }

    /// Check a value against the declared type.
    pub fn validate(&self, value: &PropertyValue) -> Result<(), String> {
        if self.field_type.matches(value) {
            Ok(())
        } else {
            Err(format!(
                "expected {}, found {}",
                self.field_type.type_name(),
                value.kind()
            ))
        }
    }
}

/// A named group of fields sharing a property prefix.
///
/// Properties are addressed as `prefix:field`, e.g. `dc:title`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub name: String,
    pub prefix: String,
    pub fields: Vec<FieldDef>,
}

impl Schema {
    pub fn new(name: impl Into<String>, prefix: impl Into<String>, fields: Vec<FieldDef>) -> Self {
        Self {
            name: name.into(),
            prefix: prefix.into(),
            fields,
        }
    }

    /// Get a field by its unprefixed name.
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Resolve a full xpath (`prefix:field`) to a field of this schema.
    pub fn resolve(&self, xpath: &str) -> Option<&FieldDef> {
        let (prefix, name) = split_xpath(xpath)?;
        if prefix != self.prefix {
            return None;
        }
        self.field(name)
    }

    pub fn xpath(&self, field: &str) -> String {
        format!("{}:{}", self.prefix, field)
    }

    /// Check the schema itself.
    pub fn validate(&self) -> Result<(), SchemaError> {
        if self.prefix.is_empty() || self.prefix.contains(':') {
            return Err(SchemaError::InvalidPrefix(self.prefix.clone()));
        }

        let mut seen = HashSet::new();
        for field in &self.fields {
            if !seen.insert(&field.name) {
                return Err(SchemaError::DuplicateField {
                    schema: self.name.clone(),
                    field: field.name.clone(),
                });
            }
        }
        Ok(())
    }
}

/// A document type: the schemas its documents carry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentType {
    pub name: String,
    pub schemas: Vec<String>,
    /// whether documents of this type may have children
    pub folderish: bool,
}

impl DocumentType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schemas: Vec::new(),
            folderish: false,
        }
    }

    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schemas.push(schema.into());
        self
    }

    pub fn folderish(mut self, folderish: bool) -> Self {
        self.folderish = folderish;
        self
    }

    pub fn has_schema(&self, name: &str) -> bool {
        self.schemas.iter().any(|s| s == name)
    }
}

/// split `prefix:field`
pub(crate) fn split_xpath(xpath: &str) -> Option<(&str, &str)> {
    let (prefix, name) = xpath.split_once(':')?;
    if prefix.is_empty() || name.is_empty() {
        return None;
    }
    Some((prefix, name))
}

/// Schema-related errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SchemaError {
    #[error("unknown document type: {0}")]
    UnknownType(String),

    #[error("unknown schema: {0}")]
    UnknownSchema(String),

    #[error("property {xpath} is not defined for type {doc_type}")]
    UnknownProperty { doc_type: String, xpath: String },

    #[error("type mismatch for {xpath}: {reason}")]
    TypeMismatch { xpath: String, reason: String },

    #[error("duplicate field {field} in schema {schema}")]
    DuplicateField { schema: String, field: String },

    #[error("invalid schema prefix: {0:?}")]
    InvalidPrefix(String),

    #[error("schema prefix {0} is already registered")]
    DuplicatePrefix(String),

    #[error("document type {0} is not folderish")]
    NotFolderish(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_schema() -> Schema {
        Schema::new(
            "dublincore",
            "dc",
            vec![
                FieldDef::new("title", PropertyType::String),
                FieldDef::new("subjects", PropertyType::list_of(PropertyType::String)),
            ],
        )
    }

    #[test]
    fn test_resolve_xpath() {
        let schema = sample_schema();
        assert_eq!(schema.resolve("dc:title").map(|f| &f.name), Some(&"title".to_string()));
        assert!(schema.resolve("file:title").is_none());
        assert!(schema.resolve("title").is_none());
        assert_eq!(schema.xpath("title"), "dc:title");
    }

    #[test]
    fn test_duplicate_field() {
        let schema = Schema::new(
            "bad",
            "bad",
            vec![
                FieldDef::new("a", PropertyType::String),
                FieldDef::new("a", PropertyType::Long),
            ],
        );
        assert!(matches!(schema.validate(), Err(SchemaError::DuplicateField { .. })));
    }

    #[test]
    fn test_field_validation() {
        let field = FieldDef::new("title", PropertyType::String);
        assert!(field.validate(&"x".into()).is_ok());
        let err = field.validate(&PropertyValue::Boolean(true)).unwrap_err();
        assert_eq!(err, "expected string, found boolean");
    }

    #[test]
    fn test_document_type_builder() {
        let ty = DocumentType::new("Folder").schema("dublincore").folderish(true);
        assert!(ty.folderish);
        assert!(ty.has_schema("dublincore"));
        assert!(!ty.has_schema("file"));
    }
}

//! Registry of schemas and document types.

use std::collections::BTreeMap;

use serde_json::Value;

use super::schema::{split_xpath, DocumentType, FieldDef, Schema, SchemaError};
use super::types::{PropertyType, PropertyValue};

pub const ROOT_TYPE: &str = "Root";
pub const FOLDER_TYPE: &str = "Folder";
pub const WORKSPACE_TYPE: &str = "Workspace";
pub const FILE_TYPE: &str = "File";
pub const NOTE_TYPE: &str = "Note";

/// Known schemas and document types of one repository.
///
/// Filled at startup, then shared read-only.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: BTreeMap<String, Schema>,
    types: BTreeMap<String, DocumentType>,
}

impl SchemaRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry with the built-in schemas and types.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for schema in builtin_schemas() {
            registry.schemas.insert(schema.name.clone(), schema);
        }
        for ty in builtin_types() {
            registry.types.insert(ty.name.clone(), ty);
        }
        registry
    }

    pub fn register_schema(&mut self, schema: Schema) -> Result<(), SchemaError> {
        schema.validate()?;
        let clash = self
            .schemas
            .values()
            .any(|s| s.prefix == schema.prefix && s.name != schema.name);
        if clash {
            return Err(SchemaError::DuplicatePrefix(schema.prefix));
        }
        self.schemas.insert(schema.name.clone(), schema);
        Ok(())
    }

    /// Register a document type; its schemas must be registered first.
    pub fn register_type(&mut self, ty: DocumentType) -> Result<(), SchemaError> {
        if let Some(missing) = ty.schemas.iter().find(|s| !self.schemas.contains_key(*s)) {
            return Err(SchemaError::UnknownSchema(missing.clone()));
        }
        self.types.insert(ty.name.clone(), ty);
        Ok(())
    }

    pub fn get_type(&self, name: &str) -> Result<&DocumentType, SchemaError> {
        self.types
            .get(name)
            .ok_or_else(|| SchemaError::UnknownType(name.to_string()))
    }

    pub fn get_schema(&self, name: &str) -> Result<&Schema, SchemaError> {
        self.schemas
            .get(name)
            .ok_or_else(|| SchemaError::UnknownSchema(name.to_string()))
    }

    pub fn type_names(&self) -> Vec<&str> {
        self.types.keys().map(String::as_str).collect()
    }

    /// Schemas carried by a document type, in declaration order.
    pub fn schemas_for(&self, doc_type: &str) -> Result<Vec<&Schema>, SchemaError> {
        self.get_type(doc_type)?
            .schemas
            .iter()
            .map(|name| self.get_schema(name))
            .collect()
    }

    /// Fail unless documents of this type may hold children.
    pub fn check_folderish(&self, doc_type: &str) -> Result<(), SchemaError> {
        if self.get_type(doc_type)?.folderish {
            Ok(())
        } else {
            Err(SchemaError::NotFolderish(doc_type.to_string()))
        }
    }

    /// Find the field an xpath names for a document type.
    pub fn field_for(&self, doc_type: &str, xpath: &str) -> Result<&FieldDef, SchemaError> {
        let unknown = || SchemaError::UnknownProperty {
            doc_type: doc_type.to_string(),
            xpath: xpath.to_string(),
        };
        let (prefix, _) = split_xpath(xpath).ok_or_else(unknown)?;

        self.schemas_for(doc_type)?
            .into_iter()
            .filter(|schema| schema.prefix == prefix)
            .find_map(|schema| schema.resolve(xpath))
            .ok_or_else(unknown)
    }

    pub fn validate_property(
        &self,
        doc_type: &str,
        xpath: &str,
        value: &PropertyValue,
    ) -> Result<(), SchemaError> {
        self.field_for(doc_type, xpath)?
            .validate(value)
            .map_err(|reason| SchemaError::TypeMismatch {
                xpath: xpath.to_string(),
                reason,
            })
    }

    /// Validate a whole property map for a document type.
    pub fn validate_properties(
        &self,
        doc_type: &str,
        properties: &BTreeMap<String, PropertyValue>,
    ) -> Result<(), SchemaError> {
        for (xpath, value) in properties {
            self.validate_property(doc_type, xpath, value)?;
        }
        Ok(())
    }

    /// Decode a stored property.
    ///
    /// Uses the declared field type when there is one; values that no
    /// longer match their schema are decoded by shape instead of failing.
    pub fn decode(&self, doc_type: &str, xpath: &str, value: &Value) -> PropertyValue {
        self.field_for(doc_type, xpath)
            .ok()
            .and_then(|field| PropertyValue::from_json(value, &field.field_type))
            .unwrap_or_else(|| PropertyValue::from_json_untyped(value))
    }

    /// Decode every stored property of a record.
    pub fn decode_all(
        &self,
        doc_type: &str,
        stored: &BTreeMap<String, Value>,
    ) -> BTreeMap<String, PropertyValue> {
        stored
            .iter()
            .map(|(xpath, value)| (xpath.clone(), self.decode(doc_type, xpath, value)))
            .collect()
    }
}

fn builtin_schemas() -> Vec<Schema> {
    vec![
        Schema::new(
            "dublincore",
            "dc",
            vec![
                FieldDef::new("title", PropertyType::String),
                FieldDef::new("description", PropertyType::String),
                FieldDef::new("creator", PropertyType::String),
                FieldDef::new("contributors", PropertyType::list_of(PropertyType::String)),
                FieldDef::new("created", PropertyType::Date),
                FieldDef::new("modified", PropertyType::Date),
                FieldDef::new("subjects", PropertyType::list_of(PropertyType::String)),
                FieldDef::new("language", PropertyType::String),
            ],
        ),
        Schema::new(
            "file",
            "file",
            vec![
                FieldDef::new("content", PropertyType::Binary),
                FieldDef::new("filename", PropertyType::String),
            ],
        ),
        Schema::new(
            "note",
            "note",
            vec![
                FieldDef::new("note", PropertyType::String),
                FieldDef::new("mime_type", PropertyType::String),
            ],
        ),
    ]
}

fn builtin_types() -> Vec<DocumentType> {
    vec![
        DocumentType::new(ROOT_TYPE).folderish(true),
        DocumentType::new(FOLDER_TYPE).schema("dublincore").folderish(true),
        DocumentType::new(WORKSPACE_TYPE).schema("dublincore").folderish(true),
        DocumentType::new(FILE_TYPE).schema("dublincore").schema("file"),
        DocumentType::new(NOTE_TYPE).schema("dublincore").schema("note"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builtin_types() {
        let registry = SchemaRegistry::builtin();
        assert_eq!(
            registry.type_names(),
            vec!["File", "Folder", "Note", "Root", "Workspace"]
        );
        assert!(registry.check_folderish("Folder").is_ok());
        assert!(matches!(
            registry.check_folderish("File"),
            Err(SchemaError::NotFolderish(_))
        ));
        assert!(matches!(registry.get_type("Picture"), Err(SchemaError::UnknownType(_))));
    }

    #[test]
    fn test_validate_properties() {
        let registry = SchemaRegistry::builtin();
        let mut props = BTreeMap::new();
        props.insert("dc:title".to_string(), PropertyValue::from("Report"));
        props.insert("note:note".to_string(), PropertyValue::from("<p>hi</p>"));
        assert!(registry.validate_properties("Note", &props).is_ok());

        // file schema is not part of Note
        props.insert("file:filename".to_string(), PropertyValue::from("a.txt"));
        assert!(matches!(
            registry.validate_properties("Note", &props),
            Err(SchemaError::UnknownProperty { .. })
        ));
    }

    #[test]
    fn test_type_mismatch() {
        let registry = SchemaRegistry::builtin();
        let result = registry.validate_property("Folder", "dc:title", &PropertyValue::Long(3));
        assert!(matches!(result, Err(SchemaError::TypeMismatch { .. })));
        assert!(registry.validate_property("Folder", "title", &"x".into()).is_err());
    }

    #[test]
    fn test_decode_uses_field_type() {
        let registry = SchemaRegistry::builtin();
        let date = registry.decode("File", "dc:created", &json!("2024-01-01T00:00:00Z"));
        assert!(matches!(date, PropertyValue::Date(_)));

        // unknown property falls back to shape
        let other = registry.decode("File", "x:y", &json!("2024-01-01T00:00:00Z"));
        assert!(matches!(other, PropertyValue::String(_)));
    }

    #[test]
    fn test_register_custom_type() {
        let mut registry = SchemaRegistry::builtin();
        assert!(matches!(
            registry.register_type(DocumentType::new("Picture").schema("picture")),
            Err(SchemaError::UnknownSchema(_))
        ));

        registry
            .register_schema(Schema::new(
                "picture",
                "pic",
                vec![FieldDef::new("width", PropertyType::Integer)],
            ))
            .unwrap();
        registry
            .register_type(DocumentType::new("Picture").schema("dublincore").schema("picture"))
            .unwrap();
        assert!(registry
            .validate_property("Picture", "pic:width", &PropertyValue::Integer(640))
            .is_ok());

        assert!(matches!(
            registry.register_schema(Schema::new("other", "dc", vec![])),
            Err(SchemaError::DuplicatePrefix(_))
        ));
    }
}

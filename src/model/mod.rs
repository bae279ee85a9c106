//! Document model: typed properties, schemas and document types.
//!
//! Schemas group prefixed fields (`dc:title`), document types list the
//! schemas their documents carry. The [`SchemaRegistry`] validates
//! property maps before anything reaches the backend.

pub mod acl;
mod document;
mod registry;
mod schema;
mod types;

pub use document::DocumentModel;
pub use registry::{SchemaRegistry, FILE_TYPE, FOLDER_TYPE, NOTE_TYPE, ROOT_TYPE, WORKSPACE_TYPE};
pub use schema::{DocumentType, FieldDef, Schema, SchemaError};
pub use types::{PropertyType, PropertyValue};

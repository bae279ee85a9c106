//! Property types and values for document schemas.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

use crate::binary::BinaryRef;

/// Types a schema field can declare.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyType {
    String,
    /// 32-bit signed integer.
    Integer,
    /// 64-bit signed integer.
    Long,
    Double,
    Boolean,
    /// UTC timestamp, stored as RFC 3339.
    Date,
    /// Reference into the binary store.
    Binary,
    /// Homogeneous list.
    List(Box<PropertyType>),
    /// String-keyed map of arbitrary values.
    Complex,
}

impl PropertyType {
    pub fn list_of(item: PropertyType) -> Self {
        PropertyType::List(Box::new(item))
    }

    /// Check if a value matches this type.
    pub fn matches(&self, value: &PropertyValue) -> bool {
        match (self, value) {
            (PropertyType::String, PropertyValue::String(_)) => true,
            (PropertyType::Integer, PropertyValue::Integer(_)) => true,
            // an i32 always fits in a long
            (PropertyType::Long, PropertyValue::Long(_) | PropertyValue::Integer(_)) => true,
            (PropertyType::Double, PropertyValue::Double(_)) => true,
            (PropertyType::Boolean, PropertyValue::Boolean(_)) => true,
            (PropertyType::Date, PropertyValue::Date(_)) => true,
            (PropertyType::Binary, PropertyValue::Binary(_)) => true,
            (PropertyType::List(item), PropertyValue::List(values)) => {
                values.iter().all(|v| item.matches(v))
            }
            (PropertyType::Complex, PropertyValue::Complex(_)) => true,
            _ => false,
        }
    }

    pub fn type_name(&self) -> String {
        match self {
            PropertyType::String => "string".to_string(),
            PropertyType::Integer => "integer".to_string(),
            PropertyType::Long => "long".to_string(),
            PropertyType::Double => "double".to_string(),
            PropertyType::Boolean => "boolean".to_string(),
            PropertyType::Date => "date".to_string(),
            PropertyType::Binary => "binary".to_string(),
            PropertyType::List(item) => format!("list<{}>", item.type_name()),
            PropertyType::Complex => "complex".to_string(),
        }
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.type_name())
    }
}

/// A document property value.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    String(String),
    Integer(i32),
    Long(i64),
    Double(f64),
    Boolean(bool),
    Date(DateTime<Utc>),
    Binary(BinaryRef),
    List(Vec<PropertyValue>),
    Complex(BTreeMap<String, PropertyValue>),
}

impl PropertyValue {
    pub fn kind(&self) -> &'static str {
        match self {
            PropertyValue::String(_) => "string",
            PropertyValue::Integer(_) => "integer",
            PropertyValue::Long(_) => "long",
            PropertyValue::Double(_) => "double",
            PropertyValue::Boolean(_) => "boolean",
            PropertyValue::Date(_) => "date",
            PropertyValue::Binary(_) => "binary",
            PropertyValue::List(_) => "list",
            PropertyValue::Complex(_) => "complex",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PropertyValue::Integer(i) => Some(i64::from(*i)),
            PropertyValue::Long(l) => Some(*l),
            _ => None,
        }
    }

    pub fn as_binary(&self) -> Option<&BinaryRef> {
        match self {
            PropertyValue::Binary(b) => Some(b),
            _ => None,
        }
    }

    /// Encode for storage.
    pub fn to_json(&self) -> Value {
        match self {
            PropertyValue::String(s) => Value::String(s.clone()),
            PropertyValue::Integer(i) => Value::Number((*i).into()),
            PropertyValue::Long(l) => Value::Number((*l).into()),
            PropertyValue::Double(d) => Number::from_f64(*d).map(Value::Number).unwrap_or(Value::Null),
            PropertyValue::Boolean(b) => Value::Bool(*b),
            PropertyValue::Date(d) => Value::String(d.to_rfc3339()),
            PropertyValue::Binary(b) => serde_json::to_value(b).unwrap_or(Value::Null),
            PropertyValue::List(items) => Value::Array(items.iter().map(|v| v.to_json()).collect()),
            PropertyValue::Complex(map) => {
                Value::Object(map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect())
            }
        }
    }

    /// Decode a stored value using the declared field type.
    ///
    /// Returns `None` when the stored JSON does not fit the type.
    pub fn from_json(value: &Value, ty: &PropertyType) -> Option<PropertyValue> {
        match (ty, value) {
            (PropertyType::String, Value::String(s)) => Some(PropertyValue::String(s.clone())),
            (PropertyType::Integer, Value::Number(n)) => n
                .as_i64()
                .and_then(|i| i32::try_from(i).ok())
                .map(PropertyValue::Integer),
            (PropertyType::Long, Value::Number(n)) => n.as_i64().map(PropertyValue::Long),
            (PropertyType::Double, Value::Number(n)) => n.as_f64().map(PropertyValue::Double),
            (PropertyType::Boolean, Value::Bool(b)) => Some(PropertyValue::Boolean(*b)),
            (PropertyType::Date, Value::String(s)) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|d| PropertyValue::Date(d.with_timezone(&Utc))),
            (PropertyType::Binary, Value::Object(_)) => serde_json::from_value(value.clone())
                .ok()
                .map(PropertyValue::Binary),
            (PropertyType::List(item), Value::Array(items)) => items
                .iter()
                .map(|v| PropertyValue::from_json(v, item))
                .collect::<Option<Vec<_>>>()
                .map(PropertyValue::List),
            (PropertyType::Complex, Value::Object(_)) => Some(PropertyValue::from_json_untyped(value)),
            _ => None,
        }
    }

    /// Decode a stored value with no declared type, by JSON shape.
    pub fn from_json_untyped(value: &Value) -> PropertyValue {
        match value {
            Value::Null => PropertyValue::Complex(BTreeMap::new()),
            Value::Bool(b) => PropertyValue::Boolean(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => PropertyValue::Long(i),
                None => PropertyValue::Double(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => PropertyValue::String(s.clone()),
            Value::Array(items) => {
                PropertyValue::List(items.iter().map(PropertyValue::from_json_untyped).collect())
            }
            Value::Object(map) => PropertyValue::Complex(
                map.iter()
                    .map(|(k, v)| (k.clone(), PropertyValue::from_json_untyped(v)))
                    .collect(),
            ),
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        PropertyValue::String(s.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(s: String) -> Self {
        PropertyValue::String(s)
    }
}

impl From<i32> for PropertyValue {
    fn from(i: i32) -> Self {
        PropertyValue::Integer(i)
    }
}

impl From<i64> for PropertyValue {
    fn from(l: i64) -> Self {
        PropertyValue::Long(l)
    }
}

impl From<bool> for PropertyValue {
    fn from(b: bool) -> Self {
        PropertyValue::Boolean(b)
    }
}

impl From<DateTime<Utc>> for PropertyValue {
    fn from(d: DateTime<Utc>) -> Self {
        PropertyValue::Date(d)
    }
}

impl From<BinaryRef> for PropertyValue {
    fn from(b: BinaryRef) -> Self {
        PropertyValue::Binary(b)
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::String(s) => write!(f, "{}", s),
            PropertyValue::Integer(i) => write!(f, "{}", i),
            PropertyValue::Long(l) => write!(f, "{}", l),
            PropertyValue::Double(d) => write!(f, "{}", d),
            PropertyValue::Boolean(b) => write!(f, "{}", b),
            PropertyValue::Date(d) => write!(f, "{}", d.to_rfc3339()),
            PropertyValue::Binary(b) => write!(f, "binary:{} ({} bytes)", b.digest, b.length),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

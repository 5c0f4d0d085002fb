//! Structural description of a contract's output shape.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

/// A named field inside an object shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    /// Field name.
    pub name: String,
    /// The field's shape.
    pub shape: Shape,
    /// Opaque fields travel as a structured attachment and are never
    /// interpolated into prompt text.
    pub opaque: bool,
}

impl FieldDef {
    /// A regular (inline-renderable) field.
    pub fn new(name: impl Into<String>, shape: Shape) -> Self {
        Self {
            name: name.into(),
            shape,
            opaque: false,
        }
    }

    /// An opaque field.
    pub fn opaque(name: impl Into<String>, shape: Shape) -> Self {
        Self {
            name: name.into(),
            shape,
            opaque: true,
        }
    }
}

/// Closed structural description of an output shape.
///
/// Contracts are built from these: objects with named typed fields, lists,
/// enums over a closed literal set, optional-of-T, nested shapes, and
/// primitive string/numeric/bytes/temporal leaves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Shape {
    /// UTF-8 string.
    String,
    /// Integer.
    Integer,
    /// Floating-point number.
    Number,
    /// Boolean.
    Boolean,
    /// Binary data, carried base64-encoded.
    Bytes,
    /// Calendar date.
    Date,
    /// Date and time.
    DateTime,
    /// One of a closed set of string literals.
    Enum(Vec<String>),
    /// Homogeneous list.
    List(Box<Shape>),
    /// Present-or-null.
    Optional(Box<Shape>),
    /// Object with named typed fields.
    Object(Vec<FieldDef>),
}

impl Shape {
    /// Convenience constructor for an object shape.
    pub fn object(fields: Vec<FieldDef>) -> Self {
        Self::Object(fields)
    }

    /// Convenience constructor for a list shape.
    pub fn list(item: Shape) -> Self {
        Self::List(Box::new(item))
    }

    /// Convenience constructor for an optional shape.
    pub fn optional(inner: Shape) -> Self {
        Self::Optional(Box::new(inner))
    }

    /// Whether this shape is an object at the top level. Non-object shapes
    /// are wrapped as `{value: T}` for the structured-output channel.
    pub fn is_object(&self) -> bool {
        matches!(self, Self::Object(_))
    }

    /// Names of top-level fields tagged opaque. Empty for non-objects.
    pub fn opaque_fields(&self) -> BTreeSet<String> {
        match self {
            Self::Object(fields) => fields
                .iter()
                .filter(|f| f.opaque)
                .map(|f| f.name.clone())
                .collect(),
            _ => BTreeSet::new(),
        }
    }

    /// Render this shape as a JSON Schema value.
    pub fn to_json_schema(&self) -> Value {
        match self {
            Self::String => json!({"type": "string"}),
            Self::Integer => json!({"type": "integer"}),
            Self::Number => json!({"type": "number"}),
            Self::Boolean => json!({"type": "boolean"}),
            Self::Bytes => json!({"type": "string", "contentEncoding": "base64"}),
            Self::Date => json!({"type": "string", "format": "date"}),
            Self::DateTime => json!({"type": "string", "format": "date-time"}),
            Self::Enum(values) => json!({"enum": values}),
            Self::List(item) => json!({"type": "array", "items": item.to_json_schema()}),
            Self::Optional(inner) => {
                json!({"anyOf": [inner.to_json_schema(), {"type": "null"}]})
            }
            Self::Object(fields) => {
                let mut properties = serde_json::Map::new();
                let mut required = Vec::new();
                for field in fields {
                    properties.insert(field.name.clone(), field.shape.to_json_schema());
                    if !matches!(field.shape, Self::Optional(_)) {
                        required.push(Value::String(field.name.clone()));
                    }
                }
                json!({
                    "type": "object",
                    "properties": properties,
                    "required": required,
                })
            }
        }
    }
}

/// First 12 hex characters of SHA-256 over the canonical JSON rendering of
/// a schema. serde_json orders object keys, so `to_string` of a `Value` is
/// already canonical (sorted keys, no whitespace).
pub fn content_hash(schema: &Value) -> String {
    let canonical = schema.to_string();
    let digest = Sha256::digest(canonical.as_bytes());
    hex::encode(digest)[..12].to_string()
}

//! Target output shapes.
//!
//! A completion request names the shape its result must have: either plain
//! text or a [`Schema`] describing a JSON object. Shapes can describe
//! themselves to other schema systems through [`DescribeShape`], which is how
//! the override client and the JSON-mode prompt both learn what to ask for.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::{LlmError, Result};

/// Schema systems a shape can be described to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaDialect {
    /// JSON Schema, as accepted by OpenAI-style `response_format: json_schema`.
    JsonSchema,
    /// Natural-language instructions appended to a system prompt.
    PromptInstructions,
}

/// A shape rendered for a particular [`SchemaDialect`].
#[derive(Debug, Clone, PartialEq)]
pub enum ExternalSchema {
    /// Named JSON Schema document.
    JsonSchema {
        /// Schema name (`json_schema.name`).
        name: String,
        /// The schema itself.
        schema: Value,
    },
    /// Prompt text. Empty when the shape needs no instructions.
    Instructions(String),
}

/// Capability: describe this shape to another schema system.
pub trait DescribeShape {
    /// Render the shape for `dialect`.
    fn describe_for(&self, dialect: SchemaDialect) -> ExternalSchema;
}

/// Field name used when plain text travels through a JSON-only channel.
pub const TEXT_FIELD: &str = "text";

/// The plain-text shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlainText;

impl DescribeShape for PlainText {
    fn describe_for(&self, dialect: SchemaDialect) -> ExternalSchema {
        match dialect {
            SchemaDialect::JsonSchema => ExternalSchema::JsonSchema {
                name: "ResponseModel".to_string(),
                schema: json!({
                    "type": "object",
                    "properties": { "text": { "type": "string" } },
                    "required": [TEXT_FIELD],
                    "additionalProperties": false,
                }),
            },
            SchemaDialect::PromptInstructions => ExternalSchema::Instructions(String::new()),
        }
    }
}

/// Kind of a schema field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldKind {
    /// JSON string.
    String,
    /// JSON integer.
    Integer,
    /// Any JSON number.
    Number,
    /// JSON boolean.
    Boolean,
    /// String restricted to a fixed set of values.
    Enum {
        /// Allowed values.
        values: Vec<String>,
    },
    /// Homogeneous array.
    List {
        /// Item kind.
        items: Box<FieldKind>,
    },
    /// Nested object.
    Object {
        /// Nested schema.
        schema: Schema,
    },
}

impl FieldKind {
    fn to_json_schema(&self) -> Value {
        match self {
            Self::String => json!({ "type": "string" }),
            Self::Integer => json!({ "type": "integer" }),
            Self::Number => json!({ "type": "number" }),
            Self::Boolean => json!({ "type": "boolean" }),
            Self::Enum { values } => json!({ "type": "string", "enum": values }),
            Self::List { items } => json!({ "type": "array", "items": items.to_json_schema() }),
            Self::Object { schema } => schema.to_json_schema(),
        }
    }

    fn label(&self) -> String {
        match self {
            Self::String => "string".into(),
            Self::Integer => "integer".into(),
            Self::Number => "number".into(),
            Self::Boolean => "boolean".into(),
            Self::Enum { values } => format!("one of [{}]", values.join(", ")),
            Self::List { items } => format!("list of {}", items.label()),
            Self::Object { schema } => format!("object {}", schema.name),
        }
    }

    fn validate(&self, value: &Value, path: &str, errors: &mut Vec<String>) {
        match (self, value) {
            (Self::String, Value::String(_)) | (Self::Boolean, Value::Bool(_)) => {}
            (Self::Number, Value::Number(_)) => {}
            (Self::Integer, Value::Number(n)) if n.is_i64() || n.is_u64() => {}
            (Self::Enum { values }, Value::String(s)) => {
                if !values.iter().any(|v| v == s) {
                    errors.push(format!("{path}: '{s}' is not one of [{}]", values.join(", ")));
                }
            }
            (Self::List { items }, Value::Array(arr)) => {
                for (i, item) in arr.iter().enumerate() {
                    items.validate(item, &format!("{path}[{i}]"), errors);
                }
            }
            (Self::Object { schema }, Value::Object(obj)) => schema.validate_object(obj, path, errors),
            (kind, other) => errors.push(format!(
                "{path}: expected {}, got {}",
                kind.label(),
                json_type_name(other)
            )),
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// One field of a [`Schema`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    /// JSON property name.
    pub name: String,
    /// Value kind.
    #[serde(flatten)]
    pub kind: FieldKind,
    /// Guidance for the model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Whether the property must be present (and non-null).
    #[serde(default = "default_true")]
    pub required: bool,
}

fn default_true() -> bool {
    true
}

impl Field {
    /// A required field.
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            description: None,
            required: true,
        }
    }

    /// Attach a description.
    #[must_use]
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Mark the field optional.
    #[must_use]
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

/// Descriptor of a structured (JSON object) output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    /// Type name, e.g. `MemoryItem`.
    pub name: String,
    /// What the object represents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Object properties.
    #[serde(default)]
    pub fields: Vec<Field>,
}

impl Schema {
    /// An empty object schema.
    pub fn object(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            fields: Vec::new(),
        }
    }

    /// Attach a description.
    #[must_use]
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Add a field.
    #[must_use]
    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    /// JSON Schema document for this object.
    ///
    /// Optional fields are still listed in `required` but accept `null`, which
    /// is what strict structured-output endpoints expect.
    #[must_use]
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for field in &self.fields {
            let mut prop = field.kind.to_json_schema();
            if !field.required {
                if let Some(ty) = prop.get("type").cloned() {
                    prop["type"] = json!([ty, "null"]);
                }
            }
            if let Some(desc) = &field.description {
                prop["description"] = json!(desc);
            }
            properties.insert(field.name.clone(), prop);
            required.push(field.name.clone());
        }
        let mut schema = json!({
            "type": "object",
            "title": self.name,
            "properties": properties,
            "required": required,
            "additionalProperties": false,
        });
        if let Some(desc) = &self.description {
            schema["description"] = json!(desc);
        }
        schema
    }

    /// Check `value` against this schema.
    ///
    /// # Errors
    /// Returns `LlmError::ContractViolation` listing every mismatch.
    pub fn validate(&self, value: &Value) -> Result<()> {
        let mut errors = Vec::new();
        match value {
            Value::Object(obj) => self.validate_object(obj, "$", &mut errors),
            other => errors.push(format!("$: expected object {}, got {}", self.name, json_type_name(other))),
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(LlmError::ContractViolation(errors.join("; ")))
        }
    }

    fn validate_object(&self, obj: &Map<String, Value>, path: &str, errors: &mut Vec<String>) {
        for field in &self.fields {
            let field_path = format!("{path}.{}", field.name);
            match obj.get(&field.name) {
                None | Some(Value::Null) if field.required => {
                    errors.push(format!("{field_path}: missing required field"));
                }
                None | Some(Value::Null) => {}
                Some(value) => field.kind.validate(value, &field_path, errors),
            }
        }
    }
}

impl DescribeShape for Schema {
    fn describe_for(&self, dialect: SchemaDialect) -> ExternalSchema {
        match dialect {
            SchemaDialect::JsonSchema => ExternalSchema::JsonSchema {
                name: self.name.clone(),
                schema: self.to_json_schema(),
            },
            SchemaDialect::PromptInstructions => {
                let schema = serde_json::to_string_pretty(&self.to_json_schema()).unwrap_or_default();
                ExternalSchema::Instructions(format!(
                    "Understand the content and provide the parsed object in JSON that matches \
                     the following json_schema:\n\n{schema}\n\nMake sure to return an instance of \
                     the JSON, not the schema itself."
                ))
            }
        }
    }
}

/// Expected output shape of a completion.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum TargetShape {
    /// Free text.
    #[default]
    PlainText,
    /// A JSON object matching the schema.
    Structured(Schema),
}

impl TargetShape {
    /// Whether this is the plain-text shape.
    #[must_use]
    pub fn is_plain_text(&self) -> bool {
        matches!(self, Self::PlainText)
    }

    /// Schema name used in logs and `json_schema.name`.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::PlainText => "text",
            Self::Structured(schema) => &schema.name,
        }
    }

    /// Validate a parsed JSON value against this shape.
    ///
    /// # Errors
    /// Returns `LlmError::ContractViolation` if the value does not conform.
    pub fn validate(&self, value: Value) -> Result<StructuredResult> {
        match self {
            Self::PlainText => match value {
                Value::String(s) => Ok(StructuredResult::Text(s)),
                Value::Object(mut obj) => match obj.remove(TEXT_FIELD) {
                    Some(Value::String(s)) => Ok(StructuredResult::Text(s)),
                    _ => Err(LlmError::ContractViolation(format!(
                        "expected an object with a string '{TEXT_FIELD}' field"
                    ))),
                },
                other => Err(LlmError::ContractViolation(format!(
                    "expected text, got {}",
                    json_type_name(&other)
                ))),
            },
            Self::Structured(schema) => {
                schema.validate(&value)?;
                Ok(StructuredResult::Object(value))
            }
        }
    }
}

impl DescribeShape for TargetShape {
    fn describe_for(&self, dialect: SchemaDialect) -> ExternalSchema {
        match self {
            Self::PlainText => PlainText.describe_for(dialect),
            Self::Structured(schema) => schema.describe_for(dialect),
        }
    }
}

impl From<Schema> for TargetShape {
    fn from(schema: Schema) -> Self {
        Self::Structured(schema)
    }
}

impl From<PlainText> for TargetShape {
    fn from(_: PlainText) -> Self {
        Self::PlainText
    }
}

/// A completion result that conforms to its request's [`TargetShape`].
#[derive(Debug, Clone, PartialEq)]
pub enum StructuredResult {
    /// Plain-text answer.
    Text(String),
    /// Validated JSON object.
    Object(Value),
}

impl StructuredResult {
    /// Borrow the text, if this is a plain-text result.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Object(_) => None,
        }
    }

    /// Take the text out of a plain-text result.
    ///
    /// # Errors
    /// Returns `LlmError::ContractViolation` for object results.
    pub fn into_text(self) -> Result<String> {
        match self {
            Self::Text(s) => Ok(s),
            Self::Object(_) => Err(LlmError::ContractViolation(
                "expected a text result, got an object".into(),
            )),
        }
    }

    /// Deserialize an object result into a concrete type.
    ///
    /// # Errors
    /// Returns `LlmError::ContractViolation` if the value does not fit `T`.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T> {
        let value = match self {
            Self::Text(s) => Value::String(s.clone()),
            Self::Object(v) => v.clone(),
        };
        serde_json::from_value(value).map_err(|e| LlmError::ContractViolation(e.to_string()))
    }
}

/// Pull a JSON object out of a model reply.
///
/// Accepts bare JSON, a fenced ```` ```json ```` block, or text surrounding a
/// single top-level object.
#[must_use]
pub fn extract_json(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return Some(trimmed);
    }
    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        let body_start = after.find('\n').map_or(0, |i| i + 1);
        let body = &after[body_start..];
        if let Some(end) = body.find("```") {
            let inner = body[..end].trim();
            if !inner.is_empty() {
                return Some(inner);
            }
        }
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

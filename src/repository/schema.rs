//! Declarative document schema.
//!
//! Describes the expected shape of a stored document and reports every
//! violation it finds rather than stopping at the first one.

use crate::core::{Document, Error, FieldError, Result};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    Any,
    String,
    Integer,
    Number,
    Boolean,
    Object(DocumentSchema),
    Array(Box<FieldType>),
}

impl FieldType {
    pub fn array_of(item: FieldType) -> Self {
        Self::Array(Box::new(item))
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Any => "any",
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Object(_) => "object",
            Self::Array(_) => "array",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub name: String,
    pub field_type: FieldType,
    pub required: bool,
    pub nullable: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSchema {
    fields: Vec<FieldDef>,
    allow_unknown: bool,
}

impl DocumentSchema {
    /// An empty schema that accepts any fields.
    pub fn new() -> Self {
        Self {
            fields: Vec::new(),
            allow_unknown: true,
        }
    }

    /// Adds a required, non-null field.
    pub fn field(self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.push(name.into(), field_type, true, false)
    }

    /// Adds a field that may be absent but not null.
    pub fn optional(self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.push(name.into(), field_type, false, false)
    }

    /// Adds a field that may be absent or null.
    pub fn nullable(self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.push(name.into(), field_type, false, true)
    }

    /// Rejects fields not declared in the schema.
    pub fn deny_unknown(mut self) -> Self {
        self.allow_unknown = false;
        self
    }

    fn push(mut self, name: String, field_type: FieldType, required: bool, nullable: bool) -> Self {
        self.fields.retain(|field| field.name != name);
        self.fields.push(FieldDef {
            name,
            field_type,
            required,
            nullable,
        });
        self
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn get(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|field| field.name == name)
    }

    /// Every violation in `doc`; empty when the document is valid.
    pub fn validate(&self, doc: &Document) -> Vec<FieldError> {
        let mut errors = Vec::new();
        self.check_object(doc, "", &mut errors);
        errors
    }

    fn check_object(&self, doc: &Map<String, Value>, prefix: &str, errors: &mut Vec<FieldError>) {
        for field in &self.fields {
            let path = join(prefix, &field.name);
            match doc.get(&field.name) {
                None if field.required => errors.push(FieldError::new(path, "is required")),
                None => {}
                Some(Value::Null) if field.nullable => {}
                Some(value) => check_value(&field.field_type, value, &path, errors),
            }
        }

        if !self.allow_unknown {
            for name in doc.keys() {
                if self.get(name).is_none() {
                    errors.push(FieldError::new(join(prefix, name), "is not allowed"));
                }
            }
        }
    }

    /// Builds a schema from a JSON Schema object definition.
    ///
    /// Supports `type` (string or array, with `"null"` marking nullable
    /// fields), `properties`, `required`, `items` and
    /// `additionalProperties: false`.
    pub fn from_json_schema(json_schema: &str) -> Result<Self> {
        let root: Value = serde_json::from_str(json_schema)
            .map_err(|err| Error::Config(format!("Invalid JSON schema: {}", err)))?;
        let obj = root
            .as_object()
            .ok_or_else(|| Error::Config("JSON schema root must be an object".to_string()))?;
        object_schema(obj)
    }
}

impl Default for DocumentSchema {
    fn default() -> Self {
        Self::new()
    }
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

fn check_value(expected: &FieldType, value: &Value, path: &str, errors: &mut Vec<FieldError>) {
    let ok = match (expected, value) {
        (FieldType::Any, _) => true,
        (FieldType::String, Value::String(_)) => true,
        (FieldType::Integer, Value::Number(n)) => n.is_i64() || n.is_u64(),
        (FieldType::Number, Value::Number(_)) => true,
        (FieldType::Boolean, Value::Bool(_)) => true,
        (FieldType::Object(schema), Value::Object(map)) => {
            schema.check_object(map, path, errors);
            true
        }
        (FieldType::Array(item), Value::Array(items)) => {
            for (i, element) in items.iter().enumerate() {
                check_value(item, element, &format!("{}[{}]", path, i), errors);
            }
            true
        }
        _ => false,
    };

    if !ok {
        errors.push(FieldError::new(
            path,
            format!("expected {}, found {}", expected.name(), json_type_name(value)),
        ));
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn object_schema(obj: &Map<String, Value>) -> Result<DocumentSchema> {
    let required: BTreeSet<&str> = obj
        .get("required")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let mut schema = DocumentSchema::new();
    if obj.get("additionalProperties") == Some(&Value::Bool(false)) {
        schema = schema.deny_unknown();
    }

    let Some(properties) = obj.get("properties") else {
        return Ok(schema);
    };
    let properties = properties
        .as_object()
        .ok_or_else(|| Error::Config("JSON schema 'properties' must be an object".to_string()))?;

    for (name, prop) in properties {
        let prop = prop.as_object().ok_or_else(|| {
            Error::Config(format!("Property '{}' in JSON schema must be an object", name))
        })?;
        let (field_type, nullable) = property_type(prop)?;
        schema = schema.push(name.clone(), field_type, required.contains(name.as_str()), nullable);
    }
    Ok(schema)
}

fn property_type(prop: &Map<String, Value>) -> Result<(FieldType, bool)> {
    let mut nullable = false;
    let type_name = match prop.get("type") {
        None => return Ok((FieldType::Any, false)),
        Some(Value::String(name)) => name.clone(),
        Some(Value::Array(names)) => {
            let mut chosen = None;
            for name in names.iter().filter_map(Value::as_str) {
                if name == "null" {
                    nullable = true;
                } else if chosen.is_none() {
                    chosen = Some(name.to_string());
                }
            }
            chosen.ok_or_else(|| {
                Error::Config("JSON schema type array must contain non-null type".to_string())
            })?
        }
        Some(_) => {
            return Err(Error::Config(
                "JSON schema 'type' must be string or array".to_string(),
            ));
        }
    };

    let field_type = match type_name.as_str() {
        "string" => FieldType::String,
        "integer" => FieldType::Integer,
        "number" => FieldType::Number,
        "boolean" => FieldType::Boolean,
        "object" => FieldType::Object(object_schema(prop)?),
        "array" => {
            let item = match prop.get("items").and_then(Value::as_object) {
                Some(items) => property_type(items)?.0,
                None => FieldType::Any,
            };
            FieldType::array_of(item)
        }
        other => {
            return Err(Error::Config(format!(
                "Unsupported JSON schema type '{}'",
                other
            )));
        }
    };
    Ok((field_type, nullable))
}

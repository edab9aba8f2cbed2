//! Schema validation for trigger payloads, step inputs, and step outputs.
//!
//! The engine only depends on the [`Schema`] trait. [`JsonTypeSchema`] is the
//! implementation the resolver builds from JSON Schema documents; it covers the
//! structural subset workflows use in practice:
//!
//! - `type` (a single type name or an array of names)
//! - `properties` (checked recursively for keys that are present)
//! - `required`
//! - `items` (a single schema applied to every array element)
//! - `enum`
//!
//! Keywords outside that subset are ignored rather than rejected.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;

use crate::error::{SchemaError, WorkflowError};

/// A validator for JSON values.
pub trait Schema: fmt::Debug + Send + Sync {
  fn validate(&self, value: &Value) -> Result<(), SchemaError>;

  /// JSON form of the schema, used when describing a workflow.
  fn to_json(&self) -> Value;
}

/// JSON Schema type names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaType {
  String,
  Number,
  Integer,
  Boolean,
  Null,
  Array,
  Object,
}

impl SchemaType {
  fn parse(name: &str) -> Option<Self> {
    match name {
      "string" => Some(SchemaType::String),
      "number" => Some(SchemaType::Number),
      "integer" => Some(SchemaType::Integer),
      "boolean" => Some(SchemaType::Boolean),
      "null" => Some(SchemaType::Null),
      "array" => Some(SchemaType::Array),
      "object" => Some(SchemaType::Object),
      _ => None,
    }
  }

  fn matches(self, value: &Value) -> bool {
    match self {
      SchemaType::String => value.is_string(),
      SchemaType::Number => value.is_number(),
      SchemaType::Integer => value.is_i64() || value.is_u64(),
      SchemaType::Boolean => value.is_boolean(),
      SchemaType::Null => value.is_null(),
      SchemaType::Array => value.is_array(),
      SchemaType::Object => value.is_object(),
    }
  }

  fn name(self) -> &'static str {
    match self {
      SchemaType::String => "string",
      SchemaType::Number => "number",
      SchemaType::Integer => "integer",
      SchemaType::Boolean => "boolean",
      SchemaType::Null => "null",
      SchemaType::Array => "array",
      SchemaType::Object => "object",
    }
  }
}

/// A compiled JSON Schema subset.
#[derive(Debug, Clone)]
pub struct JsonTypeSchema {
  raw: Value,
  types: Vec<SchemaType>,
  properties: BTreeMap<String, JsonTypeSchema>,
  required: Vec<String>,
  items: Option<Box<JsonTypeSchema>>,
  allowed: Option<Vec<Value>>,
}

impl JsonTypeSchema {
  /// Compile a JSON Schema document.
  ///
  /// `target` names what the schema guards and only appears in errors.
  pub fn compile(target: &str, raw: &Value) -> Result<Self, WorkflowError> {
    let invalid = |message: String| WorkflowError::InvalidSchema {
      target: target.to_string(),
      message,
    };

    let doc = raw
      .as_object()
      .ok_or_else(|| invalid("schema must be a JSON object".to_string()))?;

    let types = match doc.get("type") {
      None => Vec::new(),
      Some(Value::String(name)) => {
        vec![SchemaType::parse(name).ok_or_else(|| invalid(format!("unknown type '{}'", name)))?]
      }
      Some(Value::Array(names)) => names
        .iter()
        .map(|n| {
          n.as_str()
            .and_then(SchemaType::parse)
            .ok_or_else(|| invalid(format!("unknown type {}", n)))
        })
        .collect::<Result<_, _>>()?,
      Some(other) => return Err(invalid(format!("'type' must be a string or array, got {}", other))),
    };

    let mut properties = BTreeMap::new();
    if let Some(props) = doc.get("properties") {
      let props = props
        .as_object()
        .ok_or_else(|| invalid("'properties' must be an object".to_string()))?;
      for (name, prop) in props {
        let nested = format!("{}.{}", target, name);
        properties.insert(name.clone(), JsonTypeSchema::compile(&nested, prop)?);
      }
    }

    let required = match doc.get("required") {
      None => Vec::new(),
      Some(Value::Array(names)) => names
        .iter()
        .map(|n| {
          n.as_str()
            .map(str::to_string)
            .ok_or_else(|| invalid("'required' entries must be strings".to_string()))
        })
        .collect::<Result<_, _>>()?,
      Some(_) => return Err(invalid("'required' must be an array".to_string())),
    };

    let items = match doc.get("items") {
      None => None,
      Some(item) => Some(Box::new(JsonTypeSchema::compile(
        &format!("{}[]", target),
        item,
      )?)),
    };

    let allowed = match doc.get("enum") {
      None => None,
      Some(Value::Array(values)) => Some(values.clone()),
      Some(_) => return Err(invalid("'enum' must be an array".to_string())),
    };

    Ok(Self {
      raw: raw.clone(),
      types,
      properties,
      required,
      items,
      allowed,
    })
  }

  fn validate_at(&self, path: &str, value: &Value) -> Result<(), SchemaError> {
    if !self.types.is_empty() && !self.types.iter().any(|t| t.matches(value)) {
      let expected: Vec<&str> = self.types.iter().map(|t| t.name()).collect();
      return Err(SchemaError::new(
        display_path(path),
        format!("expected {}, got {}", expected.join(" or "), kind_of(value)),
      ));
    }

    if let Some(allowed) = &self.allowed {
      if !allowed.contains(value) {
        return Err(SchemaError::new(
          display_path(path),
          format!("{} is not one of the allowed values", value),
        ));
      }
    }

    if let Value::Object(map) = value {
      for key in &self.required {
        if !map.contains_key(key) {
          return Err(SchemaError::new(
            display_path(path),
            format!("missing required property '{}'", key),
          ));
        }
      }
      for (key, schema) in &self.properties {
        if let Some(child) = map.get(key) {
          schema.validate_at(&format!("{}/{}", path, key), child)?;
        }
      }
    }

    if let (Value::Array(elements), Some(items)) = (value, &self.items) {
      for (index, element) in elements.iter().enumerate() {
        items.validate_at(&format!("{}/{}", path, index), element)?;
      }
    }

    Ok(())
  }
}

impl Schema for JsonTypeSchema {
  fn validate(&self, value: &Value) -> Result<(), SchemaError> {
    self.validate_at("", value)
  }

  fn to_json(&self) -> Value {
    self.raw.clone()
  }
}

fn display_path(path: &str) -> String {
  if path.is_empty() {
    "/".to_string()
  } else {
    path.to_string()
  }
}

fn kind_of(value: &Value) -> &'static str {
  match value {
    Value::Null => "null",
    Value::Bool(_) => "boolean",
    Value::Number(_) => "number",
    Value::String(_) => "string",
    Value::Array(_) => "array",
    Value::Object(_) => "object",
  }
}

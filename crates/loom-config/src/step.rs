use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDef {
  pub step_id: String,
  #[serde(flatten)]
  pub kind: StepKindDef,
  /// JSON Schema the step's input must satisfy before it runs.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub input_schema: Option<serde_json::Value>,
  /// JSON Schema the step's output (or resume context) must satisfy.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub output_schema: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepKindDef {
  /// A step backed by a handler registered with the resolver.
  Standard {
    handler: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    config: serde_json::Value,
  },
  /// A step that forwards its input to an external tool.
  ExternalTool {
    tool_id: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    config: serde_json::Value,
  },
}

impl StepKindDef {
  pub fn config(&self) -> &serde_json::Value {
    match self {
      StepKindDef::Standard { config, .. } | StepKindDef::ExternalTool { config, .. } => config,
    }
  }
}

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::step::StepDef;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDef {
  pub name: String,
  /// Schema for the payload passed to `start`.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub trigger_schema: Option<serde_json::Value>,
  pub steps: Vec<StepDef>,
  /// Primary trigger path: each step runs after the one before it.
  #[serde(default)]
  pub path: Vec<String>,
  /// step_id -> steps that run once it has completed.
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub subscribers: BTreeMap<String, Vec<String>>,
}

impl WorkflowDef {
  /// Parse a definition from a JSON document.
  pub fn from_json(content: &str) -> Result<Self, serde_json::Error> {
    serde_json::from_str(content)
  }

  pub fn get_step(&self, step_id: &str) -> Option<&StepDef> {
    self.steps.iter().find(|s| s.step_id == step_id)
  }
}

//! Resolving workflow configuration into executable definitions.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use loom_config::WorkflowDef;
use loom_workflow::{
  Resolver, StepExecutor, StepFailure, StepInput, StepKind, StepOutcome, ToolCall, ToolExecutor,
  WorkflowError,
};
use serde_json::{Value, json};

struct Constant(Value);

#[async_trait]
impl StepExecutor for Constant {
  async fn execute(&self, _input: StepInput) -> Result<StepOutcome, StepFailure> {
    Ok(StepOutcome::Complete(self.0.clone()))
  }
}

struct Echo;

#[async_trait]
impl ToolExecutor for Echo {
  async fn call(&self, call: ToolCall) -> Result<Value, StepFailure> {
    Ok(call.args)
  }
}

fn resolver() -> Resolver {
  let mut resolver = Resolver::new();
  resolver
    .register_handler("constant", |config: &Value| {
      let value = config
        .get("value")
        .cloned()
        .ok_or_else(|| "missing 'value'".to_string())?;
      Ok(Arc::new(Constant(value)) as Arc<dyn StepExecutor>)
    })
    .register_tool("echo", Arc::new(Echo));
  resolver
}

fn parse(raw: Value) -> WorkflowDef {
  serde_json::from_value(raw).unwrap()
}

#[test]
fn test_resolve_simple_workflow() {
  let def = parse(json!({
    "name": "simple",
    "trigger_schema": { "type": "object" },
    "steps": [
      { "step_id": "a", "type": "standard", "handler": "constant", "config": { "value": 1 } },
      { "step_id": "b", "type": "external_tool", "tool_id": "echo" }
    ],
    "path": ["a", "b"]
  }));

  let workflow = resolver().resolve(def).unwrap();
  assert_eq!(workflow.name(), "simple");
  assert_eq!(workflow.graph().roots(), ["a"]);
  assert!(workflow.trigger_schema().is_some());
  assert!(matches!(
    workflow.get_step("b").unwrap().kind,
    StepKind::ExternalTool { .. }
  ));
}

#[tokio::test]
async fn test_resolved_step_executes_bound_handler() {
  let def = parse(json!({
    "name": "bound",
    "steps": [
      { "step_id": "a", "type": "standard", "handler": "constant", "config": { "value": "hi" } }
    ],
    "path": ["a"]
  }));

  let workflow = resolver().resolve(def).unwrap();
  let input = StepInput {
    run_id: "r".to_string(),
    step_id: "a".to_string(),
    trigger_data: json!({}),
    upstream: BTreeMap::new(),
    join: false,
  };
  let outcome = workflow.get_step("a").unwrap().execute(input).await.unwrap();
  assert_eq!(outcome, StepOutcome::Complete(json!("hi")));
}

#[test]
fn test_resolve_fails_on_missing_handler() {
  let def = parse(json!({
    "name": "missing",
    "steps": [{ "step_id": "a", "type": "standard", "handler": "nope" }],
    "path": ["a"]
  }));

  let err = resolver().resolve(def).unwrap_err();
  assert!(matches!(err, WorkflowError::HandlerNotFound { handler, .. } if handler == "nope"));
}

#[test]
fn test_resolve_fails_on_missing_tool() {
  let def = parse(json!({
    "name": "missing-tool",
    "steps": [{ "step_id": "a", "type": "external_tool", "tool_id": "ghost" }],
    "path": ["a"]
  }));

  let err = resolver().resolve(def).unwrap_err();
  assert!(matches!(err, WorkflowError::ToolNotFound { tool_id, .. } if tool_id == "ghost"));
}

#[test]
fn test_resolve_surfaces_handler_config_errors() {
  let def = parse(json!({
    "name": "bad-config",
    "steps": [{ "step_id": "a", "type": "standard", "handler": "constant" }],
    "path": ["a"]
  }));

  let err = resolver().resolve(def).unwrap_err();
  assert!(matches!(err, WorkflowError::HandlerConfig { message, .. } if message.contains("value")));
}

#[test]
fn test_resolve_fails_on_cycle() {
  let def = parse(json!({
    "name": "cyclic",
    "steps": [
      { "step_id": "a", "type": "external_tool", "tool_id": "echo" },
      { "step_id": "b", "type": "external_tool", "tool_id": "echo" }
    ],
    "path": ["a"],
    "subscribers": { "a": ["b"], "b": ["a"] }
  }));

  let err = resolver().resolve(def).unwrap_err();
  assert!(matches!(err, WorkflowError::CycleDetected { .. }));
}

#[test]
fn test_resolve_fails_on_duplicate_step_id() {
  let def = parse(json!({
    "name": "dup",
    "steps": [
      { "step_id": "a", "type": "external_tool", "tool_id": "echo" },
      { "step_id": "a", "type": "external_tool", "tool_id": "echo" }
    ],
    "path": ["a"]
  }));

  let err = resolver().resolve(def).unwrap_err();
  assert!(matches!(err, WorkflowError::DuplicateStep(id) if id == "a"));
}

#[test]
fn test_resolve_fails_on_unknown_graph_reference() {
  let def = parse(json!({
    "name": "dangling",
    "steps": [{ "step_id": "a", "type": "external_tool", "tool_id": "echo" }],
    "path": ["a", "b"]
  }));

  let err = resolver().resolve(def).unwrap_err();
  assert!(matches!(err, WorkflowError::UnknownStep(id) if id == "b"));
}

#[test]
fn test_resolve_fails_on_malformed_schema() {
  let def = parse(json!({
    "name": "bad-schema",
    "steps": [{
      "step_id": "a",
      "type": "external_tool",
      "tool_id": "echo",
      "input_schema": { "type": "decimal" }
    }],
    "path": ["a"]
  }));

  let err = resolver().resolve(def).unwrap_err();
  assert!(matches!(err, WorkflowError::InvalidSchema { target, .. } if target == "a.input"));
}

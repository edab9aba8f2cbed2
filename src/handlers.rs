//! Step handlers and tools built into the `loom` binary.

use std::sync::Arc;

use async_trait::async_trait;
use loom_workflow::{
  Resolver, StepExecutor, StepFailure, StepInput, StepOutcome, ToolCall, ToolExecutor,
};
use serde_json::{Map, Value};

/// Completes with the step's input payload.
struct Echo;

#[async_trait]
impl StepExecutor for Echo {
  async fn execute(&self, input: StepInput) -> Result<StepOutcome, StepFailure> {
    Ok(StepOutcome::Complete(input.payload()))
  }
}

/// Completes with `config.value`.
struct Constant {
  value: Value,
}

#[async_trait]
impl StepExecutor for Constant {
  async fn execute(&self, _input: StepInput) -> Result<StepOutcome, StepFailure> {
    Ok(StepOutcome::Complete(self.value.clone()))
  }
}

/// Suspends with the step's config as the resume payload.
struct Approval {
  request: Value,
}

#[async_trait]
impl StepExecutor for Approval {
  async fn execute(&self, _input: StepInput) -> Result<StepOutcome, StepFailure> {
    Ok(StepOutcome::Suspend(self.request.clone()))
  }
}

/// Fails with `config.reason`.
struct Fail {
  reason: String,
}

#[async_trait]
impl StepExecutor for Fail {
  async fn execute(&self, _input: StepInput) -> Result<StepOutcome, StepFailure> {
    Err(StepFailure::new(self.reason.clone()))
  }
}

/// Shallow-merges object values: upstream outputs for joins, then `config`.
struct Merge;

#[async_trait]
impl ToolExecutor for Merge {
  async fn call(&self, call: ToolCall) -> Result<Value, StepFailure> {
    let mut merged = Map::new();
    let sources = match &call.args {
      Value::Object(by_step) if by_step.values().all(Value::is_object) => {
        by_step.values().cloned().collect::<Vec<_>>()
      }
      other => vec![other.clone()],
    };

    for source in sources.into_iter().chain(std::iter::once(call.config)) {
      match source {
        Value::Object(fields) => merged.extend(fields),
        Value::Null => {}
        other => {
          return Err(StepFailure::new(format!(
            "merge expects objects, got {}",
            other
          )));
        }
      }
    }

    Ok(Value::Object(merged))
  }
}

/// A resolver with every built-in handler and tool registered.
pub fn builtin_resolver() -> Resolver {
  let mut resolver = Resolver::new();
  resolver
    .register_handler("echo", |_config: &Value| {
      Ok(Arc::new(Echo) as Arc<dyn StepExecutor>)
    })
    .register_handler("constant", |config: &Value| {
      let value = config
        .get("value")
        .cloned()
        .ok_or_else(|| "missing 'value'".to_string())?;
      Ok(Arc::new(Constant { value }) as Arc<dyn StepExecutor>)
    })
    .register_handler("approval", |config: &Value| {
      Ok(Arc::new(Approval {
        request: config.clone(),
      }) as Arc<dyn StepExecutor>)
    })
    .register_handler("fail", |config: &Value| {
      let reason = config
        .get("reason")
        .and_then(Value::as_str)
        .unwrap_or("step failed")
        .to_string();
      Ok(Arc::new(Fail { reason }) as Arc<dyn StepExecutor>)
    })
    .register_tool("merge", Arc::new(Merge));
  resolver
}

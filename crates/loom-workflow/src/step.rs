//! Steps and their execute capability.
//!
//! A [`Step`] is a closed set of kinds ([`StepKind`]) behind a single
//! [`Step::execute`] entry point. The kind is chosen when the workflow is
//! resolved, so the engine never inspects step shapes while a run is in flight.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::schema::Schema;

/// Everything a step receives when it is executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepInput {
  pub run_id: String,
  pub step_id: String,
  /// Payload the run was started with.
  pub trigger_data: Value,
  /// Context entries of the step's predecessors, keyed by step id.
  pub upstream: BTreeMap<String, Value>,
  /// The step waits on more than one predecessor.
  #[serde(default)]
  pub join: bool,
}

impl StepInput {
  /// The value a step operates on.
  ///
  /// - join steps get an object keyed by predecessor id
  /// - steps with one predecessor get that predecessor's output
  /// - root steps get the trigger data
  pub fn payload(&self) -> Value {
    if self.join {
      return Value::Object(
        self
          .upstream
          .iter()
          .map(|(k, v)| (k.clone(), v.clone()))
          .collect(),
      );
    }
    match self.upstream.values().next() {
      Some(output) => output.clone(),
      None => self.trigger_data.clone(),
    }
  }
}

/// Successful result of a step.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
  /// The step finished with an output value.
  Complete(Value),
  /// The step needs external input; the payload tells the resumer what is needed.
  Suspend(Value),
}

/// A step capability reported failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{reason}")]
pub struct StepFailure {
  pub reason: String,
}

impl StepFailure {
  pub fn new(reason: impl Into<String>) -> Self {
    Self {
      reason: reason.into(),
    }
  }
}

/// Business logic behind a standard step.
#[async_trait]
pub trait StepExecutor: Send + Sync {
  async fn execute(&self, input: StepInput) -> Result<StepOutcome, StepFailure>;
}

/// A call forwarded to an external tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
  pub tool_id: String,
  pub run_id: String,
  pub step_id: String,
  pub args: Value,
  pub config: Value,
}

/// A tool provider shared by every step that references it.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
  async fn call(&self, call: ToolCall) -> Result<Value, StepFailure>;
}

#[derive(Clone)]
pub enum StepKind {
  Standard {
    handler: String,
    executor: Arc<dyn StepExecutor>,
  },
  ExternalTool {
    tool_id: String,
    config: Value,
    tool: Arc<dyn ToolExecutor>,
  },
}

impl StepKind {
  pub fn name(&self) -> &'static str {
    match self {
      StepKind::Standard { .. } => "standard",
      StepKind::ExternalTool { .. } => "external_tool",
    }
  }
}

impl fmt::Debug for StepKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      StepKind::Standard { handler, .. } => f
        .debug_struct("Standard")
        .field("handler", handler)
        .finish_non_exhaustive(),
      StepKind::ExternalTool {
        tool_id, config, ..
      } => f
        .debug_struct("ExternalTool")
        .field("tool_id", tool_id)
        .field("config", config)
        .finish_non_exhaustive(),
    }
  }
}

/// A single unit of work in a workflow.
#[derive(Clone)]
pub struct Step {
  pub id: String,
  pub kind: StepKind,
  pub input_schema: Option<Arc<dyn Schema>>,
  pub output_schema: Option<Arc<dyn Schema>>,
}

impl Step {
  pub fn new(id: impl Into<String>, kind: StepKind) -> Self {
    Self {
      id: id.into(),
      kind,
      input_schema: None,
      output_schema: None,
    }
  }

  /// A standard step driven by an executor.
  pub fn standard(id: impl Into<String>, executor: Arc<dyn StepExecutor>) -> Self {
    let id = id.into();
    Self::new(
      id.clone(),
      StepKind::Standard {
        handler: id,
        executor,
      },
    )
  }

  pub fn with_input_schema(mut self, schema: Arc<dyn Schema>) -> Self {
    self.input_schema = Some(schema);
    self
  }

  pub fn with_output_schema(mut self, schema: Arc<dyn Schema>) -> Self {
    self.output_schema = Some(schema);
    self
  }

  pub async fn execute(&self, input: StepInput) -> Result<StepOutcome, StepFailure> {
    match &self.kind {
      StepKind::Standard { executor, .. } => executor.execute(input).await,
      StepKind::ExternalTool {
        tool_id,
        config,
        tool,
      } => {
        let call = ToolCall {
          tool_id: tool_id.clone(),
          run_id: input.run_id.clone(),
          step_id: input.step_id.clone(),
          args: input.payload(),
          config: config.clone(),
        };
        tool.call(call).await.map(StepOutcome::Complete)
      }
    }
  }
}

impl fmt::Debug for Step {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Step")
      .field("id", &self.id)
      .field("kind", &self.kind)
      .field("input_schema", &self.input_schema.as_ref().map(|s| s.to_json()))
      .field("output_schema", &self.output_schema.as_ref().map(|s| s.to_json()))
      .finish()
  }
}

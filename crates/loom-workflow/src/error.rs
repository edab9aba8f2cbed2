use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkflowError {
  #[error("cycle detected: step '{step_id}' transitively subscribes to itself")]
  CycleDetected { step_id: String },

  #[error("graph references unknown step: {0}")]
  UnknownStep(String),

  #[error("step '{0}' is not reachable from the step graph")]
  OrphanStep(String),

  #[error("duplicate step id: {0}")]
  DuplicateStep(String),

  #[error("no handler registered as '{handler}' (step '{step_id}')")]
  HandlerNotFound { step_id: String, handler: String },

  #[error("no tool registered as '{tool_id}' (step '{step_id}')")]
  ToolNotFound { step_id: String, tool_id: String },

  #[error("handler '{handler}' rejected config for step '{step_id}': {message}")]
  HandlerConfig {
    step_id: String,
    handler: String,
    message: String,
  },

  #[error("invalid schema for {target}: {message}")]
  InvalidSchema { target: String, message: String },
}

/// A value did not satisfy a schema.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("schema violation at '{path}': {message}")]
pub struct SchemaError {
  /// Location of the offending value, `/`-separated from the root.
  pub path: String,
  pub message: String,
}

impl SchemaError {
  pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
    Self {
      path: path.into(),
      message: message.into(),
    }
  }
}

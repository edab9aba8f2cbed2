//! Engine errors.

use loom_store::{RunStatus, StoreError};
use loom_workflow::SchemaError;

/// Errors reported synchronously to the caller of an engine operation.
///
/// Failures inside a dispatched run loop are not reported here; they end the
/// run in [`RunStatus::Failed`] with the reason in the final snapshot.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
  /// Trigger data or a resume payload did not satisfy its schema.
  #[error("validation failed for run '{run_id}': {source}")]
  Validation {
    run_id: String,
    #[source]
    source: SchemaError,
  },

  /// The operation is not allowed in the run's current status.
  #[error("invalid state for run '{run_id}' ({status}): {message}")]
  InvalidState {
    run_id: String,
    status: RunStatus,
    message: String,
  },

  #[error("workflow '{0}' not found")]
  WorkflowNotFound(String),

  #[error("workflow '{0}' is already registered")]
  DuplicateWorkflow(String),

  #[error("run '{run_id}' not found in workflow '{workflow_id}'")]
  RunNotFound { workflow_id: String, run_id: String },

  #[error("store error: {0}")]
  Store(#[from] StoreError),

  /// The run loop task ended abnormally.
  #[error("run loop terminated: {0}")]
  Join(String),
}

impl EngineError {
  pub(crate) fn invalid_state(
    run_id: impl Into<String>,
    status: RunStatus,
    message: impl Into<String>,
  ) -> Self {
    EngineError::InvalidState {
      run_id: run_id.into(),
      status,
      message: message.into(),
    }
  }
}

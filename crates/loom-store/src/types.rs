use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use sqlx::types::Json;

/// Lifecycle status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum RunStatus {
  Created,
  Running,
  Suspended,
  Completed,
  Failed,
}

impl RunStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      RunStatus::Created => "created",
      RunStatus::Running => "running",
      RunStatus::Suspended => "suspended",
      RunStatus::Completed => "completed",
      RunStatus::Failed => "failed",
    }
  }

  /// `Completed` and `Failed` never transition again.
  pub fn is_terminal(&self) -> bool {
    matches!(self, RunStatus::Completed | RunStatus::Failed)
  }
}

impl fmt::Display for RunStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Point-in-time snapshot of a run.
///
/// Completed steps are exactly the keys of `context`. `suspended_steps` is
/// non-empty if and only if the status is [`RunStatus::Suspended`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunState {
  pub run_id: String,
  pub status: RunStatus,
  pub active_paths: BTreeSet<String>,
  /// step_id -> the step's output (or resume context).
  pub context: BTreeMap<String, Value>,
  /// step_id -> payload the step suspended with.
  pub suspended_steps: BTreeMap<String, Value>,
  pub trigger_data: Value,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
  /// Epoch milliseconds.
  pub timestamp: i64,
}

impl RunState {
  /// A fresh run in [`RunStatus::Created`].
  pub fn new(run_id: impl Into<String>, timestamp: i64) -> Self {
    Self {
      run_id: run_id.into(),
      status: RunStatus::Created,
      active_paths: BTreeSet::new(),
      context: BTreeMap::new(),
      suspended_steps: BTreeMap::new(),
      trigger_data: Value::Null,
      error: None,
      timestamp,
    }
  }

  pub fn completed_steps(&self) -> BTreeSet<String> {
    self.context.keys().cloned().collect()
  }

  pub fn is_completed(&self, step_id: &str) -> bool {
    self.context.contains_key(step_id)
  }
}

/// A run snapshot as stored, keyed by workflow and run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct StoredRun {
  pub workflow_id: String,
  pub run_id: String,
  pub status: RunStatus,
  pub snapshot: Json<RunState>,
  pub timestamp: i64,
  pub updated_at: DateTime<Utc>,
}

impl StoredRun {
  pub fn new(workflow_id: impl Into<String>, snapshot: RunState) -> Self {
    Self {
      workflow_id: workflow_id.into(),
      run_id: snapshot.run_id.clone(),
      status: snapshot.status,
      timestamp: snapshot.timestamp,
      snapshot: Json(snapshot),
      updated_at: Utc::now(),
    }
  }
}

//! Run snapshots and their wire form.

use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use loom_store::{RunState, RunStatus};

/// A run snapshot as delivered to watch transports.
///
/// The field set is a wire contract: consumers rely on exactly these keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchEventData {
  pub active_paths: BTreeSet<String>,
  pub context: BTreeMap<String, Value>,
  pub run_id: String,
  pub timestamp: i64,
  pub suspended_steps: BTreeMap<String, Value>,
}

impl From<&RunState> for WatchEventData {
  fn from(state: &RunState) -> Self {
    Self {
      active_paths: state.active_paths.clone(),
      context: state.context.clone(),
      run_id: state.run_id.clone(),
      timestamp: state.timestamp,
      suspended_steps: state.suspended_steps.clone(),
    }
  }
}

/// Current epoch milliseconds, forced past `previous`.
pub(crate) fn next_timestamp(previous: i64) -> i64 {
  let now = Utc::now().timestamp_millis();
  if now > previous { now } else { previous + 1 }
}

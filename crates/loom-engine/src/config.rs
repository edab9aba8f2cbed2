use serde::{Deserialize, Serialize};

/// Engine-wide settings shared by every run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  /// Maximum snapshots kept in memory per run. `0` disables in-memory history.
  pub history_limit: usize,
  /// Save every published snapshot when a store is configured.
  pub persist_snapshots: bool,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      history_limit: 256,
      persist_snapshots: true,
    }
  }
}

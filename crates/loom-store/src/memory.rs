use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use crate::{RunState, SnapshotStore, StoreError, StoredRun};

/// Process-local store, mostly useful for tests and single-shot CLI runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
  runs: RwLock<HashMap<(String, String), StoredRun>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
  async fn save(&self, workflow_id: &str, snapshot: &RunState) -> Result<(), StoreError> {
    let mut runs = self.runs.write().unwrap_or_else(PoisonError::into_inner);
    let key = (workflow_id.to_string(), snapshot.run_id.clone());
    if let Some(existing) = runs.get(&key) {
      if existing.timestamp > snapshot.timestamp {
        return Ok(());
      }
    }
    runs.insert(key, StoredRun::new(workflow_id, snapshot.clone()));
    Ok(())
  }

  async fn load(&self, workflow_id: &str, run_id: &str) -> Result<Option<RunState>, StoreError> {
    let runs = self.runs.read().unwrap_or_else(PoisonError::into_inner);
    Ok(
      runs
        .get(&(workflow_id.to_string(), run_id.to_string()))
        .map(|stored| stored.snapshot.0.clone()),
    )
  }

  async fn list_runs(&self, workflow_id: &str) -> Result<Vec<StoredRun>, StoreError> {
    let runs = self.runs.read().unwrap_or_else(PoisonError::into_inner);
    let mut listed: Vec<StoredRun> = runs
      .values()
      .filter(|stored| stored.workflow_id == workflow_id)
      .cloned()
      .collect();
    listed.sort_by(|a, b| a.run_id.cmp(&b.run_id));
    Ok(listed)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::RunStatus;

  #[tokio::test]
  async fn test_save_and_load() {
    let store = MemoryStore::new();
    let state = RunState::new("r1", 1);
    store.save("wf", &state).await.unwrap();

    assert_eq!(store.load("wf", "r1").await.unwrap(), Some(state));
    assert_eq!(store.load("other", "r1").await.unwrap(), None);
  }

  #[tokio::test]
  async fn test_older_snapshot_does_not_overwrite_newer() {
    let store = MemoryStore::new();
    let mut newer = RunState::new("r1", 5);
    newer.status = RunStatus::Completed;
    store.save("wf", &newer).await.unwrap();
    store.save("wf", &RunState::new("r1", 2)).await.unwrap();

    let loaded = store.load("wf", "r1").await.unwrap().unwrap();
    assert_eq!(loaded.status, RunStatus::Completed);
  }

  #[tokio::test]
  async fn test_list_runs_is_scoped_to_workflow() {
    let store = MemoryStore::new();
    store.save("wf", &RunState::new("b", 1)).await.unwrap();
    store.save("wf", &RunState::new("a", 1)).await.unwrap();
    store.save("other", &RunState::new("c", 1)).await.unwrap();

    let ids: Vec<String> = store
      .list_runs("wf")
      .await
      .unwrap()
      .into_iter()
      .map(|r| r.run_id)
      .collect();
    assert_eq!(ids, vec!["a", "b"]);
  }
}

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, PoisonError, RwLock};

use loom_store::{RunStatus, SnapshotStore};
use loom_workflow::WorkflowDefinition;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::controller::RunController;
use crate::error::EngineError;

/// Directory of the runs of one workflow.
///
/// Runs stay registered until [`RunRegistry::remove_run`] is called; the
/// engine never evicts on its own.
pub struct RunRegistry {
  workflow: Arc<WorkflowDefinition>,
  config: EngineConfig,
  store: Option<Arc<dyn SnapshotStore>>,
  runs: RwLock<HashMap<String, Arc<RunController>>>,
}

impl RunRegistry {
  pub fn new(
    workflow: Arc<WorkflowDefinition>,
    config: EngineConfig,
    store: Option<Arc<dyn SnapshotStore>>,
  ) -> Self {
    Self {
      workflow,
      config,
      store,
      runs: RwLock::new(HashMap::new()),
    }
  }

  pub fn workflow(&self) -> &Arc<WorkflowDefinition> {
    &self.workflow
  }

  /// Get or create the run for `run_id`.
  ///
  /// An id already registered returns that run unchanged. An id found in the
  /// store is restored from its snapshot. Anything else creates a fresh run,
  /// with a generated id when none is given. Concurrent calls for one id all
  /// receive the same controller.
  pub async fn create_run(&self, run_id: Option<String>) -> Result<Arc<RunController>, EngineError> {
    let run_id = run_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    if let Some(existing) = self.get_run(&run_id) {
      return Ok(existing);
    }

    let stored = match &self.store {
      Some(store) => store.load(self.workflow.name(), &run_id).await?,
      None => None,
    };
    let restored = stored.is_some();
    let interrupted = stored
      .as_ref()
      .is_some_and(|state| state.status == RunStatus::Running);

    let controller = {
      let mut runs = self.runs.write().unwrap_or_else(PoisonError::into_inner);
      match runs.entry(run_id.clone()) {
        // Lost the race to another creator.
        Entry::Occupied(entry) => return Ok(Arc::clone(entry.get())),
        Entry::Vacant(entry) => {
          let controller = match stored {
            Some(state) => RunController::restore(
              Arc::clone(&self.workflow),
              state,
              self.config.clone(),
              self.store.clone(),
            ),
            None => RunController::new(
              Arc::clone(&self.workflow),
              run_id.clone(),
              self.config.clone(),
              self.store.clone(),
            ),
          };
          Arc::clone(entry.insert(controller))
        }
      }
    };

    info!(
      workflow_id = %self.workflow.name(),
      run_id = %run_id,
      restored,
      "run_created"
    );

    // Fresh runs and runs restored as failed both have a snapshot the store
    // has not seen yet.
    if !restored || interrupted {
      if let Some(store) = self.store.as_ref().filter(|_| self.config.persist_snapshots) {
        if let Err(e) = store.save(self.workflow.name(), &controller.get_state()).await {
          warn!(run_id = %run_id, error = %e, "failed to persist run snapshot");
        }
      }
    }

    Ok(controller)
  }

  pub fn get_run(&self, run_id: &str) -> Option<Arc<RunController>> {
    self
      .runs
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .get(run_id)
      .cloned()
  }

  /// Evict a run from memory. Stored snapshots are left alone.
  pub fn remove_run(&self, run_id: &str) -> Option<Arc<RunController>> {
    self
      .runs
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .remove(run_id)
  }

  /// Registered run ids, sorted.
  pub fn run_ids(&self) -> Vec<String> {
    let mut ids: Vec<String> = self
      .runs
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .keys()
      .cloned()
      .collect();
    ids.sort();
    ids
  }

  pub fn len(&self) -> usize {
    self.runs.read().unwrap_or_else(PoisonError::into_inner).len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

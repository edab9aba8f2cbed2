//! Multi-workflow host.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use loom_store::SnapshotStore;
use loom_workflow::{WorkflowDefinition, WorkflowDescription};
use serde_json::Value;
use tracing::info;

use crate::config::EngineConfig;
use crate::controller::{RunController, RunHandle};
use crate::error::EngineError;
use crate::registry::RunRegistry;
use crate::state::RunState;
use crate::watch::{BoxError, WatchStream, Watcher};

/// Hosts workflows by name, each with its own [`RunRegistry`].
///
/// Engines are independent of each other; several can live in one process.
pub struct Engine {
  config: EngineConfig,
  store: Option<Arc<dyn SnapshotStore>>,
  registries: RwLock<HashMap<String, Arc<RunRegistry>>>,
}

impl Engine {
  pub fn new(config: EngineConfig) -> Self {
    Self {
      config,
      store: None,
      registries: RwLock::new(HashMap::new()),
    }
  }

  /// Persist run snapshots through `store`.
  pub fn with_store(mut self, store: Arc<dyn SnapshotStore>) -> Self {
    self.store = Some(store);
    self
  }

  pub fn config(&self) -> &EngineConfig {
    &self.config
  }

  /// Register a workflow under its name.
  pub fn register_workflow(&self, workflow: WorkflowDefinition) -> Result<(), EngineError> {
    let name = workflow.name().to_string();
    let mut registries = self.registries.write().unwrap_or_else(PoisonError::into_inner);
    if registries.contains_key(&name) {
      return Err(EngineError::DuplicateWorkflow(name));
    }

    info!(workflow_id = %name, steps = workflow.graph().order().len(), "workflow_registered");
    registries.insert(
      name,
      Arc::new(RunRegistry::new(
        Arc::new(workflow),
        self.config.clone(),
        self.store.clone(),
      )),
    );
    Ok(())
  }

  /// Registered workflow names, sorted.
  pub fn workflows(&self) -> Vec<String> {
    let mut names: Vec<String> = self
      .registries
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .keys()
      .cloned()
      .collect();
    names.sort();
    names
  }

  pub fn describe(&self, workflow_id: &str) -> Result<WorkflowDescription, EngineError> {
    Ok(self.registry(workflow_id)?.workflow().describe())
  }

  pub fn registry(&self, workflow_id: &str) -> Result<Arc<RunRegistry>, EngineError> {
    self
      .registries
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .get(workflow_id)
      .cloned()
      .ok_or_else(|| EngineError::WorkflowNotFound(workflow_id.to_string()))
  }

  pub async fn create_run(
    &self,
    workflow_id: &str,
    run_id: Option<String>,
  ) -> Result<Arc<RunController>, EngineError> {
    self.registry(workflow_id)?.create_run(run_id).await
  }

  pub fn get_run(&self, workflow_id: &str, run_id: &str) -> Result<Arc<RunController>, EngineError> {
    self
      .registry(workflow_id)?
      .get_run(run_id)
      .ok_or_else(|| EngineError::RunNotFound {
        workflow_id: workflow_id.to_string(),
        run_id: run_id.to_string(),
      })
  }

  /// Start a run without waiting on it.
  pub fn start_run(
    &self,
    workflow_id: &str,
    run_id: &str,
    trigger_data: Value,
  ) -> Result<RunHandle, EngineError> {
    self.get_run(workflow_id, run_id)?.start(trigger_data)
  }

  /// Start a run and wait for it to suspend or finish.
  pub async fn start_run_and_wait(
    &self,
    workflow_id: &str,
    run_id: &str,
    trigger_data: Value,
  ) -> Result<RunState, EngineError> {
    self.get_run(workflow_id, run_id)?.start_and_wait(trigger_data).await
  }

  /// Resume a suspended step without waiting on the run.
  pub fn resume_run(
    &self,
    workflow_id: &str,
    run_id: &str,
    step_id: &str,
    context: Value,
  ) -> Result<RunHandle, EngineError> {
    self.get_run(workflow_id, run_id)?.resume(step_id, context)
  }

  /// Resume a suspended step and wait for the run to suspend or finish.
  pub async fn resume_run_and_wait(
    &self,
    workflow_id: &str,
    run_id: &str,
    step_id: &str,
    context: Value,
  ) -> Result<RunState, EngineError> {
    self
      .get_run(workflow_id, run_id)?
      .resume_and_wait(step_id, context)
      .await
  }

  pub fn watch_run<F>(&self, workflow_id: &str, run_id: &str, callback: F) -> Result<Watcher, EngineError>
  where
    F: Fn(&RunState) -> Result<(), BoxError> + Send + Sync + 'static,
  {
    Ok(self.get_run(workflow_id, run_id)?.watch(callback))
  }

  pub fn stream_run(&self, workflow_id: &str, run_id: &str) -> Result<WatchStream, EngineError> {
    Ok(self.get_run(workflow_id, run_id)?.stream())
  }
}

impl Default for Engine {
  fn default() -> Self {
    Self::new(EngineConfig::default())
  }
}

//! Run controller.
//!
//! A [`RunController`] owns one run and is the only writer of its state. The
//! run's status doubles as the ownership token for mutation: `start` and
//! `resume` check and transition the status while holding the state lock, and
//! while the status is `Running` only the dispatched loop task writes. Every
//! transition is published to the [`WatchHub`] under that same lock.

use std::collections::{BTreeMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::FutureExt;
use loom_store::SnapshotStore;
use loom_workflow::{Step, StepFailure, StepInput, StepOutcome, WorkflowDefinition};
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::state::{RunState, RunStatus, next_timestamp};
use crate::watch::{BoxError, WatchHub, WatchStream, Watcher};

struct RunCore {
  state: RunState,
  history: VecDeque<RunState>,
}

/// Drives one run from creation to a terminal state.
pub struct RunController {
  workflow: Arc<WorkflowDefinition>,
  config: EngineConfig,
  core: Mutex<RunCore>,
  latest: watch::Sender<RunState>,
  hub: WatchHub,
}

/// Handle to a dispatched run loop.
///
/// Dropping the handle does not stop the run.
pub struct RunHandle {
  run_id: String,
  inner: HandleInner,
}

enum HandleInner {
  Dispatched(JoinHandle<RunState>),
  /// Nothing was dispatched; the run already settled.
  Settled(RunState),
}

impl RunHandle {
  pub fn run_id(&self) -> &str {
    &self.run_id
  }

  /// Wait until the run is suspended, completed, or failed.
  pub async fn wait(self) -> Result<RunState, EngineError> {
    match self.inner {
      HandleInner::Dispatched(join) => join.await.map_err(|e| EngineError::Join(e.to_string())),
      HandleInner::Settled(state) => Ok(state),
    }
  }
}

impl RunController {
  /// Create a controller for a fresh run.
  ///
  /// Must be called from within a tokio runtime when a store is given.
  pub fn new(
    workflow: Arc<WorkflowDefinition>,
    run_id: impl Into<String>,
    config: EngineConfig,
    store: Option<Arc<dyn SnapshotStore>>,
  ) -> Arc<Self> {
    let state = RunState::new(run_id, chrono::Utc::now().timestamp_millis());
    Self::build(workflow, state, config, store)
  }

  /// Rebuild a controller from a stored snapshot.
  ///
  /// A snapshot left `Running` belonged to a loop that no longer exists; the
  /// run is restored as failed instead of being silently re-executed, and
  /// the failure is published as a new snapshot.
  pub fn restore(
    workflow: Arc<WorkflowDefinition>,
    mut state: RunState,
    config: EngineConfig,
    store: Option<Arc<dyn SnapshotStore>>,
  ) -> Arc<Self> {
    let interrupted = state.status == RunStatus::Running;
    if interrupted {
      warn!(
        workflow_id = %workflow.name(),
        run_id = %state.run_id,
        "restored run was interrupted while running"
      );
      state.status = RunStatus::Failed;
      state.active_paths.clear();
      state.error = Some("run was interrupted while running".to_string());
    }

    let controller = Self::build(workflow, state, config, store);
    if interrupted {
      let mut core = controller.lock();
      controller.publish(&mut core);
    }
    if controller.status().is_terminal() {
      controller.hub.close();
    }
    controller
  }

  fn build(
    workflow: Arc<WorkflowDefinition>,
    state: RunState,
    config: EngineConfig,
    store: Option<Arc<dyn SnapshotStore>>,
  ) -> Arc<Self> {
    let hub = WatchHub::new(state.run_id.clone());
    let (latest, _) = watch::channel(state.clone());

    if let Some(store) = store.filter(|_| config.persist_snapshots) {
      spawn_persister(store, workflow.name().to_string(), hub.stream());
    }

    Arc::new(Self {
      workflow,
      config,
      core: Mutex::new(RunCore {
        state,
        history: VecDeque::new(),
      }),
      latest,
      hub,
    })
  }

  pub fn run_id(&self) -> String {
    self.latest.borrow().run_id.clone()
  }

  pub fn workflow(&self) -> &Arc<WorkflowDefinition> {
    &self.workflow
  }

  /// Current snapshot. Never waits on a running step.
  pub fn get_state(&self) -> RunState {
    self.latest.borrow().clone()
  }

  pub fn status(&self) -> RunStatus {
    self.latest.borrow().status
  }

  /// Retained snapshots, oldest first.
  pub fn history(&self) -> Vec<RunState> {
    self.lock().history.iter().cloned().collect()
  }

  pub fn hub(&self) -> &WatchHub {
    &self.hub
  }

  /// Subscribe a callback to later snapshots of this run.
  pub fn watch<F>(&self, callback: F) -> Watcher
  where
    F: Fn(&RunState) -> Result<(), BoxError> + Send + Sync + 'static,
  {
    self.hub.subscribe(callback)
  }

  /// Later snapshots of this run as a stream.
  pub fn stream(&self) -> WatchStream {
    self.hub.stream()
  }

  /// Resolves once the run is no longer `Running`.
  pub async fn settled(&self) -> RunState {
    let mut receiver = self.latest.subscribe();
    match receiver
      .wait_for(|state| state.status != RunStatus::Running)
      .await
    {
      Ok(state) => state.clone(),
      Err(_) => self.get_state(),
    }
  }

  /// Start the run and dispatch its loop without waiting for it.
  ///
  /// Fails with [`EngineError::InvalidState`] unless the run is `Created`.
  /// Trigger data that fails the trigger schema moves the run to `Failed`
  /// before any step executes and is reported as [`EngineError::Validation`].
  pub fn start(self: &Arc<Self>, trigger_data: Value) -> Result<RunHandle, EngineError> {
    let mut core = self.lock();
    let run_id = core.state.run_id.clone();

    if core.state.status != RunStatus::Created {
      return Err(EngineError::invalid_state(
        run_id,
        core.state.status,
        "run can only be started once",
      ));
    }

    core.state.trigger_data = trigger_data;

    if let Some(schema) = self.workflow.trigger_schema() {
      if let Err(source) = schema.validate(&core.state.trigger_data) {
        core.state.status = RunStatus::Failed;
        core.state.error = Some(format!("trigger data is invalid: {}", source));
        self.publish(&mut core);
        info!(
          workflow_id = %self.workflow.name(),
          run_id = %run_id,
          error = %source,
          "run_failed"
        );
        return Err(EngineError::Validation { run_id, source });
      }
    }

    core.state.status = RunStatus::Running;
    core.state.active_paths = self.workflow.graph().roots().iter().cloned().collect();
    self.publish(&mut core);
    info!(
      workflow_id = %self.workflow.name(),
      run_id = %run_id,
      trigger_data = %core.state.trigger_data,
      "run_started"
    );
    drop(core);

    Ok(self.dispatch(run_id))
  }

  /// Start the run and wait until it suspends or finishes.
  pub async fn start_and_wait(self: &Arc<Self>, trigger_data: Value) -> Result<RunState, EngineError> {
    self.start(trigger_data)?.wait().await
  }

  /// Resume a suspended step and dispatch the loop again.
  ///
  /// `context` becomes the step's context entry; the step counts as completed
  /// and is not executed again. Fails with [`EngineError::InvalidState`] unless
  /// the run is `Suspended` on `step_id`.
  pub fn resume(self: &Arc<Self>, step_id: &str, context: Value) -> Result<RunHandle, EngineError> {
    let mut core = self.lock();
    let run_id = core.state.run_id.clone();

    if core.state.status != RunStatus::Suspended {
      return Err(EngineError::invalid_state(
        run_id,
        core.state.status,
        "only a suspended run can be resumed",
      ));
    }
    if !core.state.suspended_steps.contains_key(step_id) {
      return Err(EngineError::invalid_state(
        run_id,
        core.state.status,
        format!("unknown or already-resumed step '{}'", step_id),
      ));
    }

    let schema = self
      .workflow
      .get_step(step_id)
      .and_then(|step| step.output_schema.clone());
    if let Some(schema) = schema {
      if let Err(source) = schema.validate(&context) {
        self.fail(
          &mut core,
          step_id,
          format!("resume context for step '{}' is invalid: {}", step_id, source),
        );
        return Err(EngineError::Validation { run_id, source });
      }
    }

    core.state.suspended_steps.remove(step_id);
    core.state.context.insert(step_id.to_string(), context);
    self.refresh_active_paths(&mut core);

    if !core.state.suspended_steps.is_empty() {
      // Other steps still hold the run.
      self.publish(&mut core);
      info!(
        workflow_id = %self.workflow.name(),
        run_id = %run_id,
        step_id = %step_id,
        remaining = core.state.suspended_steps.len(),
        "run_resumed"
      );
      return Ok(RunHandle {
        run_id,
        inner: HandleInner::Settled(core.state.clone()),
      });
    }

    core.state.status = RunStatus::Running;
    self.publish(&mut core);
    info!(
      workflow_id = %self.workflow.name(),
      run_id = %run_id,
      step_id = %step_id,
      "run_resumed"
    );
    drop(core);

    Ok(self.dispatch(run_id))
  }

  /// Resume a suspended step and wait until the run suspends or finishes.
  pub async fn resume_and_wait(
    self: &Arc<Self>,
    step_id: &str,
    context: Value,
  ) -> Result<RunState, EngineError> {
    self.resume(step_id, context)?.wait().await
  }

  fn dispatch(self: &Arc<Self>, run_id: String) -> RunHandle {
    let this = Arc::clone(self);
    let join = tokio::spawn(async move { this.run_loop().await });
    RunHandle {
      run_id,
      inner: HandleInner::Dispatched(join),
    }
  }

  /// Execute ready steps one at a time until the run leaves `Running`.
  #[instrument(
    name = "run_loop",
    skip(self),
    fields(workflow_id = %self.workflow.name(), run_id = %self.run_id())
  )]
  async fn run_loop(self: Arc<Self>) -> RunState {
    loop {
      let (step, input) = {
        let mut core = self.lock();
        let completed = core.state.completed_steps();
        let next = self
          .workflow
          .graph()
          .resolve_ready(&core.state.active_paths, &completed)
          .into_iter()
          .find(|id| !core.state.suspended_steps.contains_key(id));

        let Some(step_id) = next else {
          return self.complete(&mut core);
        };

        let Some(step) = self.workflow.get_step(&step_id) else {
          let reason = format!("step '{}' has no definition", step_id);
          return self.fail(&mut core, &step_id, reason);
        };

        let input = self.step_input(&core.state, &step_id);
        if let Some(schema) = &step.input_schema {
          if let Err(e) = schema.validate(&input.payload()) {
            let reason = format!("input for step '{}' is invalid: {}", step_id, e);
            return self.fail(&mut core, &step_id, reason);
          }
        }

        info!(step_id = %step_id, "step_started");
        (step, input)
      };

      let step_id = input.step_id.clone();
      let outcome = execute_step(step, input).await;

      let mut core = self.lock();
      match outcome {
        Ok(StepOutcome::Complete(output)) => {
          if let Some(schema) = &step.output_schema {
            if let Err(e) = schema.validate(&output) {
              let reason = format!("output of step '{}' is invalid: {}", step_id, e);
              return self.fail(&mut core, &step_id, reason);
            }
          }
          core.state.context.insert(step_id.clone(), output);
          self.refresh_active_paths(&mut core);
          self.publish(&mut core);
          info!(step_id = %step_id, "step_completed");
        }
        Ok(StepOutcome::Suspend(payload)) => {
          core.state.active_paths.remove(&step_id);
          core.state.suspended_steps.insert(step_id.clone(), payload);
          core.state.status = RunStatus::Suspended;
          self.publish(&mut core);
          info!(step_id = %step_id, "step_suspended");
          info!(suspended_steps = ?core.state.suspended_steps.keys().collect::<Vec<_>>(), "run_suspended");
          return core.state.clone();
        }
        Err(failure) => {
          info!(step_id = %step_id, error = %failure, "step_failed");
          let reason = format!("step '{}' failed: {}", step_id, failure);
          return self.fail(&mut core, &step_id, reason);
        }
      }
    }
  }

  fn step_input(&self, state: &RunState, step_id: &str) -> StepInput {
    let upstream: BTreeMap<String, Value> = self
      .workflow
      .graph()
      .upstream(step_id)
      .iter()
      .filter_map(|id| state.context.get(id).map(|v| (id.clone(), v.clone())))
      .collect();

    StepInput {
      run_id: state.run_id.clone(),
      step_id: step_id.to_string(),
      trigger_data: state.trigger_data.clone(),
      upstream,
      join: self.workflow.graph().is_join_point(step_id),
    }
  }

  /// Active paths are the steps that are ready and not suspended.
  fn refresh_active_paths(&self, core: &mut RunCore) {
    let completed = core.state.completed_steps();
    let ready = self
      .workflow
      .graph()
      .resolve_ready(&core.state.active_paths, &completed);
    core.state.active_paths = ready
      .into_iter()
      .filter(|id| !core.state.suspended_steps.contains_key(id))
      .collect();
  }

  fn complete(&self, core: &mut MutexGuard<'_, RunCore>) -> RunState {
    core.state.active_paths.clear();
    core.state.status = RunStatus::Completed;
    self.publish(core);
    info!(completed_steps = core.state.context.len(), "run_completed");
    core.state.clone()
  }

  fn fail(&self, core: &mut MutexGuard<'_, RunCore>, step_id: &str, reason: String) -> RunState {
    core.state.active_paths.remove(step_id);
    core.state.suspended_steps.clear();
    core.state.status = RunStatus::Failed;
    core.state.error = Some(reason);
    self.publish(core);
    info!(
      workflow_id = %self.workflow.name(),
      run_id = %core.state.run_id,
      step_id = %step_id,
      error = core.state.error.as_deref().unwrap_or_default(),
      "run_failed"
    );
    core.state.clone()
  }

  /// Stamp, record, and fan out the current state. Called with the lock held.
  fn publish(&self, core: &mut RunCore) {
    core.state.timestamp = next_timestamp(core.state.timestamp);

    if self.config.history_limit > 0 {
      if core.history.len() == self.config.history_limit {
        core.history.pop_front();
      }
      core.history.push_back(core.state.clone());
    }

    self.latest.send_replace(core.state.clone());
    self.hub.publish(&core.state);
  }

  fn lock(&self) -> MutexGuard<'_, RunCore> {
    self.core.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

/// Run a step, turning a panic into a step failure.
async fn execute_step(step: &Step, input: StepInput) -> Result<StepOutcome, StepFailure> {
  match AssertUnwindSafe(step.execute(input)).catch_unwind().await {
    Ok(result) => result,
    Err(_) => Err(StepFailure::new("step panicked")),
  }
}

fn spawn_persister(store: Arc<dyn SnapshotStore>, workflow_id: String, mut snapshots: WatchStream) {
  use futures::StreamExt;

  tokio::spawn(async move {
    while let Some(snapshot) = snapshots.next().await {
      if let Err(e) = store.save(&workflow_id, &snapshot).await {
        warn!(
          workflow_id = %workflow_id,
          run_id = %snapshot.run_id,
          error = %e,
          "failed to persist run snapshot"
        );
      }
    }
  });
}

//! Steps and workflows shared by the engine tests.
#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use loom_workflow::{
  JsonTypeSchema, Schema, Step, StepExecutor, StepFailure, StepGraph, StepInput, StepOutcome,
  WorkflowDefinition,
};
use serde_json::{Value, json};
use tokio::sync::Notify;

/// Completes with its input payload.
pub struct Echo;

#[async_trait]
impl StepExecutor for Echo {
  async fn execute(&self, input: StepInput) -> Result<StepOutcome, StepFailure> {
    Ok(StepOutcome::Complete(input.payload()))
  }
}

/// Completes with a fixed value and counts its executions.
pub struct Constant {
  pub value: Value,
  pub calls: Arc<AtomicUsize>,
}

impl Constant {
  pub fn new(value: Value) -> Self {
    Self {
      value,
      calls: Arc::new(AtomicUsize::new(0)),
    }
  }
}

#[async_trait]
impl StepExecutor for Constant {
  async fn execute(&self, _input: StepInput) -> Result<StepOutcome, StepFailure> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    Ok(StepOutcome::Complete(self.value.clone()))
  }
}

/// Always asks for approval.
pub struct Approval;

#[async_trait]
impl StepExecutor for Approval {
  async fn execute(&self, input: StepInput) -> Result<StepOutcome, StepFailure> {
    Ok(StepOutcome::Suspend(json!({ "awaiting": "approval", "step": input.step_id })))
  }
}

pub struct Fail(pub &'static str);

#[async_trait]
impl StepExecutor for Fail {
  async fn execute(&self, _input: StepInput) -> Result<StepOutcome, StepFailure> {
    Err(StepFailure::new(self.0))
  }
}

pub struct Panic;

#[async_trait]
impl StepExecutor for Panic {
  async fn execute(&self, _input: StepInput) -> Result<StepOutcome, StepFailure> {
    panic!("step bug")
  }
}

/// Blocks until `release` is notified, then completes with its payload.
pub struct Gate {
  pub release: Arc<Notify>,
}

#[async_trait]
impl StepExecutor for Gate {
  async fn execute(&self, input: StepInput) -> Result<StepOutcome, StepFailure> {
    self.release.notified().await;
    Ok(StepOutcome::Complete(input.payload()))
  }
}

pub fn schema(target: &str, raw: Value) -> Arc<dyn Schema> {
  Arc::new(JsonTypeSchema::compile(target, &raw).unwrap())
}

pub fn subscribers(edges: &[(&str, &str)]) -> BTreeMap<String, BTreeSet<String>> {
  let mut graph: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
  for (from, to) in edges {
    graph.entry(from.to_string()).or_default().insert(to.to_string());
  }
  graph
}

/// `a -> b -> c` as a subscriber chain.
pub fn chain(name: &str, a: Step, b: Step, c: Step) -> Arc<WorkflowDefinition> {
  let graph = StepGraph::new(
    vec![a.id.clone()],
    subscribers(&[(a.id.as_str(), b.id.as_str()), (b.id.as_str(), c.id.as_str())]),
  )
  .unwrap();
  Arc::new(WorkflowDefinition::new(name, graph, vec![a, b, c], None).unwrap())
}

pub fn step(id: &str, executor: impl StepExecutor + 'static) -> Step {
  Step::standard(id, Arc::new(executor))
}

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::WorkflowError;
use crate::graph::StepGraph;
use crate::schema::Schema;
use crate::step::Step;

/// A resolved workflow ready for execution.
///
/// Every step named by the graph has an executable [`Step`], and every step has
/// a place in the graph.
#[derive(Debug, Clone)]
pub struct WorkflowDefinition {
  name: String,
  graph: StepGraph,
  steps: HashMap<String, Step>,
  trigger_schema: Option<Arc<dyn Schema>>,
}

impl WorkflowDefinition {
  pub fn new(
    name: impl Into<String>,
    graph: StepGraph,
    steps: Vec<Step>,
    trigger_schema: Option<Arc<dyn Schema>>,
  ) -> Result<Self, WorkflowError> {
    let mut by_id = HashMap::with_capacity(steps.len());
    for step in steps {
      if by_id.contains_key(&step.id) {
        return Err(WorkflowError::DuplicateStep(step.id));
      }
      by_id.insert(step.id.clone(), step);
    }

    for step_id in graph.order() {
      if !by_id.contains_key(step_id) {
        return Err(WorkflowError::UnknownStep(step_id.clone()));
      }
    }

    let mut orphans: Vec<&String> = by_id.keys().filter(|id| !graph.contains(id)).collect();
    orphans.sort();
    if let Some(orphan) = orphans.first() {
      return Err(WorkflowError::OrphanStep((*orphan).clone()));
    }

    Ok(Self {
      name: name.into(),
      graph,
      steps: by_id,
      trigger_schema,
    })
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn graph(&self) -> &StepGraph {
    &self.graph
  }

  pub fn get_step(&self, step_id: &str) -> Option<&Step> {
    self.steps.get(step_id)
  }

  pub fn trigger_schema(&self) -> Option<&dyn Schema> {
    self.trigger_schema.as_deref()
  }

  /// Serializable summary of the workflow's structure and schemas.
  pub fn describe(&self) -> WorkflowDescription {
    let steps = self
      .graph
      .order()
      .iter()
      .filter_map(|id| self.steps.get(id))
      .map(|step| {
        (
          step.id.clone(),
          StepDescription {
            kind: step.kind.name().to_string(),
            input_schema: step.input_schema.as_ref().map(|s| s.to_json()),
            output_schema: step.output_schema.as_ref().map(|s| s.to_json()),
          },
        )
      })
      .collect();

    WorkflowDescription {
      name: self.name.clone(),
      trigger_schema: self.trigger_schema.as_ref().map(|s| s.to_json()),
      step_graph: self.graph.path().to_vec(),
      step_subscriber_graph: self.graph.subscribers().clone(),
      steps,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDescription {
  pub name: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub trigger_schema: Option<serde_json::Value>,
  pub step_graph: Vec<String>,
  pub step_subscriber_graph: BTreeMap<String, BTreeSet<String>>,
  pub steps: BTreeMap<String, StepDescription>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepDescription {
  pub kind: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub input_schema: Option<serde_json::Value>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub output_schema: Option<serde_json::Value>,
}

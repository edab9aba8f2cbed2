use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use loom_config::{StepDef, StepKindDef, WorkflowDef};
use serde_json::Value;

use crate::error::WorkflowError;
use crate::graph::StepGraph;
use crate::schema::{JsonTypeSchema, Schema};
use crate::step::{Step, StepExecutor, StepKind, ToolExecutor};
use crate::workflow::WorkflowDefinition;

/// Builds an executor for a standard step from that step's `config`.
pub type HandlerFactory =
  Arc<dyn Fn(&Value) -> Result<Arc<dyn StepExecutor>, String> + Send + Sync>;

/// Resolver transforms a [`WorkflowDef`] into an executable [`WorkflowDefinition`].
///
/// This process:
/// 1. Rejects duplicate step ids
/// 2. Binds each step kind to a registered handler or tool
/// 3. Compiles trigger, input, and output schemas
/// 4. Builds and validates the step graph (no cycles, no unknown or orphan steps)
#[derive(Clone, Default)]
pub struct Resolver {
  handlers: HashMap<String, HandlerFactory>,
  tools: HashMap<String, Arc<dyn ToolExecutor>>,
}

impl Resolver {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a handler factory for `standard` steps.
  pub fn register_handler<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
  where
    F: Fn(&Value) -> Result<Arc<dyn StepExecutor>, String> + Send + Sync + 'static,
  {
    self.handlers.insert(name.into(), Arc::new(factory));
    self
  }

  /// Register a tool for `external_tool` steps.
  pub fn register_tool(
    &mut self,
    tool_id: impl Into<String>,
    tool: Arc<dyn ToolExecutor>,
  ) -> &mut Self {
    self.tools.insert(tool_id.into(), tool);
    self
  }

  pub fn resolve(&self, def: WorkflowDef) -> Result<WorkflowDefinition, WorkflowError> {
    let mut seen = BTreeSet::new();
    for step in &def.steps {
      if !seen.insert(step.step_id.as_str()) {
        return Err(WorkflowError::DuplicateStep(step.step_id.clone()));
      }
    }

    let steps = def
      .steps
      .iter()
      .map(|step_def| self.resolve_step(step_def))
      .collect::<Result<Vec<_>, _>>()?;

    let trigger_schema = compile_schema("trigger", def.trigger_schema.as_ref())?;

    let subscribers: BTreeMap<String, BTreeSet<String>> = def
      .subscribers
      .into_iter()
      .map(|(from, to)| (from, to.into_iter().collect()))
      .collect();
    let graph = StepGraph::new(def.path, subscribers)?;

    WorkflowDefinition::new(def.name, graph, steps, trigger_schema)
  }

  fn resolve_step(&self, step_def: &StepDef) -> Result<Step, WorkflowError> {
    let kind = match &step_def.kind {
      StepKindDef::Standard { handler, config } => {
        let factory = self
          .handlers
          .get(handler)
          .ok_or_else(|| WorkflowError::HandlerNotFound {
            step_id: step_def.step_id.clone(),
            handler: handler.clone(),
          })?;
        let executor = factory(config).map_err(|message| WorkflowError::HandlerConfig {
          step_id: step_def.step_id.clone(),
          handler: handler.clone(),
          message,
        })?;
        StepKind::Standard {
          handler: handler.clone(),
          executor,
        }
      }
      StepKindDef::ExternalTool { tool_id, config } => {
        let tool = self
          .tools
          .get(tool_id)
          .cloned()
          .ok_or_else(|| WorkflowError::ToolNotFound {
            step_id: step_def.step_id.clone(),
            tool_id: tool_id.clone(),
          })?;
        StepKind::ExternalTool {
          tool_id: tool_id.clone(),
          config: config.clone(),
          tool,
        }
      }
    };

    let mut step = Step::new(step_def.step_id.clone(), kind);
    step.input_schema = compile_schema(
      &format!("{}.input", step_def.step_id),
      step_def.input_schema.as_ref(),
    )?;
    step.output_schema = compile_schema(
      &format!("{}.output", step_def.step_id),
      step_def.output_schema.as_ref(),
    )?;
    Ok(step)
  }
}

fn compile_schema(
  target: &str,
  raw: Option<&Value>,
) -> Result<Option<Arc<dyn Schema>>, WorkflowError> {
  raw
    .map(|raw| JsonTypeSchema::compile(target, raw).map(|s| Arc::new(s) as Arc<dyn Schema>))
    .transpose()
}

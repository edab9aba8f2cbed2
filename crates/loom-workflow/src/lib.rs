//! Loom Workflow
//!
//! This crate provides the resolved workflow representation for loom.
//! A resolved workflow is a validated form of a workflow configuration whose
//! steps are already bound to executable capabilities.
//!
//! Key differences from `loom-config`:
//! - The step graph is validated (acyclic, no unknown or orphan steps)
//! - Step kinds are resolved once, at load time, into [`StepKind`] variants
//! - Schemas are compiled into [`Schema`] validators
//! - Roots and a deterministic topological order are precomputed

mod error;
mod graph;
mod resolver;
mod schema;
mod step;
mod workflow;

pub use error::{SchemaError, WorkflowError};
pub use graph::StepGraph;
pub use resolver::{HandlerFactory, Resolver};
pub use schema::{JsonTypeSchema, Schema, SchemaType};
pub use step::{
  Step, StepExecutor, StepFailure, StepInput, StepKind, StepOutcome, ToolCall, ToolExecutor,
};
pub use workflow::{StepDescription, WorkflowDefinition, WorkflowDescription};

//! Loom Config
//!
//! This crate contains the serializable workflow configuration types for loom.
//! These types describe a workflow before the resolver has bound its steps to
//! executable handlers and built the step graph.
//!
//! Configuration can be loaded from:
//! - JSON files (via the CLI)
//! - Any storage that keeps definitions as JSON blobs
//!
//! `loom-workflow` takes these types, checks the graph, and resolves each step
//! kind exactly once into an executable `Step`.

mod step;
mod workflow;

pub use step::{StepDef, StepKindDef};
pub use workflow::WorkflowDef;

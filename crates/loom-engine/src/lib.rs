//! Run engine for loom.
//!
//! This crate drives runs of resolved workflows and streams their progress.
//!
//! # Architecture
//!
//! ```text
//! Engine
//! └── RunRegistry (one per workflow)
//!     └── RunController (one per run)
//!         ├── start(trigger) / resume(step, context) -> RunHandle
//!         ├── run_loop - executes ready steps one at a time
//!         └── WatchHub - fans snapshots out to watchers and the store
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use loom_engine::{Engine, EngineConfig};
//!
//! let engine = Engine::new(EngineConfig::default());
//! engine.register_workflow(workflow)?;
//!
//! let run = engine.create_run("orders", None).await?;
//! let mut snapshots = run.stream();
//! let state = run.start_and_wait(payload).await?;
//!
//! if state.status == RunStatus::Suspended {
//!     run.resume_and_wait("approve", json!({ "approved": true })).await?;
//! }
//! ```

mod config;
mod controller;
mod engine;
mod error;
mod registry;
mod state;
mod watch;

pub use config::EngineConfig;
pub use controller::{RunController, RunHandle};
pub use engine::Engine;
pub use error::EngineError;
pub use registry::RunRegistry;
pub use state::{RunState, RunStatus, WatchEventData};
pub use watch::{BoxError, WatchHub, WatchStream, Watcher};

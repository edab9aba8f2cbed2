//! Loom Store
//!
//! This crate provides the storage trait and implementations for run
//! snapshots. Storage is optional for the engine: a run executes the same way
//! with or without a store, and a store only adds history that outlives the
//! process.
//!
//! The [`SnapshotStore`] trait defines operations for:
//! - Saving the latest snapshot of a run
//! - Loading a run's snapshot back, e.g. to resume it in a new process
//! - Listing stored runs of a workflow

mod memory;
mod sqlite;
mod types;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use types::{RunState, RunStatus, StoredRun};

use async_trait::async_trait;

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
  /// A database error occurred, including a stored snapshot that no longer
  /// decodes.
  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),

  #[error("migration error: {0}")]
  Migration(#[from] sqlx::migrate::MigrateError),
}

/// Storage trait for run snapshots.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
  /// Save a run's snapshot, replacing any older snapshot of the same run.
  async fn save(&self, workflow_id: &str, snapshot: &RunState) -> Result<(), StoreError>;

  /// Load the latest snapshot of a run, if one was saved.
  async fn load(&self, workflow_id: &str, run_id: &str) -> Result<Option<RunState>, StoreError>;

  /// List stored runs of a workflow, ordered by run id.
  async fn list_runs(&self, workflow_id: &str) -> Result<Vec<StoredRun>, StoreError>;
}

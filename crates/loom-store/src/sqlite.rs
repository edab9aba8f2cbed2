use std::str::FromStr;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::types::Json;

use crate::{RunState, SnapshotStore, StoreError, StoredRun};

/// SQLite-based store implementation.
///
/// One row per run; each save replaces the row unless the stored snapshot is
/// newer than the one being saved.
#[derive(Debug, Clone)]
pub struct SqliteStore {
  pool: SqlitePool,
}

impl SqliteStore {
  /// Create a new SQLite store with the given connection pool.
  pub fn new(pool: SqlitePool) -> Self {
    Self { pool }
  }

  /// Open a pool for `url`, creating the database file if needed, and migrate it.
  ///
  /// In-memory databases are limited to a single connection that is never
  /// recycled, since every connection would otherwise see its own database.
  pub async fn connect(url: &str) -> Result<Self, StoreError> {
    let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
    let pool_options = if url.contains(":memory:") {
      SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
    } else {
      SqlitePoolOptions::new()
    };
    let store = Self::new(pool_options.connect_with(options).await?);
    store.migrate().await?;
    Ok(store)
  }

  /// Run database migrations.
  pub async fn migrate(&self) -> Result<(), StoreError> {
    sqlx::migrate!("./migrations").run(&self.pool).await?;
    Ok(())
  }
}

#[async_trait]
impl SnapshotStore for SqliteStore {
  async fn save(&self, workflow_id: &str, snapshot: &RunState) -> Result<(), StoreError> {
    sqlx::query(
      r#"
            INSERT INTO runs (workflow_id, run_id, status, snapshot, timestamp, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (workflow_id, run_id) DO UPDATE SET
                status = excluded.status,
                snapshot = excluded.snapshot,
                timestamp = excluded.timestamp,
                updated_at = excluded.updated_at
            WHERE excluded.timestamp >= runs.timestamp
            "#,
    )
    .bind(workflow_id)
    .bind(&snapshot.run_id)
    .bind(snapshot.status)
    .bind(Json(snapshot))
    .bind(snapshot.timestamp)
    .bind(Utc::now())
    .execute(&self.pool)
    .await?;

    Ok(())
  }

  async fn load(&self, workflow_id: &str, run_id: &str) -> Result<Option<RunState>, StoreError> {
    let row: Option<StoredRun> = sqlx::query_as(
      r#"
            SELECT workflow_id, run_id, status, snapshot, timestamp, updated_at
            FROM runs
            WHERE workflow_id = ? AND run_id = ?
            "#,
    )
    .bind(workflow_id)
    .bind(run_id)
    .fetch_optional(&self.pool)
    .await?;

    Ok(row.map(|stored| stored.snapshot.0))
  }

  async fn list_runs(&self, workflow_id: &str) -> Result<Vec<StoredRun>, StoreError> {
    let rows = sqlx::query_as(
      r#"
            SELECT workflow_id, run_id, status, snapshot, timestamp, updated_at
            FROM runs
            WHERE workflow_id = ?
            ORDER BY run_id
            "#,
    )
    .bind(workflow_id)
    .fetch_all(&self.pool)
    .await?;

    Ok(rows)
  }
}

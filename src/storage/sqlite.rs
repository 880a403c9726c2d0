use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::{info, warn};

use super::{Artifact, ArtifactKind, EventKind, RunEvent, RunRecord, RunStatus, Storage};
use crate::config::DatabaseConfig;
use crate::error::{StorageError, StorageResult};

/// Static migrator that embeds migrations at compile time
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// SQLite-backed storage implementation
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Create a new SQLite storage instance
    pub async fn new(config: &DatabaseConfig) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Connection {
                message: format!("Failed to create database directory: {}", e),
            })?;
        }

        let database_url = format!("sqlite://{}?mode=rwc", config.path.display());

        let options = SqliteConnectOptions::from_str(&database_url)
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to connect to database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Create a private in-memory database, used by tests.
    pub async fn new_in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .foreign_keys(true);

        // every connection to :memory: is a separate database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to connect to database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Run database migrations using embedded sqlx migrations
    async fn run_migrations(&self) -> StorageResult<()> {
        info!("Running database migrations...");

        MIGRATOR.run(&self.pool).await.map_err(|e| StorageError::Migration {
            message: format!("Failed to run migrations: {}", e),
        })?;

        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get the underlying pool for advanced queries
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|e| {
            warn!(value, error = %e, "Unparseable timestamp in database");
            Utc::now()
        })
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn create_run(&self, run: &RunRecord) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO runs (id, target, status, started_at, finished_at, error)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&run.id)
        .bind(&run.target)
        .bind(run.status.to_string())
        .bind(timestamp(&run.started_at))
        .bind(run.finished_at.as_ref().map(timestamp))
        .bind(&run.error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_run(&self, run: &RunRecord) -> StorageResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE runs
            SET status = ?, finished_at = ?, error = ?
            WHERE id = ?
            "#,
        )
        .bind(run.status.to_string())
        .bind(run.finished_at.as_ref().map(timestamp))
        .bind(&run.error)
        .bind(&run.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::Query {
                message: format!("Run not found: {}", run.id),
            });
        }

        Ok(())
    }

    async fn get_run(&self, id: &str) -> StorageResult<Option<RunRecord>> {
        let row: Option<RunRow> = sqlx::query_as(
            r#"
            SELECT id, target, status, started_at, finished_at, error
            FROM runs
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into()))
    }

    async fn latest_run(&self, target: &str) -> StorageResult<Option<RunRecord>> {
        let row: Option<RunRow> = sqlx::query_as(
            r#"
            SELECT id, target, status, started_at, finished_at, error
            FROM runs
            WHERE target = ?
            ORDER BY started_at DESC, rowid DESC
            LIMIT 1
            "#,
        )
        .bind(target)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into()))
    }

    async fn save_artifact(&self, artifact: &Artifact) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO artifacts (target, kind, run_id, content, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(target, kind) DO UPDATE SET
                run_id = excluded.run_id,
                content = excluded.content,
                created_at = excluded.created_at
            "#,
        )
        .bind(&artifact.target)
        .bind(artifact.kind.to_string())
        .bind(&artifact.run_id)
        .bind(&artifact.content)
        .bind(timestamp(&artifact.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_artifact(
        &self,
        target: &str,
        kind: ArtifactKind,
    ) -> StorageResult<Option<Artifact>> {
        let row: Option<ArtifactRow> = sqlx::query_as(
            r#"
            SELECT target, kind, run_id, content, created_at
            FROM artifacts
            WHERE target = ? AND kind = ?
            "#,
        )
        .bind(target)
        .bind(kind.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Artifact::try_from).transpose()
    }

    async fn append_event(&self, event: &RunEvent) -> StorageResult<()> {
        let detail = event
            .detail
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO events (id, run_id, target, stage, kind, detail, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&event.id)
        .bind(&event.run_id)
        .bind(&event.target)
        .bind(&event.stage)
        .bind(event.kind.to_string())
        .bind(&detail)
        .bind(timestamp(&event.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_events(&self, target: &str) -> StorageResult<Vec<RunEvent>> {
        let rows: Vec<EventRow> = sqlx::query_as(
            r#"
            SELECT id, run_id, target, stage, kind, detail, created_at
            FROM events
            WHERE target = ?
            ORDER BY seq ASC
            "#,
        )
        .bind(target)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(RunEvent::try_from).collect()
    }
}

// Internal row types for SQLx mapping
#[derive(sqlx::FromRow)]
struct RunRow {
    id: String,
    target: String,
    status: String,
    started_at: String,
    finished_at: Option<String>,
    error: Option<String>,
}

impl From<RunRow> for RunRecord {
    fn from(row: RunRow) -> Self {
        Self {
            id: row.id,
            target: row.target,
            status: row.status.parse().unwrap_or(RunStatus::Failed),
            started_at: parse_timestamp(&row.started_at),
            finished_at: row.finished_at.as_deref().map(parse_timestamp),
            error: row.error,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ArtifactRow {
    target: String,
    kind: String,
    run_id: String,
    content: String,
    created_at: String,
}

impl TryFrom<ArtifactRow> for Artifact {
    type Error = StorageError;

    fn try_from(row: ArtifactRow) -> Result<Self, Self::Error> {
        Ok(Self {
            target: row.target,
            kind: row
                .kind
                .parse()
                .map_err(|message| StorageError::Query { message })?,
            run_id: row.run_id,
            content: row.content,
            created_at: parse_timestamp(&row.created_at),
        })
    }
}

#[derive(sqlx::FromRow)]
struct EventRow {
    id: String,
    run_id: String,
    target: String,
    stage: String,
    kind: String,
    detail: Option<String>,
    created_at: String,
}

impl TryFrom<EventRow> for RunEvent {
    type Error = StorageError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        let kind: EventKind = row
            .kind
            .parse()
            .map_err(|message| StorageError::Query { message })?;

        Ok(Self {
            id: row.id,
            run_id: row.run_id,
            target: row.target,
            stage: row.stage,
            kind,
            detail: row.detail.map(|d| serde_json::from_str(&d)).transpose()?,
            created_at: parse_timestamp(&row.created_at),
        })
    }
}

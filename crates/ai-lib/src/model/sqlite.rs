//! SQLite document store for model records

use super::{Clock, Model, ModelId, ModelRepository, ModelStream, SystemClock};
use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use futures::stream;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS models (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    repo_id TEXT NOT NULL,
    version INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    last_use TEXT NOT NULL,
    expired INTEGER NOT NULL DEFAULT 0,
    document TEXT NOT NULL,
    UNIQUE(repo_id, version)
);
CREATE INDEX IF NOT EXISTS idx_models_repo_created ON models(repo_id, created_at DESC);
";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Model store backed by a single SQLite database file
///
/// Each model is stored as a JSON document. The `last_use` and `expired`
/// columns are authoritative over the document so stamping never rewrites it.
#[derive(Clone)]
pub struct SqliteModelStore {
    conn: Arc<Mutex<Connection>>,
    clock: Arc<dyn Clock>,
}

impl SqliteModelStore {
    /// Open (or create) the database at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        debug!(path = %path.display(), "Opened model database");
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            clock: Arc::new(SystemClock),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Run a blocking database call off the async runtime
    async fn call<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Task(format!("bad timestamp {raw:?}: {e}")))
}

struct ModelRow {
    id: i64,
    last_use: String,
    expired: bool,
    document: String,
}

impl ModelRow {
    const COLUMNS: &'static str = "id, last_use, expired, document";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            last_use: row.get(1)?,
            expired: row.get(2)?,
            document: row.get(3)?,
        })
    }

    fn into_model(self) -> Result<Model, StoreError> {
        let mut model: Model = serde_json::from_str(&self.document)?;
        model.id = ModelId::new(self.id);
        model.last_use = parse_timestamp(&self.last_use)?;
        model.expired = self.expired;
        Ok(model)
    }
}

#[async_trait]
impl ModelRepository for SqliteModelStore {
    async fn insert(&self, model: &Model) -> Result<ModelId, StoreError> {
        let document = serde_json::to_string(model)?;
        let repo_id = model.repo_id.clone();
        let version = model.version;
        let created_at = timestamp(&model.created_at);
        let last_use = timestamp(&model.last_use);
        let expired = model.expired;

        self.call(move |conn| {
            conn.execute(
                "INSERT INTO models (repo_id, version, created_at, last_use, expired, document)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![repo_id, version, created_at, last_use, expired, document],
            )?;
            Ok(ModelId::new(conn.last_insert_rowid()))
        })
        .await
    }

    async fn find_latest(&self, repo_id: &str) -> Result<Model, StoreError> {
        let repo_id = repo_id.to_string();
        let row = self
            .call(move |conn| {
                let sql = format!(
                    "SELECT {} FROM models WHERE repo_id = ?1 ORDER BY id DESC LIMIT 1",
                    ModelRow::COLUMNS
                );
                Ok(conn
                    .query_row(&sql, params![repo_id], ModelRow::from_row)
                    .optional()?)
            })
            .await?;

        row.ok_or(StoreError::NotFound)?.into_model()
    }

    async fn find_by_repo(&self, repo_id: &str, limit: usize) -> Result<ModelStream, StoreError> {
        let repo_id = repo_id.to_string();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = self
            .call(move |conn| {
                let sql = format!(
                    "SELECT {} FROM models WHERE repo_id = ?1
                     ORDER BY created_at DESC, id DESC LIMIT ?2",
                    ModelRow::COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params![repo_id, limit], ModelRow::from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;

        Ok(Box::pin(stream::iter(
            rows.into_iter().map(ModelRow::into_model),
        )))
    }

    async fn log_usage(&self, id: ModelId) -> Result<(), StoreError> {
        let last_use = timestamp(&self.clock.now());
        self.call(move |conn| {
            conn.execute(
                "UPDATE models SET last_use = ?1 WHERE id = ?2",
                params![last_use, id.get()],
            )?;
            Ok(())
        })
        .await
    }

    async fn set_expired(&self, id: ModelId, expired: bool) -> Result<(), StoreError> {
        self.call(move |conn| {
            conn.execute(
                "UPDATE models SET expired = ?1 WHERE id = ?2",
                params![expired, id.get()],
            )?;
            Ok(())
        })
        .await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.call(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
            Ok(())
        })
        .await
    }
}

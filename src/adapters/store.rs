//! Persistence of completed runs.
//!
//! One append-only `events` table; one row per completed run:
//!
//! | column         | type    |
//! |----------------|---------|
//! | run_id         | TEXT    |
//! | listener_one   | TEXT    |
//! | listener_two   | TEXT    |
//! | listener_three | TEXT    |
//! | event_time     | TEXT    |

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::PipelineResult;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS events (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id         TEXT NOT NULL UNIQUE,
    listener_one   TEXT NOT NULL,
    listener_two   TEXT NOT NULL,
    listener_three TEXT NOT NULL,
    event_time     TEXT NOT NULL
);
";

const SELECT_COLUMNS: &str =
    "SELECT run_id, listener_one, listener_two, listener_three, event_time FROM events";

/// Storage errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("storage task failed: {0}")]
    TaskFailed(String),

    #[error("failed to prepare database directory: {0}")]
    Io(#[from] std::io::Error),
}

/// Persists completed pipeline runs.
///
/// `save` performs exactly one insert and never retries. The read methods
/// serve boot-time recovery and the CLI.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Insert one completed run
    async fn save(&self, result: &PipelineResult) -> Result<(), StoreError>;

    /// Most recently committed row
    async fn latest(&self) -> Result<Option<PipelineResult>, StoreError>;

    /// Committed row for a run id
    async fn find(&self, run_id: Uuid) -> Result<Option<PipelineResult>, StoreError>;

    /// Up to `limit` rows, newest first
    async fn recent(&self, limit: usize) -> Result<Vec<PipelineResult>, StoreError>;
}

/// SQLite-backed result store.
///
/// The connection is shared behind a mutex; statements run on the blocking
/// pool so async callers are never stalled by disk I/O.
#[derive(Clone)]
pub struct SqliteResultStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteResultStore {
    /// Open or create the database at `path`
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=FULL;
            PRAGMA busy_timeout=10000;
            ",
        )?;
        conn.execute_batch(SCHEMA)?;
        info!(path = %path.display(), "result store opened");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a closure against the connection on the blocking pool
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            f(&guard)
        })
        .await
        .map_err(|e| StoreError::TaskFailed(e.to_string()))?
    }
}

fn row_to_raw(row: &Row<'_>) -> rusqlite::Result<RawRow> {
    Ok(RawRow {
        run_id: row.get(0)?,
        listener1: row.get(1)?,
        listener2: row.get(2)?,
        listener3: row.get(3)?,
        event_time: row.get(4)?,
    })
}

struct RawRow {
    run_id: String,
    listener1: String,
    listener2: String,
    listener3: String,
    event_time: DateTime<Utc>,
}

impl TryFrom<RawRow> for PipelineResult {
    type Error = StoreError;

    fn try_from(raw: RawRow) -> Result<Self, Self::Error> {
        let run_id = Uuid::parse_str(&raw.run_id)
            .map_err(|e| StoreError::Corrupt(format!("run_id '{}': {}", raw.run_id, e)))?;
        Ok(Self {
            run_id,
            listener1: raw.listener1,
            listener2: raw.listener2,
            listener3: raw.listener3,
            event_time: raw.event_time,
        })
    }
}

#[async_trait]
impl ResultStore for SqliteResultStore {
    async fn save(&self, result: &PipelineResult) -> Result<(), StoreError> {
        let result = result.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO events (run_id, listener_one, listener_two, listener_three, event_time) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    result.run_id.to_string(),
                    result.listener1,
                    result.listener2,
                    result.listener3,
                    result.event_time,
                ],
            )?;
            debug!(run_id = %result.run_id, "result persisted");
            Ok(())
        })
        .await
    }

    async fn latest(&self) -> Result<Option<PipelineResult>, StoreError> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("{} ORDER BY id DESC LIMIT 1", SELECT_COLUMNS),
                [],
                row_to_raw,
            )
            .optional()?
            .map(PipelineResult::try_from)
            .transpose()
        })
        .await
    }

    async fn find(&self, run_id: Uuid) -> Result<Option<PipelineResult>, StoreError> {
        self.with_conn(move |conn| {
            conn.query_row(
                &format!("{} WHERE run_id = ?1", SELECT_COLUMNS),
                params![run_id.to_string()],
                row_to_raw,
            )
            .optional()?
            .map(PipelineResult::try_from)
            .transpose()
        })
        .await
    }

    async fn recent(&self, limit: usize) -> Result<Vec<PipelineResult>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.with_conn(move |conn| {
            let mut stmt =
                conn.prepare(&format!("{} ORDER BY id DESC LIMIT ?1", SELECT_COLUMNS))?;
            let rows = stmt.query_map(params![limit], row_to_raw)?;

            let mut results = Vec::new();
            for raw in rows {
                results.push(PipelineResult::try_from(raw?)?);
            }
            Ok(results)
        })
        .await
    }
}

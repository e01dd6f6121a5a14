//! Key/blob persistence for job snapshots.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::{db::init_db, error::Result};

/// Minimal blob store used by [`Agent::dump_jobs`](crate::Agent::dump_jobs)
/// and [`Agent::load_jobs`](crate::Agent::load_jobs).
pub trait JobStore: Send + Sync {
    /// Insert or replace the blob stored under `key`.
    fn save(&self, key: &str, blob: &[u8]) -> Result<()>;

    fn load(&self, key: &str) -> Result<Option<Vec<u8>>>;
}

/// [`JobStore`] backed by a single SQLite table.
pub struct SqliteJobStore {
    db: Mutex<Connection>,
}

impl SqliteJobStore {
    /// Wrap an open connection, creating the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.db.lock().expect("job store connection poisoned")
    }
}

impl JobStore for SqliteJobStore {
    fn save(&self, key: &str, blob: &[u8]) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        self.conn().execute(
            "INSERT INTO job_blobs (key, blob, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET blob = excluded.blob, updated_at = excluded.updated_at",
            params![key, blob, now],
        )?;
        debug!(key, bytes = blob.len(), "job snapshot saved");
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let blob = self
            .conn()
            .query_row(
                "SELECT blob FROM job_blobs WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(blob)
    }
}

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use greenhouse_common::{Error, Result};
use rusqlite::Connection;
use tracing::info;

/// A SQLite connection shared by one store.
///
/// Async callers go through [`SharedConnection::run`], which executes the
/// closure on tokio's blocking pool so a slow query or a contended lock never
/// stalls a runtime worker and stays subject to the caller's timeouts.
#[derive(Clone)]
pub(crate) struct SharedConnection {
    pub(crate) inner: Arc<Mutex<Connection>>,
    label: &'static str,
}

impl SharedConnection {
    pub(crate) fn open(db_path: &Path, label: &'static str) -> Result<Self> {
        info!("opening {label} at {}", db_path.display());
        let conn = Connection::open(db_path)
            .map_err(|e| Error::Database(format!("failed to open database: {e}")))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")
            .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;
        Ok(Self::new(conn, label))
    }

    pub(crate) fn in_memory(label: &'static str) -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Database(format!("failed to open in-memory database: {e}")))?;
        Ok(Self::new(conn, label))
    }

    fn new(conn: Connection, label: &'static str) -> Self {
        Self {
            inner: Arc::new(Mutex::new(conn)),
            label,
        }
    }

    pub(crate) fn migrate(&self, sql: &str) -> Result<()> {
        self.with(|conn| {
            conn.execute_batch(sql)
                .map_err(|e| Error::Database(format!("{} migration failed: {e}", self.label)))
        })
    }

    /// Run `f` on the calling thread.
    pub(crate) fn with<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.lock()?;
        f(&conn)
    }

    /// Run `f` on the blocking pool.
    pub(crate) async fn run<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let shared = self.clone();
        let label = self.label;
        tokio::task::spawn_blocking(move || shared.with(f))
            .await
            .map_err(|e| Error::Database(format!("{label} task failed: {e}")))?
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.inner
            .lock()
            .map_err(|_| Error::Database(format!("{} lock poisoned", self.label)))
    }
}

//! SQLite connection handling.
//!
//! [`Executor`] is the statement-level seam the engine runs on. The
//! [`Database`] struct is its SQLite implementation: a `rusqlite::Connection`
//! behind an `Arc<Mutex<>>`, opened with the pragmas from [`PragmaConfig`].

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::{Connection, Row, params_from_iter};
use tracing::{debug, info};

use crate::config::{DbConfig, PragmaConfig};
use crate::error::{StorageError, StorageResult};
use crate::sql::SqlInfo;

/// Executes statements against one shared connection.
///
/// Calls block the calling thread. Query rows are handed to `visit` while
/// the cursor is open and released before `query` returns, on every exit
/// path. `visit` returns `false` to stop early and must not call back into
/// the executor.
pub trait Executor: Send + Sync {
    /// Run a statement that returns no rows; yields the affected row count.
    fn execute(&self, sql: &SqlInfo) -> StorageResult<usize>;

    /// Run a query and feed each row to `visit` until it returns `false`.
    fn query(
        &self,
        sql: &SqlInfo,
        visit: &mut dyn FnMut(&Row<'_>) -> StorageResult<bool>,
    ) -> StorageResult<()>;

    /// Run an INSERT and return the new row's rowid, read under the same
    /// connection lock as the insert itself.
    fn execute_insert(&self, sql: &SqlInfo) -> StorageResult<i64>;

    /// Run unparameterized SQL holding any number of `;`-separated
    /// statements. Rows returned by a statement (a `PRAGMA`, say) are
    /// discarded.
    fn execute_batch(&self, sql: &str) -> StorageResult<()>;
}

/// Thread-safe handle to a SQLite database.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) a database at `path` with default pragmas.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "opening database");

        let conn = Connection::open(path)?;
        Self::from_connection(conn, &PragmaConfig::default())
    }

    /// Create an in-memory database with default pragmas.
    pub fn open_in_memory() -> StorageResult<Self> {
        debug!("opening in-memory database");

        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, &PragmaConfig::default())
    }

    /// Open the database described by `config`: a file when `path` is set,
    /// otherwise an in-memory database.
    pub fn open_with(config: &DbConfig) -> StorageResult<Self> {
        let conn = match &config.path {
            Some(path) => {
                info!(path = %path.display(), "opening database");
                Connection::open(path)?
            }
            None => {
                debug!("opening in-memory database");
                Connection::open_in_memory()?
            }
        };
        Self::from_connection(conn, &config.pragmas)
    }

    /// Wrap an already opened connection, applying `pragmas`.
    pub fn from_connection(conn: Connection, pragmas: &PragmaConfig) -> StorageResult<Self> {
        Self::apply_pragmas(&conn, pragmas)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run an arbitrary closure against the locked connection.
    ///
    /// ```
    /// # use matedb::Database;
    /// let db = Database::open_in_memory().unwrap();
    /// let version: String = db
    ///     .with_conn(|conn| Ok(conn.query_row("SELECT sqlite_version()", [], |row| row.get(0))?))
    ///     .unwrap();
    /// assert!(!version.is_empty());
    /// ```
    pub fn with_conn<F, T>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&Connection) -> StorageResult<T>,
    {
        let conn = self.lock()?;
        f(&conn)
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StorageError::LockPoisoned(e.to_string()))
    }

    // ── pragmas ──────────────────────────────────────────────────────

    /// Apply the configured pragmas to a fresh connection.
    fn apply_pragmas(conn: &Connection, pragmas: &PragmaConfig) -> StorageResult<()> {
        debug!(?pragmas, "applying SQLite pragmas");

        // In-memory databases keep reporting "memory"; the call still succeeds.
        conn.pragma_update(None, "journal_mode", pragmas.journal_mode.as_str())?;
        conn.pragma_update(None, "synchronous", pragmas.synchronous.as_str())?;
        conn.pragma_update(None, "foreign_keys", pragmas.foreign_keys)?;
        conn.pragma_update(None, "busy_timeout", pragmas.busy_timeout_ms)?;
        if let Some(kib) = pragmas.cache_size_kib {
            // Negative means KiB rather than pages.
            conn.pragma_update(None, "cache_size", -kib)?;
        }
        if let Some(bytes) = pragmas.mmap_size {
            conn.pragma_update(None, "mmap_size", bytes)?;
        }
        if pragmas.temp_store_memory {
            conn.pragma_update(None, "temp_store", "MEMORY")?;
        }

        info!(journal_mode = %pragmas.journal_mode, "database pragmas applied");
        Ok(())
    }
}

impl Executor for Database {
    fn execute(&self, sql: &SqlInfo) -> StorageResult<usize> {
        let conn = self.lock()?;
        debug!(sql = sql.sql(), args = sql.args().len(), "execute");
        conn.execute(sql.sql(), params_from_iter(sql.args()))
            .map_err(|e| StorageError::statement(sql.sql(), e))
    }

    fn query(
        &self,
        sql: &SqlInfo,
        visit: &mut dyn FnMut(&Row<'_>) -> StorageResult<bool>,
    ) -> StorageResult<()> {
        let conn = self.lock()?;
        debug!(sql = sql.sql(), args = sql.args().len(), "query");
        let mut stmt = conn
            .prepare(sql.sql())
            .map_err(|e| StorageError::statement(sql.sql(), e))?;
        let mut rows = stmt
            .query(params_from_iter(sql.args()))
            .map_err(|e| StorageError::statement(sql.sql(), e))?;
        while let Some(row) = rows
            .next()
            .map_err(|e| StorageError::statement(sql.sql(), e))?
        {
            if !visit(row)? {
                break;
            }
        }
        Ok(())
    }

    fn execute_insert(&self, sql: &SqlInfo) -> StorageResult<i64> {
        let conn = self.lock()?;
        debug!(sql = sql.sql(), args = sql.args().len(), "insert");
        conn.execute(sql.sql(), params_from_iter(sql.args()))
            .map_err(|e| StorageError::statement(sql.sql(), e))?;
        Ok(conn.last_insert_rowid())
    }

    fn execute_batch(&self, sql: &str) -> StorageResult<()> {
        let conn = self.lock()?;
        debug!(sql, "execute batch");
        conn.execute_batch(sql)
            .map_err(|e| StorageError::statement(sql, e))
    }
}

// ── tests ────────────────────────────────────────────────────────────

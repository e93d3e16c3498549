//! The storage engine: schema cache, table lifecycle and query primitives.
//!
//! [`StorageEngine`] owns two [`SchemaCache`]s (tables and models) and an
//! [`Executor`]. Tables are created lazily on first use with a double check
//! under a lock keyed by table name, so concurrent first use of one table
//! issues a single CREATE TABLE, even when several types map onto it. Catalog questions (`is_table_exists`, `table_names`) always
//! go to `sqlite_master`; the cached `exists_in_db` flag only reflects what
//! this engine did.

use std::any::{TypeId, type_name};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use moka::sync::Cache;

use tracing::{debug, info, instrument, warn};

use crate::cache::{CacheStats, SchemaCache};
use crate::config::DbConfig;
use crate::dao::Dao;
use crate::db::{Database, Executor};
use crate::error::StorageResult;
use crate::sql::{self, Intent, SqlInfo, quote_ident};
use crate::table::{Entity, FromRow, Model, ModelMeta, TableMeta};

/// Every user table. Internal `sqlite_*` tables (`sqlite_sequence`,
/// `sqlite_stat1`, ...) are never listed or dropped.
const USER_TABLES_SQL: &str =
    "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite\\_%' ESCAPE '\\'";

const TABLE_EXISTS_SQL: &str = "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?";

/// Called once after a table has been physically created.
pub type TableCreatedHook = Arc<dyn Fn(&StorageEngine, &TableMeta) + Send + Sync>;

/// Called by [`EngineBuilder::open`] when the stored schema version differs
/// from the configured one, with `(old, new)`.
pub type UpgradeHook = Arc<dyn Fn(&StorageEngine, u32, u32) -> StorageResult<()> + Send + Sync>;

/// Thread-safe ORM engine over one [`Executor`].
///
/// Clones share the executor, both caches and the table locks.
#[derive(Clone)]
pub struct StorageEngine {
    executor: Arc<dyn Executor>,
    tables: SchemaCache<TableMeta>,
    models: SchemaCache<ModelMeta>,
    /// Create/drop lock per table name. Never evicted.
    table_locks: Cache<String, Arc<Mutex<()>>>,
    on_table_created: Option<TableCreatedHook>,
}

impl StorageEngine {
    /// Engine over `executor` with no hooks.
    pub fn new(executor: impl Executor + 'static) -> Self {
        Self::builder().build(executor)
    }

    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// Open the database described by `config` and bring it to
    /// `config.version`. See [`EngineBuilder::open`].
    pub fn open(config: &DbConfig) -> StorageResult<Self> {
        Self::builder().open(config)
    }

    /// In-memory database with default pragmas.
    pub fn open_in_memory() -> StorageResult<Self> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    pub fn executor(&self) -> &dyn Executor {
        self.executor.as_ref()
    }

    // ── schema cache ─────────────────────────────────────────────────

    /// Table metadata for `T`, derived on first request and cached.
    pub fn get_table<T: Entity>(&self) -> StorageResult<Arc<TableMeta>> {
        self.tables
            .get_or_derive(TypeId::of::<T>(), type_name::<T>(), || {
                TableMeta::derive(T::describe())
            })
    }

    /// Model metadata for `T`, derived on first request and cached.
    pub fn get_model<T: Model>(&self) -> StorageResult<Arc<ModelMeta>> {
        self.models
            .get_or_derive(TypeId::of::<T>(), type_name::<T>(), || {
                ModelMeta::derive(T::describe())
            })
    }

    pub fn table_cache_stats(&self) -> &CacheStats {
        self.tables.stats()
    }

    pub fn model_cache_stats(&self) -> &CacheStats {
        self.models.stats()
    }

    // ── table lifecycle ──────────────────────────────────────────────

    /// Create `T`'s table unless this engine already did.
    ///
    /// Runs the table's `on_created` statements and the created hook after
    /// a physical CREATE. A table already present in the catalog (for
    /// example in a reopened database file) is adopted without either.
    #[instrument(skip(self), fields(entity = type_name::<T>()))]
    pub fn create_table_if_not_exist<T: Entity>(&self) -> StorageResult<()> {
        let table = self.get_table::<T>()?;
        self.ensure_table(&table)
    }

    fn ensure_table(&self, table: &TableMeta) -> StorageResult<()> {
        if table.exists_in_db() {
            return Ok(());
        }

        let lock = self.table_lock(table.name());
        let created = {
            let _guard = Self::acquire(&lock);
            self.create_locked(table)?
        };

        // Outside the lock, so the hook may use any table.
        if created {
            if let Some(hook) = &self.on_table_created {
                hook(self, table);
            }
        }
        Ok(())
    }

    /// Second half of the double check. Caller holds the table's lock.
    /// Returns whether a physical CREATE ran.
    fn create_locked(&self, table: &TableMeta) -> StorageResult<bool> {
        if table.exists_in_db() {
            return Ok(false);
        }

        // Another type mapped onto the same name may have created it.
        if self.is_table_name_exists(table.name())? {
            debug!(table = table.name(), "table already in catalog");
            table.set_exists_in_db(true);
            return Ok(false);
        }

        let create = sql::build(table, Intent::CreateTable)?;
        self.executor.execute(&create)?;
        for batch in table.on_created() {
            if batch.trim().is_empty() {
                continue;
            }
            self.executor.execute_batch(batch)?;
        }
        table.set_exists_in_db(true);
        info!(table = table.name(), "table created");
        Ok(true)
    }

    fn table_lock(&self, name: &str) -> Arc<Mutex<()>> {
        self.table_locks
            .get_with(name.to_string(), || Arc::new(Mutex::new(())))
    }

    // The guarded state lives in the atomic flags, so a poisoned lock is
    // still usable.
    fn acquire(lock: &Mutex<()>) -> MutexGuard<'_, ()> {
        lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark every cached type mapped onto `name` as absent.
    fn mark_absent(&self, name: &str) {
        for table in self.tables.values() {
            if table.name() == name {
                table.set_exists_in_db(false);
            }
        }
    }

    /// Drop `T`'s table and evict its metadata.
    ///
    /// Nothing is executed when the catalog has no such table. Every cached
    /// type mapped onto the same table is marked absent.
    #[instrument(skip(self), fields(entity = type_name::<T>()))]
    pub fn drop_table<T: Entity>(&self) -> StorageResult<()> {
        let table = self.get_table::<T>()?;
        let lock = self.table_lock(table.name());
        let _guard = Self::acquire(&lock);

        if !self.is_table_name_exists(table.name())? {
            debug!(table = table.name(), "drop skipped, table not in catalog");
            table.set_exists_in_db(false);
            self.mark_absent(table.name());
            return Ok(());
        }

        self.executor
            .execute(&SqlInfo::new(format!("DROP TABLE {}", quote_ident(table.name()))))?;
        table.set_exists_in_db(false);
        self.mark_absent(table.name());
        self.tables.invalidate(TypeId::of::<T>());
        info!(table = table.name(), "table dropped");
        Ok(())
    }

    /// [`drop_table`](Self::drop_table), logging failures instead of
    /// returning them.
    pub fn drop_table_quietly<T: Entity>(&self) {
        if let Err(err) = self.drop_table::<T>() {
            warn!(entity = type_name::<T>(), %err, "drop_table failed");
        }
    }

    /// Drop every user table, one statement per table.
    ///
    /// A table that fails to drop is logged and skipped. Afterwards every
    /// cached table is marked absent and the table cache is cleared. Only a
    /// failure to list the tables is returned.
    #[instrument(skip(self))]
    pub fn drop_db(&self) -> StorageResult<()> {
        let names = self.table_names()?;
        let mut dropped = 0usize;
        for name in &names {
            let lock = self.table_lock(name);
            let _guard = Self::acquire(&lock);
            let drop = SqlInfo::new(format!("DROP TABLE {}", quote_ident(name)));
            match self.executor.execute(&drop) {
                Ok(_) => dropped += 1,
                Err(err) => warn!(table = %name, %err, "failed to drop table, continuing"),
            }
        }

        for table in self.tables.values() {
            table.set_exists_in_db(false);
        }
        self.tables.invalidate_all();

        info!(dropped, failed = names.len() - dropped, "database dropped");
        Ok(())
    }

    /// [`drop_db`](Self::drop_db), logging failures instead of returning
    /// them.
    pub fn drop_db_quietly(&self) {
        if let Err(err) = self.drop_db() {
            warn!(%err, "drop_db failed");
        }
    }

    /// Add the declared column `column` to `T`'s existing table.
    ///
    /// A name `T` does not declare is ignored: nothing is executed and
    /// `Ok(())` is returned.
    #[instrument(skip(self), fields(entity = type_name::<T>()))]
    pub fn add_column<T: Entity>(&self, column: &str) -> StorageResult<()> {
        let table = self.get_table::<T>()?;
        if table.column(column).is_none() {
            debug!(table = table.name(), column, "unknown column, nothing to add");
            return Ok(());
        }

        let alter = sql::build(&table, Intent::AddColumn(column))?;
        self.executor.execute(&alter)?;
        info!(table = table.name(), column, "column added");
        Ok(())
    }

    // ── catalog ──────────────────────────────────────────────────────

    /// Live catalog check for `T`'s table.
    pub fn is_table_exists<T: Entity>(&self) -> StorageResult<bool> {
        let table = self.get_table::<T>()?;
        self.is_table_name_exists(table.name())
    }

    /// Live catalog check for a table called `name`.
    pub fn is_table_name_exists(&self, name: &str) -> StorageResult<bool> {
        let lookup = SqlInfo::new(TABLE_EXISTS_SQL).with_arg(name.to_string());
        let mut found = false;
        self.executor.query(&lookup, &mut |_| {
            found = true;
            Ok(false)
        })?;
        Ok(found)
    }

    /// Names of all user tables. Rows whose name cannot be read are logged
    /// and skipped.
    #[instrument(skip(self))]
    pub fn table_names(&self) -> StorageResult<Vec<String>> {
        let mut names = Vec::new();
        self.executor
            .query(&SqlInfo::new(USER_TABLES_SQL), &mut |row| {
                match row.get::<_, String>(0) {
                    Ok(name) => names.push(name),
                    Err(err) => warn!(%err, "skipping unreadable table name"),
                }
                Ok(true)
            })?;
        Ok(names)
    }

    // ── versioning ───────────────────────────────────────────────────

    /// Schema version stored in `PRAGMA user_version`.
    pub fn version(&self) -> StorageResult<u32> {
        let mut version = 0i64;
        self.executor
            .query(&SqlInfo::new("PRAGMA user_version"), &mut |row| {
                version = row.get(0)?;
                Ok(false)
            })?;
        Ok(u32::try_from(version).unwrap_or(0))
    }

    fn set_version(&self, version: u32) -> StorageResult<()> {
        self.executor
            .execute(&SqlInfo::new(format!("PRAGMA user_version = {version}")))?;
        Ok(())
    }

    fn sync_version(&self, target: u32, on_upgrade: Option<&UpgradeHook>) -> StorageResult<()> {
        let current = self.version()?;
        if current == target {
            debug!(version = current, "schema version up to date");
            return Ok(());
        }

        if current != 0 {
            match on_upgrade {
                Some(hook) => {
                    info!(from = current, to = target, "upgrading database");
                    hook(self, current, target)?;
                }
                None => {
                    warn!(from = current, to = target, "no upgrade hook, dropping all tables");
                    self.drop_db()?;
                }
            }
        }
        self.set_version(target)?;
        info!(version = target, "schema version recorded");
        Ok(())
    }

    // ── statement primitives ─────────────────────────────────────────

    /// Run a statement that returns no rows.
    pub fn exec_non_query(&self, sql: &SqlInfo) -> StorageResult<usize> {
        self.executor.execute(sql)
    }

    /// Run an INSERT and return the new rowid.
    pub fn exec_insert(&self, sql: &SqlInfo) -> StorageResult<i64> {
        self.executor.execute_insert(sql)
    }

    /// First row of `sql` mapped to `T`, or `None` when there are no rows.
    pub fn query_first<T: FromRow>(&self, sql: &SqlInfo) -> StorageResult<Option<T>> {
        let mut first = None;
        self.executor.query(sql, &mut |row| {
            first = Some(T::from_row(row)?);
            Ok(false)
        })?;
        Ok(first)
    }

    /// Every row of `sql` mapped to `T`.
    pub fn query_all<T: FromRow>(&self, sql: &SqlInfo) -> StorageResult<Vec<T>> {
        let mut all = Vec::new();
        self.executor.query(sql, &mut |row| {
            all.push(T::from_row(row)?);
            Ok(true)
        })?;
        Ok(all)
    }

    /// Run a unit of work against this engine.
    pub fn access<D: Dao>(&self, dao: &D) -> StorageResult<D::Output> {
        dao.access(self)
    }
}

// ── builder ──────────────────────────────────────────────────────────

/// Builder for [`StorageEngine`].
#[derive(Default)]
pub struct EngineBuilder {
    on_table_created: Option<TableCreatedHook>,
    on_upgrade: Option<UpgradeHook>,
}

impl EngineBuilder {
    pub fn on_table_created<F>(mut self, hook: F) -> Self
    where
        F: Fn(&StorageEngine, &TableMeta) + Send + Sync + 'static,
    {
        self.on_table_created = Some(Arc::new(hook));
        self
    }

    /// Hook run when an existing database carries a different schema
    /// version. Without one, such a database is wiped with
    /// [`StorageEngine::drop_db`].
    pub fn on_upgrade<F>(mut self, hook: F) -> Self
    where
        F: Fn(&StorageEngine, u32, u32) -> StorageResult<()> + Send + Sync + 'static,
    {
        self.on_upgrade = Some(Arc::new(hook));
        self
    }

    /// Engine over `executor`. No version check is made.
    pub fn build(self, executor: impl Executor + 'static) -> StorageEngine {
        StorageEngine {
            executor: Arc::new(executor),
            tables: SchemaCache::new("tables"),
            models: SchemaCache::new("models"),
            table_locks: Cache::builder().build(),
            on_table_created: self.on_table_created,
        }
    }

    /// Open the database described by `config` and bring its
    /// `user_version` to `config.version`.
    ///
    /// A fresh database (version 0) just records the version. An existing
    /// database at another version goes through the upgrade hook, or is
    /// wiped when there is none.
    pub fn open(mut self, config: &DbConfig) -> StorageResult<StorageEngine> {
        let on_upgrade = self.on_upgrade.take();
        let engine = self.build(Database::open_with(config)?);
        engine.sync_version(config.version, on_upgrade.as_ref())?;
        Ok(engine)
    }
}

// ── tests ────────────────────────────────────────────────────────────

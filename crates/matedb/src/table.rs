//! Mapped types and their table / model descriptions.
//!
//! A mapped type describes itself statically through [`Entity`] (a managed
//! table) or [`Model`] (a read-only projection). The engine turns that
//! description into a [`TableMeta`] or [`ModelMeta`] exactly once per type
//! and caches it.
//!
//! ```
//! use matedb::{Column, Entity, FromRow, TableDescriptor, Value};
//!
//! struct User {
//!     id: i64,
//!     email: String,
//! }
//!
//! impl FromRow for User {
//!     fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
//!         Ok(Self { id: row.get("id")?, email: row.get("email")? })
//!     }
//! }
//!
//! impl Entity for User {
//!     fn describe() -> TableDescriptor {
//!         TableDescriptor::for_type::<Self>()
//!             .column(Column::integer("id").primary_key())
//!             .column(Column::text("email").not_null())
//!     }
//!
//!     fn to_values(&self) -> Vec<(&'static str, Value)> {
//!         vec![("id", Value::Integer(self.id)), ("email", Value::Text(self.email.clone()))]
//!     }
//! }
//! ```

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use rusqlite::Row;
use rusqlite::types::Value;

use crate::column::{Column, ColumnMeta, SqlType};
use crate::error::{StorageError, StorageResult};

// ── mapped type traits ───────────────────────────────────────────────

/// Builds a value from one result row.
pub trait FromRow: Sized {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;
}

/// A type stored in its own table.
pub trait Entity: FromRow + 'static {
    /// Static table declaration. Called once per engine per type.
    fn describe() -> TableDescriptor;

    /// Column values of this instance, keyed by column name.
    ///
    /// Columns left out fall back to their declared default on insert.
    fn to_values(&self) -> Vec<(&'static str, Value)>;
}

/// A type used only to shape query results.
pub trait Model: FromRow + 'static {
    fn describe() -> ModelDescriptor;
}

/// Short, stable name for `T`: the last path segment of its type name,
/// without generic arguments (`app::db::User` → `User`).
pub fn type_short_name<T: ?Sized + 'static>() -> String {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).to_string()
}

// ── descriptors ──────────────────────────────────────────────────────

/// Declaration of a mapped table.
#[derive(Debug, Clone, Default)]
pub struct TableDescriptor {
    name: String,
    columns: Vec<Column>,
    on_created: Vec<String>,
}

impl TableDescriptor {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Table named after the type itself (see [`type_short_name`]).
    pub fn for_type<T: ?Sized + 'static>() -> Self {
        Self::named(type_short_name::<T>())
    }

    pub fn column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    /// SQL to run right after the table is created (indexes, triggers,
    /// seed rows, pragmas). One entry may hold several `;`-separated
    /// statements; rows they return are ignored. Blank entries are skipped.
    pub fn on_created(mut self, sql: impl Into<String>) -> Self {
        self.on_created.push(sql.into());
        self
    }
}

/// Declaration of a read projection: the columns to select and the table
/// or view they come from.
#[derive(Debug, Clone, Default)]
pub struct ModelDescriptor {
    name: String,
    columns: Vec<Column>,
}

impl ModelDescriptor {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
        }
    }

    pub fn for_type<T: ?Sized + 'static>() -> Self {
        Self::named(type_short_name::<T>())
    }

    pub fn column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }
}

// ── metadata ─────────────────────────────────────────────────────────

/// Validated description of a read projection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelMeta {
    name: String,
    columns: Vec<ColumnMeta>,
}

impl ModelMeta {
    /// Validate a descriptor. Fails on an empty name, no columns or
    /// duplicate column names.
    pub fn derive(descriptor: ModelDescriptor) -> StorageResult<Self> {
        let ModelDescriptor { name, columns } = descriptor;
        let columns = validate_columns(&name, columns)?;
        Ok(Self { name, columns })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Columns in declaration order.
    pub fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&ColumnMeta> {
        self.columns.iter().find(|c| c.name() == name)
    }
}

/// Validated description of a mapped table plus its lifecycle state.
///
/// `exists_in_db` is the only mutable part. It is set once the engine has
/// created (or found) the physical table and reset on drop. The engine
/// serializes the transition with a lock keyed by table name, shared by
/// every type mapped onto that table.
#[derive(Debug)]
pub struct TableMeta {
    name: String,
    columns: Vec<ColumnMeta>,
    primary_key: usize,
    on_created: Vec<String>,
    exists_in_db: AtomicBool,
}

impl TableMeta {
    /// Validate a descriptor.
    ///
    /// Fails on an empty name, no columns, duplicate column names, zero or
    /// several primary keys, or an auto-increment key that is not INTEGER.
    pub fn derive(descriptor: TableDescriptor) -> StorageResult<Self> {
        let TableDescriptor {
            name,
            columns,
            on_created,
        } = descriptor;
        let columns = validate_columns(&name, columns)?;

        let keys: Vec<usize> = columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_primary_key())
            .map(|(i, _)| i)
            .collect();
        let primary_key = match keys.as_slice() {
            [single] => *single,
            [] => return Err(StorageError::schema(&name, "no primary key column")),
            _ => {
                return Err(StorageError::schema(
                    &name,
                    format!("{} primary key columns, expected exactly one", keys.len()),
                ));
            }
        };

        let key = &columns[primary_key];
        if key.is_auto_increment() && key.sql_type() != SqlType::Integer {
            return Err(StorageError::schema(
                &name,
                format!("auto-increment key '{}' must be INTEGER", key.name()),
            ));
        }

        Ok(Self {
            name,
            columns,
            primary_key,
            on_created,
            exists_in_db: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Columns in declaration order.
    pub fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&ColumnMeta> {
        self.columns.iter().find(|c| c.name() == name)
    }

    pub fn primary_key(&self) -> &ColumnMeta {
        &self.columns[self.primary_key]
    }

    /// Statements run after CREATE TABLE, in declaration order.
    pub fn on_created(&self) -> &[String] {
        &self.on_created
    }

    /// Whether this engine has created or observed the physical table.
    ///
    /// Only reflects what went through the engine. Use
    /// [`StorageEngine::is_table_exists`](crate::StorageEngine::is_table_exists)
    /// for a live check.
    pub fn exists_in_db(&self) -> bool {
        self.exists_in_db.load(Ordering::Acquire)
    }

    pub(crate) fn set_exists_in_db(&self, exists: bool) {
        self.exists_in_db.store(exists, Ordering::Release);
    }
}

fn validate_columns(entity: &str, columns: Vec<Column>) -> StorageResult<Vec<ColumnMeta>> {
    if entity.trim().is_empty() {
        return Err(StorageError::schema(entity, "empty table name"));
    }
    if columns.is_empty() {
        return Err(StorageError::schema(entity, "no columns declared"));
    }

    let mut seen = HashSet::new();
    let mut metas = Vec::with_capacity(columns.len());
    for column in columns {
        if column.name.trim().is_empty() {
            return Err(StorageError::schema(entity, "empty column name"));
        }
        if !seen.insert(column.name.clone()) {
            return Err(StorageError::schema(
                entity,
                format!("duplicate column '{}'", column.name),
            ));
        }
        metas.push(ColumnMeta::from_column(column));
    }
    Ok(metas)
}

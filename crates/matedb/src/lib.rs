//! # matedb
//!
//! Embedded object-relational mapping core over SQLite.
//!
//! Mapped types declare their table statically ([`Entity`]) or a read
//! projection ([`Model`]). The [`StorageEngine`] derives and caches their
//! metadata once per type, creates tables lazily on first use, and runs
//! typed units of work ([`Dao`]) built from parameterized SQL.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  Dao (find / select / insert / ...)      │
//! ├─────────────────────────────────────────┤
//! │  StorageEngine                           │
//! │    SchemaCache<TableMeta>  (moka)        │
//! │    SchemaCache<ModelMeta>  (moka)        │
//! │    table lifecycle + versioning          │
//! ├─────────────────────────────────────────┤
//! │  SqlBuilder → SqlInfo (sql + args)       │
//! ├─────────────────────────────────────────┤
//! │  Executor / Database (rusqlite WAL)      │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```ignore
//! use matedb::{DbConfig, FindByIdDao, InsertDao, StorageEngine};
//!
//! let engine = StorageEngine::open(&DbConfig::in_memory().with_path("data/app.db"))?;
//! let id = engine.access(&InsertDao::new(&user))?;
//! let again = engine.access(&FindByIdDao::<User>::new(id))?;
//! ```

pub mod cache;
pub mod column;
pub mod config;
pub mod dao;
pub mod db;
pub mod engine;
pub mod error;
pub mod sql;
pub mod table;

// ── re-exports ───────────────────────────────────────────────────────

pub use cache::{CacheStats, SchemaCache};
pub use column::{Column, ColumnMeta, ForeignKey, SqlType};
pub use config::{DbConfig, PragmaConfig};
pub use dao::{
    CountDao, Dao, DeleteByIdDao, DeleteDao, ExecDao, FindAllDao, FindByIdDao, FindFirstDao,
    InsertDao, ModelSelectDao, SelectDao, UpdateDao,
};
pub use db::{Database, Executor};
pub use engine::{EngineBuilder, StorageEngine, TableCreatedHook, UpgradeHook};
pub use error::{StorageError, StorageResult};
pub use sql::{Intent, Op, Order, Query, SqlInfo, Where, quote_ident};
pub use table::{
    Entity, FromRow, Model, ModelDescriptor, ModelMeta, TableDescriptor, TableMeta,
    type_short_name,
};

pub use rusqlite::Row;
pub use rusqlite::types::Value;

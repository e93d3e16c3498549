//! Units of work executed against a [`StorageEngine`].
//!
//! A [`Dao`] bundles one operation with its inputs. The engine only knows
//! how to run a `Dao`; new query shapes are new implementations, not new
//! engine methods.
//!
//! ```
//! use matedb::{FindFirstDao, SqlInfo, StorageEngine};
//! # use matedb::FromRow;
//! # struct Answer(i64);
//! # impl FromRow for Answer {
//! #     fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> { Ok(Self(row.get(0)?)) }
//! # }
//!
//! let engine = StorageEngine::open_in_memory().unwrap();
//! let dao = FindFirstDao::<Answer>::new(SqlInfo::new("SELECT 42"));
//! let answer = engine.access(&dao).unwrap();
//! assert_eq!(answer.map(|a| a.0), Some(42));
//! ```
//!
//! Daos bound to an [`Entity`] create its table on first use.

use std::marker::PhantomData;

use rusqlite::types::Value;
use tracing::debug;

use crate::engine::StorageEngine;
use crate::error::{StorageError, StorageResult};
use crate::sql::{self, Intent, Query, SqlInfo, Where};
use crate::table::{Entity, FromRow, Model};

/// An operation that can run against an engine.
pub trait Dao {
    type Output;

    fn access(&self, engine: &StorageEngine) -> StorageResult<Self::Output>;
}

// ── raw SQL ──────────────────────────────────────────────────────────

/// First row of a query, or `None` for an empty result.
///
/// Only one row is read; with several matches the query's ordering decides
/// which one is returned.
#[derive(Debug, Clone)]
pub struct FindFirstDao<T> {
    sql: SqlInfo,
    _target: PhantomData<fn() -> T>,
}

impl<T: FromRow> FindFirstDao<T> {
    pub fn new(sql: impl Into<SqlInfo>) -> Self {
        Self {
            sql: sql.into(),
            _target: PhantomData,
        }
    }
}

impl<T: FromRow> Dao for FindFirstDao<T> {
    type Output = Option<T>;

    fn access(&self, engine: &StorageEngine) -> StorageResult<Option<T>> {
        engine.query_first(&self.sql)
    }
}

/// Every row of a query.
#[derive(Debug, Clone)]
pub struct FindAllDao<T> {
    sql: SqlInfo,
    _target: PhantomData<fn() -> T>,
}

impl<T: FromRow> FindAllDao<T> {
    pub fn new(sql: impl Into<SqlInfo>) -> Self {
        Self {
            sql: sql.into(),
            _target: PhantomData,
        }
    }
}

impl<T: FromRow> Dao for FindAllDao<T> {
    type Output = Vec<T>;

    fn access(&self, engine: &StorageEngine) -> StorageResult<Vec<T>> {
        engine.query_all(&self.sql)
    }
}

/// A statement that returns no rows; yields the affected row count.
#[derive(Debug, Clone)]
pub struct ExecDao {
    sql: SqlInfo,
}

impl ExecDao {
    pub fn new(sql: impl Into<SqlInfo>) -> Self {
        Self { sql: sql.into() }
    }
}

impl Dao for ExecDao {
    type Output = usize;

    fn access(&self, engine: &StorageEngine) -> StorageResult<usize> {
        engine.exec_non_query(&self.sql)
    }
}

// ── entity reads ─────────────────────────────────────────────────────

/// Row whose primary key equals `id`.
#[derive(Debug, Clone)]
pub struct FindByIdDao<T> {
    id: Value,
    _target: PhantomData<fn() -> T>,
}

impl<T: Entity> FindByIdDao<T> {
    pub fn new(id: impl Into<Value>) -> Self {
        Self {
            id: id.into(),
            _target: PhantomData,
        }
    }
}

impl<T: Entity> Dao for FindByIdDao<T> {
    type Output = Option<T>;

    fn access(&self, engine: &StorageEngine) -> StorageResult<Option<T>> {
        let table = engine.get_table::<T>()?;
        engine.create_table_if_not_exist::<T>()?;
        let query = Query::new()
            .filter(Where::eq(table.primary_key().name(), self.id.clone()))
            .limit(1);
        let select = sql::build(&table, Intent::SelectWhere(&query))?;
        engine.query_first(&select)
    }
}

/// Rows of `T`'s table matching a [`Query`].
#[derive(Debug, Clone)]
pub struct SelectDao<T> {
    query: Query,
    _target: PhantomData<fn() -> T>,
}

impl<T: Entity> SelectDao<T> {
    pub fn new(query: Query) -> Self {
        Self {
            query,
            _target: PhantomData,
        }
    }

    /// Every row, in table order.
    pub fn all() -> Self {
        Self::new(Query::new())
    }
}

impl<T: Entity> Dao for SelectDao<T> {
    type Output = Vec<T>;

    fn access(&self, engine: &StorageEngine) -> StorageResult<Vec<T>> {
        let table = engine.get_table::<T>()?;
        engine.create_table_if_not_exist::<T>()?;
        let select = sql::build(&table, Intent::SelectWhere(&self.query))?;
        engine.query_all(&select)
    }
}

/// Rows shaped by a [`Model`] projection. The source table is not created.
#[derive(Debug, Clone)]
pub struct ModelSelectDao<T> {
    query: Option<Query>,
    _target: PhantomData<fn() -> T>,
}

impl<T: Model> ModelSelectDao<T> {
    pub fn new(query: Option<Query>) -> Self {
        Self {
            query,
            _target: PhantomData,
        }
    }
}

impl<T: Model> Dao for ModelSelectDao<T> {
    type Output = Vec<T>;

    fn access(&self, engine: &StorageEngine) -> StorageResult<Vec<T>> {
        let model = engine.get_model::<T>()?;
        let select = sql::build_model_select(&model, self.query.as_ref())?;
        engine.query_all(&select)
    }
}

/// Number of rows, optionally filtered.
#[derive(Debug, Clone)]
pub struct CountDao<T> {
    filter: Option<Where>,
    _target: PhantomData<fn() -> T>,
}

impl<T: Entity> CountDao<T> {
    pub fn new(filter: Option<Where>) -> Self {
        Self {
            filter,
            _target: PhantomData,
        }
    }
}

impl<T: Entity> Dao for CountDao<T> {
    type Output = u64;

    fn access(&self, engine: &StorageEngine) -> StorageResult<u64> {
        let table = engine.get_table::<T>()?;
        engine.create_table_if_not_exist::<T>()?;
        let count = sql::build(&table, Intent::Count(self.filter.as_ref()))?;
        let mut total = 0i64;
        engine.executor().query(&count, &mut |row| {
            total = row.get(0)?;
            Ok(false)
        })?;
        Ok(u64::try_from(total).unwrap_or(0))
    }
}

// ── entity writes ────────────────────────────────────────────────────

/// Insert one entity; yields the new rowid.
///
/// A `NULL` auto-increment key is left out so SQLite assigns it.
#[derive(Debug)]
pub struct InsertDao<'a, T> {
    entity: &'a T,
}

impl<'a, T: Entity> InsertDao<'a, T> {
    pub fn new(entity: &'a T) -> Self {
        Self { entity }
    }
}

impl<T: Entity> Dao for InsertDao<'_, T> {
    type Output = i64;

    fn access(&self, engine: &StorageEngine) -> StorageResult<i64> {
        let table = engine.get_table::<T>()?;
        engine.create_table_if_not_exist::<T>()?;
        let values = self.entity.to_values();
        let insert = sql::build(&table, Intent::Insert(&values))?;
        let rowid = engine.exec_insert(&insert)?;
        debug!(table = table.name(), rowid, "row inserted");
        Ok(rowid)
    }
}

/// Update one entity's non-key columns, matched by its primary key.
#[derive(Debug)]
pub struct UpdateDao<'a, T> {
    entity: &'a T,
}

impl<'a, T: Entity> UpdateDao<'a, T> {
    pub fn new(entity: &'a T) -> Self {
        Self { entity }
    }
}

impl<T: Entity> Dao for UpdateDao<'_, T> {
    type Output = usize;

    fn access(&self, engine: &StorageEngine) -> StorageResult<usize> {
        let table = engine.get_table::<T>()?;
        engine.create_table_if_not_exist::<T>()?;
        let values = self.entity.to_values();
        let key = table.primary_key().name();
        let id = values
            .iter()
            .find(|(column, _)| *column == key)
            .map(|(_, value)| value.clone())
            .ok_or_else(|| {
                StorageError::InvalidArgument(format!(
                    "update of {} has no value for primary key '{key}'",
                    table.name()
                ))
            })?;
        let filter = Where::eq(key, id);
        let update = sql::build(
            &table,
            Intent::Update {
                values: &values,
                filter: Some(&filter),
            },
        )?;
        engine.exec_non_query(&update)
    }
}

/// Delete rows, optionally filtered. No filter empties the table.
#[derive(Debug, Clone)]
pub struct DeleteDao<T> {
    filter: Option<Where>,
    _target: PhantomData<fn() -> T>,
}

impl<T: Entity> DeleteDao<T> {
    pub fn new(filter: Option<Where>) -> Self {
        Self {
            filter,
            _target: PhantomData,
        }
    }
}

impl<T: Entity> Dao for DeleteDao<T> {
    type Output = usize;

    fn access(&self, engine: &StorageEngine) -> StorageResult<usize> {
        let table = engine.get_table::<T>()?;
        engine.create_table_if_not_exist::<T>()?;
        let delete = sql::build(&table, Intent::Delete(self.filter.as_ref()))?;
        engine.exec_non_query(&delete)
    }
}

/// Delete the row whose primary key equals `id`.
#[derive(Debug, Clone)]
pub struct DeleteByIdDao<T> {
    id: Value,
    _target: PhantomData<fn() -> T>,
}

impl<T: Entity> DeleteByIdDao<T> {
    pub fn new(id: impl Into<Value>) -> Self {
        Self {
            id: id.into(),
            _target: PhantomData,
        }
    }
}

impl<T: Entity> Dao for DeleteByIdDao<T> {
    type Output = usize;

    fn access(&self, engine: &StorageEngine) -> StorageResult<usize> {
        let table = engine.get_table::<T>()?;
        engine.create_table_if_not_exist::<T>()?;
        let filter = Where::eq(table.primary_key().name(), self.id.clone());
        let delete = sql::build(&table, Intent::Delete(Some(&filter)))?;
        engine.exec_non_query(&delete)
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use rusqlite::Row;

    use super::*;
    use crate::column::Column;
    use crate::sql::{Op, Order};
    use crate::table::{ModelDescriptor, TableDescriptor};

    #[derive(Debug, Clone, PartialEq)]
    struct Task {
        id: Option<i64>,
        title: String,
        done: bool,
    }

    impl Task {
        fn new(title: &str) -> Self {
            Self {
                id: None,
                title: title.to_string(),
                done: false,
            }
        }
    }

    impl FromRow for Task {
        fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
            Ok(Self {
                id: row.get("id")?,
                title: row.get("title")?,
                done: row.get("done")?,
            })
        }
    }

    impl Entity for Task {
        fn describe() -> TableDescriptor {
            TableDescriptor::for_type::<Self>()
                .column(Column::integer("id").primary_key().auto_increment())
                .column(Column::text("title").not_null())
                .column(Column::integer("done").not_null().default_value("0"))
        }

        fn to_values(&self) -> Vec<(&'static str, Value)> {
            vec![
                ("id", self.id.map_or(Value::Null, Value::Integer)),
                ("title", Value::Text(self.title.clone())),
                ("done", Value::Integer(i64::from(self.done))),
            ]
        }
    }

    struct Title(String);

    impl FromRow for Title {
        fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
            Ok(Self(row.get("title")?))
        }
    }

    impl Model for Title {
        fn describe() -> ModelDescriptor {
            ModelDescriptor::named("Task").column(Column::text("title"))
        }
    }

    fn engine_with(titles: &[&str]) -> StorageEngine {
        let engine = StorageEngine::open_in_memory().unwrap();
        for title in titles {
            engine.access(&InsertDao::new(&Task::new(title))).unwrap();
        }
        engine
    }

    #[test]
    fn find_first_on_empty_table_is_none() {
        let engine = engine_with(&[]);
        let dao = FindFirstDao::<Task>::new("SELECT * FROM \"Task\"");
        assert_eq!(engine.access(&dao).unwrap(), None);
    }

    #[test]
    fn find_first_returns_first_by_order() {
        let engine = engine_with(&["b", "a"]);
        let dao = FindFirstDao::<Task>::new("SELECT * FROM \"Task\" ORDER BY \"title\"");
        let first = engine.access(&dao).unwrap().unwrap();
        assert_eq!(first.title, "a");
    }

    #[test]
    fn find_first_bad_sql_is_statement_error() {
        let engine = engine_with(&[]);
        let dao = FindFirstDao::<Task>::new("SELECT * FROM nowhere");
        assert!(engine.access(&dao).unwrap_err().is_statement());
    }

    #[test]
    fn insert_creates_table_and_returns_rowid() {
        let engine = StorageEngine::open_in_memory().unwrap();
        assert!(!engine.is_table_exists::<Task>().unwrap());
        let first = engine.access(&InsertDao::new(&Task::new("a"))).unwrap();
        let second = engine.access(&InsertDao::new(&Task::new("b"))).unwrap();
        assert_eq!((first, second), (1, 2));
        assert!(engine.is_table_exists::<Task>().unwrap());
    }

    #[test]
    fn find_by_id_and_missing_id() {
        let engine = engine_with(&["a", "b"]);
        let found = engine.access(&FindByIdDao::<Task>::new(2i64)).unwrap();
        assert_eq!(found.map(|t| t.title), Some("b".to_string()));
        assert!(engine.access(&FindByIdDao::<Task>::new(99i64)).unwrap().is_none());
    }

    #[test]
    fn select_filters_orders_and_pages() {
        let engine = engine_with(&["a", "b", "c", "d"]);
        let query = Query::new()
            .filter(Where::new("id", Op::Gt(Value::Integer(1))))
            .order_by("id", Order::Desc)
            .limit(2);
        let titles: Vec<String> = engine
            .access(&SelectDao::<Task>::new(query))
            .unwrap()
            .into_iter()
            .map(|t| t.title)
            .collect();
        assert_eq!(titles, vec!["d", "c"]);
        assert_eq!(engine.access(&SelectDao::<Task>::all()).unwrap().len(), 4);
    }

    #[test]
    fn select_on_fresh_engine_creates_table() {
        let engine = StorageEngine::open_in_memory().unwrap();
        assert!(engine.access(&SelectDao::<Task>::all()).unwrap().is_empty());
        assert!(engine.is_table_exists::<Task>().unwrap());
    }

    #[test]
    fn update_by_primary_key() {
        let engine = engine_with(&["a", "b"]);
        let mut task = engine
            .access(&FindByIdDao::<Task>::new(1i64))
            .unwrap()
            .unwrap();
        task.done = true;
        task.title = "renamed".into();
        assert_eq!(engine.access(&UpdateDao::new(&task)).unwrap(), 1);

        let reread = engine
            .access(&FindByIdDao::<Task>::new(1i64))
            .unwrap()
            .unwrap();
        assert_eq!(reread, task);
        let other = engine
            .access(&FindByIdDao::<Task>::new(2i64))
            .unwrap()
            .unwrap();
        assert!(!other.done);
    }

    #[test]
    fn update_without_key_value_is_rejected() {
        let engine = engine_with(&[]);
        struct Keyless;
        impl FromRow for Keyless {
            fn from_row(_: &Row<'_>) -> rusqlite::Result<Self> {
                Ok(Self)
            }
        }
        impl Entity for Keyless {
            fn describe() -> TableDescriptor {
                TableDescriptor::for_type::<Self>()
                    .column(Column::integer("id").primary_key())
                    .column(Column::text("v"))
            }
            fn to_values(&self) -> Vec<(&'static str, Value)> {
                vec![("v", Value::Text("x".into()))]
            }
        }
        let err = engine.access(&UpdateDao::new(&Keyless)).unwrap_err();
        assert!(matches!(err, StorageError::InvalidArgument(_)));
    }

    #[test]
    fn count_and_delete() {
        let engine = engine_with(&["a", "b", "c"]);
        assert_eq!(engine.access(&CountDao::<Task>::new(None)).unwrap(), 3);

        let removed = engine
            .access(&DeleteDao::<Task>::new(Some(Where::eq("title", "a".to_string()))))
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(engine.access(&DeleteByIdDao::<Task>::new(2i64)).unwrap(), 1);
        assert_eq!(engine.access(&DeleteByIdDao::<Task>::new(2i64)).unwrap(), 0);

        let remaining = engine
            .access(&CountDao::<Task>::new(Some(Where::new("done", Op::Eq(Value::Integer(0))))))
            .unwrap();
        assert_eq!(remaining, 1);

        assert_eq!(engine.access(&DeleteDao::<Task>::new(None)).unwrap(), 1);
        assert_eq!(engine.access(&CountDao::<Task>::new(None)).unwrap(), 0);
    }

    #[test]
    fn filters_apply_left_to_right() {
        let engine = engine_with(&["a", "b", "c"]);
        let none = Where::eq("id", 1i64)
            .or("id", Op::Eq(Value::Integer(2)))
            .and("id", Op::Eq(Value::Integer(3)));
        assert_eq!(engine.access(&CountDao::<Task>::new(Some(none))).unwrap(), 0);

        let two = Where::eq("id", 3i64)
            .and("title", Op::Eq(Value::Text("c".into())))
            .or("id", Op::Eq(Value::Integer(1)));
        let ids: Vec<Option<i64>> = engine
            .access(&SelectDao::<Task>::new(
                Query::new().filter(two).order_by("id", Order::Asc),
            ))
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, vec![Some(1), Some(3)]);
    }

    #[test]
    fn model_select_projects_columns() {
        let engine = engine_with(&["x", "y"]);
        let titles: Vec<String> = engine
            .access(&ModelSelectDao::<Title>::new(Some(
                Query::new().order_by("title", Order::Desc),
            )))
            .unwrap()
            .into_iter()
            .map(|t| t.0)
            .collect();
        assert_eq!(titles, vec!["y", "x"]);
    }

    #[test]
    fn exec_and_find_all_raw_sql() {
        let engine = engine_with(&["a", "b"]);
        let changed = engine
            .access(&ExecDao::new(
                SqlInfo::new("UPDATE \"Task\" SET \"done\" = ?").with_arg(1i64),
            ))
            .unwrap();
        assert_eq!(changed, 2);
        let all = engine
            .access(&FindAllDao::<Task>::new("SELECT * FROM \"Task\" WHERE \"done\" = 1"))
            .unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn unknown_filter_column_is_invalid_argument() {
        let engine = engine_with(&[]);
        let err = engine
            .access(&CountDao::<Task>::new(Some(Where::eq("nope", 1i64))))
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidArgument(_)));
    }
}

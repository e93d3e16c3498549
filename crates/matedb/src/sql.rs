//! Parameterized SQL generation.
//!
//! [`build`] turns a [`TableMeta`] plus an [`Intent`] into a [`SqlInfo`]:
//! statement text with `?` placeholders and the matching bound arguments.
//! Values are always bound, never spliced into the text. Identifiers
//! cannot be bound, so they are double-quoted by [`quote_ident`].

use std::fmt::Write as _;

use rusqlite::types::Value;

use crate::column::ColumnMeta;
use crate::error::{StorageError, StorageResult};
use crate::table::{ModelMeta, TableMeta};

/// Quote an identifier the SQLite way: wrap in `"` and double inner `"`.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

// ── SqlInfo ──────────────────────────────────────────────────────────

/// One parameterized statement.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SqlInfo {
    sql: String,
    args: Vec<Value>,
}

impl SqlInfo {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            args: Vec::new(),
        }
    }

    pub fn with_arg(mut self, arg: impl Into<Value>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn with_args<I, V>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// Number of `?` placeholders outside string literals and quoted
    /// identifiers.
    pub fn placeholder_count(&self) -> usize {
        let mut count = 0;
        let mut quote: Option<char> = None;
        for ch in self.sql.chars() {
            match quote {
                Some(q) if ch == q => quote = None,
                Some(_) => {}
                None => match ch {
                    '\'' | '"' | '`' => quote = Some(ch),
                    '?' => count += 1,
                    _ => {}
                },
            }
        }
        count
    }
}

impl From<&str> for SqlInfo {
    fn from(sql: &str) -> Self {
        Self::new(sql)
    }
}

impl From<String> for SqlInfo {
    fn from(sql: String) -> Self {
        Self::new(sql)
    }
}

// ── selection ────────────────────────────────────────────────────────

/// Comparison applied to one column.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Eq(Value),
    NotEq(Value),
    Lt(Value),
    Le(Value),
    Gt(Value),
    Ge(Value),
    Like(String),
    In(Vec<Value>),
    IsNull,
    IsNotNull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Conjunction {
    And,
    Or,
}

/// Conditions joined left to right with AND / OR.
///
/// Each new conjunction applies to everything before it, so
/// `a.or(b).and(c)` renders as `(a OR b) AND c` rather than following
/// SQL's AND-before-OR precedence.
///
/// ```
/// use matedb::{Op, Where, Value};
///
/// let filter = Where::eq("status", "active".to_string())
///     .and("age", Op::Ge(Value::Integer(18)))
///     .or("role", Op::Eq(Value::Text("admin".into())));
/// # let _ = filter;
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Where {
    first: (String, Op),
    rest: Vec<(Conjunction, String, Op)>,
}

impl Where {
    pub fn new(column: impl Into<String>, op: Op) -> Self {
        Self {
            first: (column.into(), op),
            rest: Vec::new(),
        }
    }

    /// Shorthand for `Where::new(column, Op::Eq(value))`.
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(column, Op::Eq(value.into()))
    }

    pub fn and(mut self, column: impl Into<String>, op: Op) -> Self {
        self.rest.push((Conjunction::And, column.into(), op));
        self
    }

    pub fn or(mut self, column: impl Into<String>, op: Op) -> Self {
        self.rest.push((Conjunction::Or, column.into(), op));
        self
    }

    fn columns(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.first.0.as_str()).chain(self.rest.iter().map(|(_, c, _)| c.as_str()))
    }

    fn write_to(&self, sql: &mut String, args: &mut Vec<Value>) {
        // One opening paren per conjunction except the last, closed as
        // each conjunction ends.
        let nesting = self.rest.len().saturating_sub(1);
        sql.push_str(&"(".repeat(nesting));
        write_condition(sql, args, &self.first.0, &self.first.1);
        for (i, (conj, column, op)) in self.rest.iter().enumerate() {
            sql.push_str(match conj {
                Conjunction::And => " AND ",
                Conjunction::Or => " OR ",
            });
            write_condition(sql, args, column, op);
            if i < nesting {
                sql.push(')');
            }
        }
    }
}

fn write_condition(sql: &mut String, args: &mut Vec<Value>, column: &str, op: &Op) {
    let column = quote_ident(column);
    let (symbol, value) = match op {
        Op::Eq(v) => ("=", v.clone()),
        Op::NotEq(v) => ("<>", v.clone()),
        Op::Lt(v) => ("<", v.clone()),
        Op::Le(v) => ("<=", v.clone()),
        Op::Gt(v) => (">", v.clone()),
        Op::Ge(v) => (">=", v.clone()),
        Op::Like(pattern) => ("LIKE", Value::Text(pattern.clone())),
        Op::In(values) => {
            let marks = vec!["?"; values.len()].join(", ");
            let _ = write!(sql, "{column} IN ({marks})");
            args.extend(values.iter().cloned());
            return;
        }
        Op::IsNull => {
            let _ = write!(sql, "{column} IS NULL");
            return;
        }
        Op::IsNotNull => {
            let _ = write!(sql, "{column} IS NOT NULL");
            return;
        }
    };
    let _ = write!(sql, "{column} {symbol} ?");
    args.push(value);
}

/// Sort direction for [`Query::order_by`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

/// A single-table selection: filter, ordering and paging.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Query {
    filter: Option<Where>,
    order_by: Vec<(String, Order)>,
    limit: Option<u32>,
    offset: Option<u32>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Where) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, order: Order) -> Self {
        self.order_by.push((column.into(), order));
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    fn columns(&self) -> impl Iterator<Item = &str> {
        self.filter
            .iter()
            .flat_map(|w| w.columns())
            .chain(self.order_by.iter().map(|(c, _)| c.as_str()))
    }

    fn write_to(&self, sql: &mut String, args: &mut Vec<Value>) {
        if let Some(filter) = &self.filter {
            sql.push_str(" WHERE ");
            filter.write_to(sql, args);
        }
        if !self.order_by.is_empty() {
            let terms: Vec<String> = self
                .order_by
                .iter()
                .map(|(column, order)| {
                    let dir = match order {
                        Order::Asc => "ASC",
                        Order::Desc => "DESC",
                    };
                    format!("{} {dir}", quote_ident(column))
                })
                .collect();
            let _ = write!(sql, " ORDER BY {}", terms.join(", "));
        }
        match (self.limit, self.offset) {
            (Some(limit), offset) => {
                sql.push_str(" LIMIT ?");
                args.push(Value::Integer(i64::from(limit)));
                if let Some(offset) = offset {
                    sql.push_str(" OFFSET ?");
                    args.push(Value::Integer(i64::from(offset)));
                }
            }
            (None, Some(offset)) => {
                sql.push_str(" LIMIT -1 OFFSET ?");
                args.push(Value::Integer(i64::from(offset)));
            }
            (None, None) => {}
        }
    }
}

// ── builder ──────────────────────────────────────────────────────────

/// What a statement should do to a mapped table.
#[derive(Debug, Clone, Copy)]
pub enum Intent<'a> {
    CreateTable,
    /// `ALTER TABLE ... ADD COLUMN` for a declared column.
    AddColumn(&'a str),
    Insert(&'a [(&'a str, Value)]),
    /// Set every given non-key column on the rows matching `filter`.
    Update {
        values: &'a [(&'a str, Value)],
        filter: Option<&'a Where>,
    },
    Delete(Option<&'a Where>),
    SelectAll,
    SelectWhere(&'a Query),
    Count(Option<&'a Where>),
}

/// Build the statement for `intent` against `table`.
///
/// Unknown column names in values, filters or ordering are rejected with
/// [`StorageError::InvalidArgument`].
pub fn build(table: &TableMeta, intent: Intent<'_>) -> StorageResult<SqlInfo> {
    let name = quote_ident(table.name());
    match intent {
        Intent::CreateTable => Ok(create_table(table)),
        Intent::AddColumn(column) => {
            let column = table.column(column).ok_or_else(|| unknown_column(table.name(), column))?;
            Ok(SqlInfo::new(format!(
                "ALTER TABLE {name} ADD COLUMN {}",
                column.definition()
            )))
        }
        Intent::Insert(values) => insert(table, values),
        Intent::Update { values, filter } => update(table, values, filter),
        Intent::Delete(filter) => {
            let mut info = SqlInfo::new(format!("DELETE FROM {name}"));
            if let Some(filter) = filter {
                check_columns(table.name(), table.columns(), filter.columns())?;
                info.sql.push_str(" WHERE ");
                filter.write_to(&mut info.sql, &mut info.args);
            }
            Ok(info)
        }
        Intent::SelectAll => Ok(select(table.name(), table.columns())),
        Intent::SelectWhere(query) => {
            check_columns(table.name(), table.columns(), query.columns())?;
            let mut info = select(table.name(), table.columns());
            query.write_to(&mut info.sql, &mut info.args);
            Ok(info)
        }
        Intent::Count(filter) => {
            let mut info = SqlInfo::new(format!("SELECT COUNT(*) FROM {name}"));
            if let Some(filter) = filter {
                check_columns(table.name(), table.columns(), filter.columns())?;
                info.sql.push_str(" WHERE ");
                filter.write_to(&mut info.sql, &mut info.args);
            }
            Ok(info)
        }
    }
}

/// `SELECT` of a model's declared columns, optionally narrowed by `query`.
pub fn build_model_select(model: &ModelMeta, query: Option<&Query>) -> StorageResult<SqlInfo> {
    let mut info = select(model.name(), model.columns());
    if let Some(query) = query {
        check_columns(model.name(), model.columns(), query.columns())?;
        query.write_to(&mut info.sql, &mut info.args);
    }
    Ok(info)
}

fn create_table(table: &TableMeta) -> SqlInfo {
    let definitions: Vec<String> = table.columns().iter().map(ColumnMeta::definition).collect();
    SqlInfo::new(format!(
        "CREATE TABLE {} ({})",
        quote_ident(table.name()),
        definitions.join(", ")
    ))
}

fn select(name: &str, columns: &[ColumnMeta]) -> SqlInfo {
    let list: Vec<String> = columns.iter().map(|c| quote_ident(c.name())).collect();
    SqlInfo::new(format!("SELECT {} FROM {}", list.join(", "), quote_ident(name)))
}

fn insert(table: &TableMeta, values: &[(&str, Value)]) -> StorageResult<SqlInfo> {
    check_columns(table.name(), table.columns(), values.iter().map(|(c, _)| *c))?;

    let mut names = Vec::new();
    let mut args = Vec::new();
    for column in table.columns() {
        let Some((_, value)) = values.iter().find(|(c, _)| *c == column.name()) else {
            continue;
        };
        if column.is_auto_increment() && *value == Value::Null {
            continue;
        }
        names.push(quote_ident(column.name()));
        args.push(value.clone());
    }

    let name = quote_ident(table.name());
    let sql = if names.is_empty() {
        format!("INSERT INTO {name} DEFAULT VALUES")
    } else {
        let marks = vec!["?"; names.len()].join(", ");
        format!("INSERT INTO {name} ({}) VALUES ({marks})", names.join(", "))
    };
    Ok(SqlInfo { sql, args })
}

fn update(
    table: &TableMeta,
    values: &[(&str, Value)],
    filter: Option<&Where>,
) -> StorageResult<SqlInfo> {
    check_columns(table.name(), table.columns(), values.iter().map(|(c, _)| *c))?;

    let mut sets = Vec::new();
    let mut args = Vec::new();
    for column in table.columns().iter().filter(|c| !c.is_primary_key()) {
        if let Some((_, value)) = values.iter().find(|(c, _)| *c == column.name()) {
            sets.push(format!("{} = ?", quote_ident(column.name())));
            args.push(value.clone());
        }
    }
    if sets.is_empty() {
        return Err(StorageError::InvalidArgument(format!(
            "update of {} sets no columns",
            table.name()
        )));
    }

    let mut info = SqlInfo {
        sql: format!("UPDATE {} SET {}", quote_ident(table.name()), sets.join(", ")),
        args,
    };
    if let Some(filter) = filter {
        check_columns(table.name(), table.columns(), filter.columns())?;
        info.sql.push_str(" WHERE ");
        filter.write_to(&mut info.sql, &mut info.args);
    }
    Ok(info)
}

fn check_columns<'a>(
    entity: &str,
    columns: &[ColumnMeta],
    used: impl IntoIterator<Item = &'a str>,
) -> StorageResult<()> {
    for name in used {
        if !columns.iter().any(|c| c.name() == name) {
            return Err(unknown_column(entity, name));
        }
    }
    Ok(())
}

fn unknown_column(entity: &str, column: &str) -> StorageError {
    StorageError::InvalidArgument(format!("{entity} has no column '{column}'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::Column;
    use crate::table::{ModelDescriptor, TableDescriptor};

    fn user_table() -> TableMeta {
        TableMeta::derive(
            TableDescriptor::named("User")
                .column(Column::integer("id").primary_key().auto_increment())
                .column(Column::text("name").not_null())
                .column(Column::integer("age")),
        )
        .unwrap()
    }

    fn assert_balanced(info: &SqlInfo) {
        assert_eq!(info.placeholder_count(), info.args().len(), "{}", info.sql());
    }

    #[test]
    fn quote_ident_doubles_quotes() {
        assert_eq!(quote_ident("user"), "\"user\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn placeholder_count_ignores_quoted_text() {
        let info = SqlInfo::new("SELECT '?' , \"a?\" FROM t WHERE x = ? AND y = ?");
        assert_eq!(info.placeholder_count(), 2);
    }

    #[test]
    fn create_table_follows_declaration_order() {
        let info = build(&user_table(), Intent::CreateTable).unwrap();
        assert_eq!(
            info.sql(),
            "CREATE TABLE \"User\" (\"id\" INTEGER PRIMARY KEY AUTOINCREMENT, \
             \"name\" TEXT NOT NULL, \"age\" INTEGER)"
        );
        assert!(info.args().is_empty());
    }

    #[test]
    fn add_column_uses_declared_type() {
        let info = build(&user_table(), Intent::AddColumn("age")).unwrap();
        assert_eq!(info.sql(), "ALTER TABLE \"User\" ADD COLUMN \"age\" INTEGER");
        assert!(build(&user_table(), Intent::AddColumn("nope")).is_err());
    }

    #[test]
    fn insert_binds_values_and_skips_null_auto_key() {
        let values = [
            ("age", Value::Integer(30)),
            ("id", Value::Null),
            ("name", Value::Text("x'); DROP TABLE User; --".into())),
        ];
        let info = build(&user_table(), Intent::Insert(&values)).unwrap();
        assert_eq!(info.sql(), "INSERT INTO \"User\" (\"name\", \"age\") VALUES (?, ?)");
        assert_eq!(
            info.args(),
            &[Value::Text("x'); DROP TABLE User; --".into()), Value::Integer(30)]
        );
        assert_balanced(&info);
    }

    #[test]
    fn insert_rejects_unknown_column() {
        let values = [("bogus", Value::Integer(1))];
        let err = build(&user_table(), Intent::Insert(&values)).unwrap_err();
        assert!(matches!(err, StorageError::InvalidArgument(_)));
    }

    #[test]
    fn insert_without_values_uses_defaults() {
        let info = build(&user_table(), Intent::Insert(&[])).unwrap();
        assert_eq!(info.sql(), "INSERT INTO \"User\" DEFAULT VALUES");
    }

    #[test]
    fn update_skips_primary_key() {
        let values = [("id", Value::Integer(7)), ("name", Value::Text("n".into()))];
        let filter = Where::eq("id", 7i64);
        let info = build(
            &user_table(),
            Intent::Update {
                values: &values,
                filter: Some(&filter),
            },
        )
        .unwrap();
        assert_eq!(info.sql(), "UPDATE \"User\" SET \"name\" = ? WHERE \"id\" = ?");
        assert_eq!(info.args(), &[Value::Text("n".into()), Value::Integer(7)]);
    }

    #[test]
    fn update_with_only_key_is_rejected() {
        let values = [("id", Value::Integer(7))];
        let result = build(
            &user_table(),
            Intent::Update {
                values: &values,
                filter: None,
            },
        );
        assert!(result.is_err());
    }

    #[test]
    fn select_where_renders_operators() {
        let query = Query::new()
            .filter(
                Where::new("age", Op::Ge(Value::Integer(18)))
                    .and("name", Op::Like("a%".into()))
                    .or("id", Op::In(vec![Value::Integer(1), Value::Integer(2)]))
                    .and("age", Op::IsNotNull),
            )
            .order_by("name", Order::Desc)
            .limit(10)
            .offset(5);
        let info = build(&user_table(), Intent::SelectWhere(&query)).unwrap();
        assert_eq!(
            info.sql(),
            "SELECT \"id\", \"name\", \"age\" FROM \"User\" WHERE ((\"age\" >= ? AND \"name\" LIKE ?) \
             OR \"id\" IN (?, ?)) AND \"age\" IS NOT NULL ORDER BY \"name\" DESC LIMIT ? OFFSET ?"
        );
        assert_eq!(info.args().len(), 6);
        assert_balanced(&info);
    }

    #[test]
    fn where_groups_left_to_right() {
        let table = user_table();
        let two = Where::eq("id", 1i64).or("id", Op::Eq(Value::Integer(2)));
        let info = build(&table, Intent::Count(Some(&two))).unwrap();
        assert_eq!(
            info.sql(),
            "SELECT COUNT(*) FROM \"User\" WHERE \"id\" = ? OR \"id\" = ?"
        );

        let three = two.and("id", Op::Eq(Value::Integer(3)));
        let info = build(&table, Intent::Count(Some(&three))).unwrap();
        assert_eq!(
            info.sql(),
            "SELECT COUNT(*) FROM \"User\" WHERE (\"id\" = ? OR \"id\" = ?) AND \"id\" = ?"
        );
        assert_eq!(
            info.args(),
            &[Value::Integer(1), Value::Integer(2), Value::Integer(3)]
        );
        assert_balanced(&info);
    }

    #[test]
    fn offset_without_limit() {
        let query = Query::new().offset(3);
        let info = build(&user_table(), Intent::SelectWhere(&query)).unwrap();
        assert!(info.sql().ends_with("LIMIT -1 OFFSET ?"));
        assert_balanced(&info);
    }

    #[test]
    fn select_where_rejects_unknown_order_column() {
        let query = Query::new().order_by("missing", Order::Asc);
        assert!(build(&user_table(), Intent::SelectWhere(&query)).is_err());
    }

    #[test]
    fn delete_and_count() {
        let filter = Where::new("age", Op::Lt(Value::Integer(3)));
        let delete = build(&user_table(), Intent::Delete(Some(&filter))).unwrap();
        assert_eq!(delete.sql(), "DELETE FROM \"User\" WHERE \"age\" < ?");
        assert_balanced(&delete);

        let count = build(&user_table(), Intent::Count(None)).unwrap();
        assert_eq!(count.sql(), "SELECT COUNT(*) FROM \"User\"");
    }

    #[test]
    fn model_select_uses_model_columns() {
        let model = ModelMeta::derive(
            ModelDescriptor::named("User")
                .column(Column::text("name"))
                .column(Column::integer("age")),
        )
        .unwrap();
        let info = build_model_select(&model, None).unwrap();
        assert_eq!(info.sql(), "SELECT \"name\", \"age\" FROM \"User\"");

        let query = Query::new().filter(Where::eq("name", "a".to_string()));
        let info = build_model_select(&model, Some(&query)).unwrap();
        assert_eq!(info.args(), &[Value::Text("a".into())]);
    }

    #[test]
    fn sql_info_builder() {
        let info = SqlInfo::new("SELECT * FROM t WHERE a = ? AND b = ?")
            .with_arg(1i64)
            .with_args(["x".to_string()]);
        assert_eq!(info.args(), &[Value::Integer(1), Value::Text("x".into())]);
        assert_balanced(&info);
    }
}

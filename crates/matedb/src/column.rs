//! Column metadata.
//!
//! A [`Column`] is the declaration a mapped type hands to the engine; a
//! [`ColumnMeta`] is the validated, immutable form stored in a table or
//! model description.

use std::fmt;

use crate::sql::quote_ident;

/// SQLite storage class a column is declared with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlType {
    Integer,
    Text,
    Real,
    Blob,
    Numeric,
}

impl SqlType {
    /// Type name as written in DDL.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Integer => "INTEGER",
            Self::Text => "TEXT",
            Self::Real => "REAL",
            Self::Blob => "BLOB",
            Self::Numeric => "NUMERIC",
        }
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `REFERENCES table(column)` target of a column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    pub table: String,
    pub column: String,
}

/// Declaration of one mapped field.
///
/// ```
/// use matedb::Column;
///
/// let id = Column::integer("id").primary_key().auto_increment();
/// let email = Column::text("email").not_null().unique();
/// let score = Column::real("score").default_value("0.0");
/// # let _ = (id, email, score);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub(crate) name: String,
    pub(crate) sql_type: SqlType,
    pub(crate) primary_key: bool,
    pub(crate) auto_increment: bool,
    pub(crate) nullable: bool,
    pub(crate) unique: bool,
    pub(crate) default_value: Option<String>,
    pub(crate) foreign_key: Option<ForeignKey>,
}

impl Column {
    pub fn new(name: impl Into<String>, sql_type: SqlType) -> Self {
        Self {
            name: name.into(),
            sql_type,
            primary_key: false,
            auto_increment: false,
            nullable: true,
            unique: false,
            default_value: None,
            foreign_key: None,
        }
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, SqlType::Integer)
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, SqlType::Text)
    }

    pub fn real(name: impl Into<String>) -> Self {
        Self::new(name, SqlType::Real)
    }

    pub fn blob(name: impl Into<String>) -> Self {
        Self::new(name, SqlType::Blob)
    }

    /// Mark as the primary key. Primary keys are never nullable.
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    /// Let SQLite assign the key (`INTEGER PRIMARY KEY AUTOINCREMENT`).
    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Declared SQL default expression, e.g. `"0"`, `"'pending'"` or
    /// `"(datetime('now'))"`. Rendered verbatim into DDL.
    pub fn default_value(mut self, expr: impl Into<String>) -> Self {
        self.default_value = Some(expr.into());
        self
    }

    pub fn references(mut self, table: impl Into<String>, column: impl Into<String>) -> Self {
        self.foreign_key = Some(ForeignKey {
            table: table.into(),
            column: column.into(),
        });
        self
    }
}

/// Validated, immutable column description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMeta {
    name: String,
    sql_type: SqlType,
    is_primary_key: bool,
    auto_increment: bool,
    is_nullable: bool,
    unique: bool,
    default_value: Option<String>,
    foreign_key: Option<ForeignKey>,
}

impl ColumnMeta {
    pub(crate) fn from_column(column: Column) -> Self {
        Self {
            name: column.name,
            sql_type: column.sql_type,
            is_primary_key: column.primary_key,
            auto_increment: column.primary_key && column.auto_increment,
            is_nullable: column.nullable,
            unique: column.unique,
            default_value: column.default_value,
            foreign_key: column.foreign_key,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sql_type(&self) -> SqlType {
        self.sql_type
    }

    pub fn is_primary_key(&self) -> bool {
        self.is_primary_key
    }

    pub fn is_auto_increment(&self) -> bool {
        self.auto_increment
    }

    pub fn is_nullable(&self) -> bool {
        self.is_nullable
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }

    pub fn default_value(&self) -> Option<&str> {
        self.default_value.as_deref()
    }

    pub fn foreign_key(&self) -> Option<&ForeignKey> {
        self.foreign_key.as_ref()
    }

    /// Constraint clause following the type in a column definition.
    ///
    /// Primary key columns carry `PRIMARY KEY [AUTOINCREMENT]`; other
    /// columns carry `NOT NULL`, `UNIQUE`, `DEFAULT` and `REFERENCES` as
    /// declared. Empty when the column has no constraints.
    pub fn property(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        if self.is_primary_key {
            parts.push("PRIMARY KEY".to_string());
            if self.auto_increment {
                parts.push("AUTOINCREMENT".to_string());
            }
        } else {
            if !self.is_nullable {
                parts.push("NOT NULL".to_string());
            }
            if self.unique {
                parts.push("UNIQUE".to_string());
            }
        }
        if let Some(default) = &self.default_value {
            parts.push(format!("DEFAULT {default}"));
        }
        if let Some(fk) = &self.foreign_key {
            parts.push(format!(
                "REFERENCES {}({})",
                quote_ident(&fk.table),
                quote_ident(&fk.column)
            ));
        }
        parts.join(" ")
    }

    /// Full column definition: quoted name, type, property clause.
    pub fn definition(&self) -> String {
        let property = self.property();
        if property.is_empty() {
            format!("{} {}", quote_ident(&self.name), self.sql_type)
        } else {
            format!("{} {} {}", quote_ident(&self.name), self.sql_type, property)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_key_property() {
        let col = ColumnMeta::from_column(Column::integer("id").primary_key().auto_increment());
        assert!(col.is_primary_key());
        assert!(!col.is_nullable());
        assert_eq!(col.property(), "PRIMARY KEY AUTOINCREMENT");
        assert_eq!(col.definition(), "\"id\" INTEGER PRIMARY KEY AUTOINCREMENT");
    }

    #[test]
    fn auto_increment_requires_primary_key() {
        let col = ColumnMeta::from_column(Column::integer("n").auto_increment());
        assert!(!col.is_auto_increment());
        assert_eq!(col.property(), "");
    }

    #[test]
    fn constraint_clause_order() {
        let col = ColumnMeta::from_column(
            Column::text("status")
                .not_null()
                .unique()
                .default_value("'pending'"),
        );
        assert_eq!(col.property(), "NOT NULL UNIQUE DEFAULT 'pending'");
    }

    #[test]
    fn foreign_key_is_quoted() {
        let col = ColumnMeta::from_column(Column::integer("owner_id").references("User", "id"));
        assert_eq!(col.property(), "REFERENCES \"User\"(\"id\")");
    }

    #[test]
    fn plain_definition_has_no_trailing_space() {
        let col = ColumnMeta::from_column(Column::blob("payload"));
        assert_eq!(col.definition(), "\"payload\" BLOB");
    }
}

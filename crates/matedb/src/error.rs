//! Error types for the matedb crate.
//!
//! All storage operations return [`StorageError`] via [`StorageResult`].
//! Finding zero rows is never an error: lookups return `Option`/`Vec`.

use thiserror::Error;

/// Alias for `Result<T, StorageError>`.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in the storage engine.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A mapped type's descriptor is malformed (no columns, duplicate
    /// names, missing or repeated primary key, ...).
    #[error("schema error for {entity}: {reason}")]
    Schema { entity: String, reason: String },

    /// A statement failed to prepare or execute.
    #[error("statement failed: {source} (sql: {sql})")]
    Statement {
        sql: String,
        #[source]
        source: rusqlite::Error,
    },

    /// Connection-level SQLite failure (open, pragmas, row decoding).
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// An invalid argument was provided to a storage operation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The configuration could not be parsed.
    #[error("config error: {0}")]
    Config(String),

    /// Reading a configuration file failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The shared connection mutex was poisoned by a panicking holder.
    #[error("connection lock poisoned: {0}")]
    LockPoisoned(String),
}

impl StorageError {
    pub(crate) fn schema(entity: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Schema {
            entity: entity.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn statement(sql: &str, source: rusqlite::Error) -> Self {
        Self::Statement {
            sql: sql.to_string(),
            source,
        }
    }

    /// `true` for [`StorageError::Schema`].
    pub fn is_schema(&self) -> bool {
        matches!(self, Self::Schema { .. })
    }

    /// `true` for [`StorageError::Statement`].
    pub fn is_statement(&self) -> bool {
        matches!(self, Self::Statement { .. })
    }
}

impl From<toml::de::Error> for StorageError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}

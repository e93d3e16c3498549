//! Database configuration.
//!
//! [`DbConfig`] can be built in code or read from TOML:
//!
//! ```toml
//! path = "data/app.db"   # omit for an in-memory database
//! version = 2
//!
//! [pragmas]
//! journal_mode = "WAL"
//! synchronous = "NORMAL"
//! foreign_keys = true
//! busy_timeout_ms = 5000
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::StorageResult;

/// Where the database lives and which schema version it should be at.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    /// Database file; `None` opens an in-memory database.
    pub path: Option<PathBuf>,
    /// Schema version recorded in `PRAGMA user_version`.
    pub version: u32,
    pub pragmas: PragmaConfig,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: None,
            version: 1,
            pragmas: PragmaConfig::default(),
        }
    }
}

impl DbConfig {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn from_toml_str(text: &str) -> StorageResult<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> StorageResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}

/// Pragmas applied to every new connection.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PragmaConfig {
    pub journal_mode: String,
    pub synchronous: String,
    pub foreign_keys: bool,
    pub busy_timeout_ms: u32,
    /// Page cache size in KiB.
    pub cache_size_kib: Option<i64>,
    /// Memory-mapped I/O size in bytes.
    pub mmap_size: Option<i64>,
    pub temp_store_memory: bool,
}

impl Default for PragmaConfig {
    fn default() -> Self {
        Self {
            journal_mode: "WAL".to_string(),
            synchronous: "NORMAL".to_string(),
            foreign_keys: true,
            busy_timeout_ms: 5_000,
            cache_size_kib: None,
            mmap_size: None,
            temp_store_memory: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;

    #[test]
    fn defaults_are_in_memory() {
        let config = DbConfig::default();
        assert!(config.path.is_none());
        assert_eq!(config.version, 1);
        assert_eq!(config.pragmas.journal_mode, "WAL");
        assert!(config.pragmas.foreign_keys);
    }

    #[test]
    fn parse_full_toml() {
        let config = DbConfig::from_toml_str(
            r#"
            path = "data/app.db"
            version = 3

            [pragmas]
            journal_mode = "DELETE"
            synchronous = "FULL"
            foreign_keys = false
            busy_timeout_ms = 250
            cache_size_kib = 64000
            "#,
        )
        .unwrap();
        assert_eq!(config.path, Some(PathBuf::from("data/app.db")));
        assert_eq!(config.version, 3);
        assert_eq!(config.pragmas.journal_mode, "DELETE");
        assert!(!config.pragmas.foreign_keys);
        assert_eq!(config.pragmas.busy_timeout_ms, 250);
        assert_eq!(config.pragmas.cache_size_kib, Some(64_000));
        assert!(config.pragmas.temp_store_memory);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = DbConfig::from_toml_str("version = 7").unwrap();
        assert_eq!(config.version, 7);
        assert_eq!(config.pragmas, PragmaConfig::default());
    }

    #[test]
    fn malformed_toml_is_config_error() {
        let err = DbConfig::from_toml_str("version = \"seven\"").unwrap_err();
        assert!(matches!(err, StorageError::Config(_)));
    }

    #[test]
    fn from_file_reads_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.toml");
        std::fs::write(&path, "version = 2\n[pragmas]\nbusy_timeout_ms = 10\n").unwrap();
        let config = DbConfig::from_file(&path).unwrap();
        assert_eq!(config.version, 2);
        assert_eq!(config.pragmas.busy_timeout_ms, 10);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = DbConfig::from_file("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, StorageError::Io(_)));
    }
}

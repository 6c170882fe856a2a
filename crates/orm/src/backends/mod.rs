//! Dialect backends and driver contracts
//!
//! Value, row and querier contracts shared by every driver, the statement
//! builder, and one `DatabaseBackend` per SQL dialect.

pub mod backend;
pub mod core;
pub mod mysql;
pub mod postgres;
pub mod sqlite;
pub mod statements;

use std::sync::Arc;

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};

pub use backend::{DatabaseBackend, LoadRelatedOptions, RelationSource};
pub use core::*;
pub use mysql::MySqlBackend;
pub use postgres::PostgresBackend;
pub use sqlite::SqliteBackend;
pub use statements::{SelectOptions, StatementBuilder};

/// Driver family of an alias
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackendType {
    PostgreSQL,
    MySQL,
    SQLite,
}

impl DatabaseBackendType {
    pub fn sql_dialect(&self) -> SqlDialect {
        match self {
            DatabaseBackendType::PostgreSQL => SqlDialect::PostgreSQL,
            DatabaseBackendType::MySQL => SqlDialect::MySQL,
            DatabaseBackendType::SQLite => SqlDialect::SQLite,
        }
    }

    /// Guess the driver from a data source URL scheme
    pub fn from_data_source(data_source: &str) -> Option<Self> {
        let scheme = data_source.split(':').next()?.to_ascii_lowercase();
        scheme.parse().ok()
    }
}

impl DatabaseBackendType {
    /// Canonical driver name, as written in configuration
    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseBackendType::PostgreSQL => "postgresql",
            DatabaseBackendType::MySQL => "mysql",
            DatabaseBackendType::SQLite => "sqlite",
        }
    }
}

impl std::fmt::Display for DatabaseBackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DatabaseBackendType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let backend = match s.to_ascii_lowercase().as_str() {
            "postgresql" | "postgres" | "pgsql" => DatabaseBackendType::PostgreSQL,
            "mysql" | "mariadb" => DatabaseBackendType::MySQL,
            "sqlite" | "sqlite3" => DatabaseBackendType::SQLite,
            other => return Err(format!("unknown driver `{}`", other)),
        };
        Ok(backend)
    }
}

/// Select the backend strategy for a driver, bound to the alias timezone
pub fn backend_for(backend_type: DatabaseBackendType, timezone: FixedOffset) -> Arc<dyn DatabaseBackend> {
    match backend_type {
        DatabaseBackendType::PostgreSQL => Arc::new(PostgresBackend::new(timezone)),
        DatabaseBackendType::MySQL => Arc::new(MySqlBackend::new(timezone)),
        DatabaseBackendType::SQLite => Arc::new(SqliteBackend::new(timezone)),
    }
}

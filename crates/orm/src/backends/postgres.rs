//! PostgreSQL Backend
//!
//! `"ident"` quoting, `$n` placeholders, generated keys via `RETURNING`.

use chrono::{FixedOffset, Offset, Utc};

use super::backend::DatabaseBackend;
use super::core::SqlDialect;
use super::DatabaseBackendType;

/// PostgreSQL database backend implementation
#[derive(Debug, Clone, Copy)]
pub struct PostgresBackend {
    timezone: FixedOffset,
}

impl PostgresBackend {
    /// Create a backend whose offset-less timestamps are read in `timezone`
    pub fn new(timezone: FixedOffset) -> Self {
        Self { timezone }
    }
}

impl Default for PostgresBackend {
    fn default() -> Self {
        Self::new(Utc.fix())
    }
}

impl DatabaseBackend for PostgresBackend {
    fn backend_type(&self) -> DatabaseBackendType {
        DatabaseBackendType::PostgreSQL
    }

    fn sql_dialect(&self) -> SqlDialect {
        SqlDialect::PostgreSQL
    }

    fn timezone(&self) -> FixedOffset {
        self.timezone
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_postgres_statements() {
        let backend = PostgresBackend::default();
        let sql = backend.statements().insert("profile", &["age"], 1, Some("id"));
        assert_eq!(sql, r#"INSERT INTO "profile" ("age") VALUES ($1) RETURNING "id""#);
        assert_eq!(backend.timezone().local_minus_utc(), 0);
    }
}

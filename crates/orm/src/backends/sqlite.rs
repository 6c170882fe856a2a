//! SQLite Backend

use chrono::{FixedOffset, Offset, Utc};

use super::backend::DatabaseBackend;
use super::core::SqlDialect;
use super::DatabaseBackendType;

/// SQLite backend; generated keys come from `last_insert_rowid()` and
/// `read_for_update` has no locking clause
#[derive(Debug, Clone, Copy)]
pub struct SqliteBackend {
    timezone: FixedOffset,
}

impl SqliteBackend {
    pub fn new(timezone: FixedOffset) -> Self {
        Self { timezone }
    }
}

impl Default for SqliteBackend {
    fn default() -> Self {
        Self::new(Utc.fix())
    }
}

impl DatabaseBackend for SqliteBackend {
    fn backend_type(&self) -> DatabaseBackendType {
        DatabaseBackendType::SQLite
    }

    fn sql_dialect(&self) -> SqlDialect {
        SqlDialect::SQLite
    }

    fn timezone(&self) -> FixedOffset {
        self.timezone
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::SelectOptions;

    #[test]
    fn test_sqlite_has_no_lock_clause() {
        let backend = SqliteBackend::default();
        let options = SelectOptions {
            for_update: true,
            ..Default::default()
        };
        let sql = backend.statements().select("user", &["id", "name"], &["id"], &options);
        assert_eq!(sql, r#"SELECT "id", "name" FROM "user" WHERE "id" = ?"#);
    }
}

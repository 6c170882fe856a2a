//! Drivers - `DatabasePool` implementations
//!
//! sqlx-backed PostgreSQL and SQLite pools, and the recording `MockPool`.
//! MySQL statements are generated by the MySQL backend but there is no
//! bundled MySQL driver; bind one with `Alias::from_pool`.

pub mod mock;
pub mod postgres;
pub mod sqlite;

use std::sync::Arc;

use crate::backends::{DatabaseBackendType, DatabasePool};
use crate::config::AliasConfig;
use crate::error::{ConstraintKind, OrmError, OrmResult};

pub use mock::{MockPool, MockResponse, MockRow, RecordedStatement};
pub use postgres::PostgresPool;
pub use sqlite::SqlitePoolHandle;

/// Open a pool for the configured driver
pub async fn connect(config: &AliasConfig) -> OrmResult<Arc<dyn DatabasePool>> {
    match config.driver {
        DatabaseBackendType::PostgreSQL => Ok(Arc::new(PostgresPool::connect(config).await?)),
        DatabaseBackendType::SQLite => Ok(Arc::new(SqlitePoolHandle::connect(config).await?)),
        DatabaseBackendType::MySQL => Err(OrmError::Configuration(
            "no MySQL driver is bundled; bind a pool with Alias::from_pool".to_string(),
        )),
    }
}

/// Map a sqlx error onto the ORM taxonomy. Driver messages are kept verbatim.
pub(crate) fn classify_sqlx_error(err: sqlx::Error) -> OrmError {
    match &err {
        sqlx::Error::Database(db) => {
            let message = db.message().to_string();
            let kind = match db.kind() {
                sqlx::error::ErrorKind::UniqueViolation => Some(ConstraintKind::Unique),
                sqlx::error::ErrorKind::ForeignKeyViolation => Some(ConstraintKind::ForeignKey),
                sqlx::error::ErrorKind::NotNullViolation => Some(ConstraintKind::NotNull),
                sqlx::error::ErrorKind::CheckViolation => Some(ConstraintKind::Check),
                _ => None,
            };
            match kind {
                Some(kind) => OrmError::Constraint { kind, message },
                None => OrmError::Database(message),
            }
        }
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => OrmError::Connection(err.to_string()),
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) | sqlx::Error::TypeNotFound { .. } => {
            OrmError::Serialization(err.to_string())
        }
        sqlx::Error::Configuration(_) => OrmError::Configuration(err.to_string()),
        _ => OrmError::Database(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_connection_errors_are_classified() {
        assert_eq!(classify_sqlx_error(sqlx::Error::PoolTimedOut).kind(), ErrorKind::Connection);
        assert_eq!(classify_sqlx_error(sqlx::Error::PoolClosed).kind(), ErrorKind::Connection);
        assert_eq!(classify_sqlx_error(sqlx::Error::RowNotFound).kind(), ErrorKind::Database);
    }

    #[tokio::test]
    async fn test_mysql_needs_an_external_pool() {
        let config = AliasConfig::new(DatabaseBackendType::MySQL, "mysql://root@localhost/app");
        let err = connect(&config).await.err().map(|e| e.kind());
        assert_eq!(err, Some(ErrorKind::Configuration));
    }
}

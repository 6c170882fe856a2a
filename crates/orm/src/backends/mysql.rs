//! MySQL Backend
//!
//! Backtick quoting, `?` placeholders, generated keys from the driver's
//! last-insert-id. No driver is bundled for MySQL; the backend runs over
//! any `Querier` handed to it.

use chrono::{FixedOffset, Offset, Utc};

use super::backend::DatabaseBackend;
use super::core::SqlDialect;
use super::DatabaseBackendType;

#[derive(Debug, Clone, Copy)]
pub struct MySqlBackend {
    timezone: FixedOffset,
}

impl MySqlBackend {
    pub fn new(timezone: FixedOffset) -> Self {
        Self { timezone }
    }
}

impl Default for MySqlBackend {
    fn default() -> Self {
        Self::new(Utc.fix())
    }
}

impl DatabaseBackend for MySqlBackend {
    fn backend_type(&self) -> DatabaseBackendType {
        DatabaseBackendType::MySQL
    }

    fn sql_dialect(&self) -> SqlDialect {
        SqlDialect::MySQL
    }

    fn timezone(&self) -> FixedOffset {
        self.timezone
    }
}

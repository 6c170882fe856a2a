//! Transaction Management
//!
//! Isolation/read-only options applied when a transaction begins, and the
//! cancellation context a handle observes while one is open.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::backends::SqlDialect;

/// Transaction isolation levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    /// Convert to SQL string for SET TRANSACTION ISOLATION LEVEL command
    pub fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

/// Transaction configuration options
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionConfig {
    /// Transaction isolation level, `None` keeps the server default
    pub isolation_level: Option<IsolationLevel>,
    /// Whether the transaction is read-only
    pub read_only: bool,
}

impl TransactionConfig {
    pub fn with_isolation_level(mut self, level: IsolationLevel) -> Self {
        self.isolation_level = Some(level);
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Statements issued on the connection before BEGIN. MySQL only accepts
    /// `SET TRANSACTION` while no transaction is active; it then applies to
    /// the next one.
    pub fn prelude_statements(&self, dialect: SqlDialect) -> Vec<String> {
        match dialect {
            SqlDialect::MySQL => self.characteristics(),
            SqlDialect::PostgreSQL | SqlDialect::SQLite => Vec::new(),
        }
    }

    /// Statements issued right after BEGIN. SQLite has no per-transaction
    /// isolation or read-only switch.
    pub fn setup_statements(&self, dialect: SqlDialect) -> Vec<String> {
        match dialect {
            SqlDialect::PostgreSQL => self.characteristics(),
            SqlDialect::MySQL | SqlDialect::SQLite => Vec::new(),
        }
    }

    fn characteristics(&self) -> Vec<String> {
        let mut statements = Vec::new();
        if let Some(level) = self.isolation_level {
            statements.push(format!("SET TRANSACTION ISOLATION LEVEL {}", level.as_sql()));
        }
        if self.read_only {
            statements.push("SET TRANSACTION READ ONLY".to_string());
        }
        statements
    }
}

/// Cancellation and deadline observed by a transaction started with `begin_tx`
#[derive(Debug, Clone, Default)]
pub struct TxContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl TxContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observe an existing cancellation token
    pub fn with_token(token: CancellationToken) -> Self {
        Self { token, deadline: None }
    }

    /// Fire once `timeout` has elapsed from now
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_fired(&self) -> bool {
        self.token.is_cancelled() || self.deadline.map_or(false, |d| Instant::now() >= d)
    }

    /// Completes when the context is cancelled or its deadline passes
    pub async fn fired(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.token.cancelled().await,
        }
    }

    pub fn reason(&self) -> &'static str {
        if self.token.is_cancelled() {
            "transaction context cancelled"
        } else {
            "transaction deadline exceeded"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_statements_per_dialect() {
        let config = TransactionConfig::default()
            .with_isolation_level(IsolationLevel::Serializable)
            .read_only();
        assert_eq!(
            config.setup_statements(SqlDialect::PostgreSQL),
            vec![
                "SET TRANSACTION ISOLATION LEVEL SERIALIZABLE".to_string(),
                "SET TRANSACTION READ ONLY".to_string(),
            ]
        );
        assert!(config.prelude_statements(SqlDialect::PostgreSQL).is_empty());
        assert!(config.setup_statements(SqlDialect::SQLite).is_empty());
        assert!(config.prelude_statements(SqlDialect::SQLite).is_empty());
        assert!(TransactionConfig::default()
            .prelude_statements(SqlDialect::MySQL)
            .is_empty());
    }

    #[test]
    fn test_mysql_characteristics_precede_begin() {
        let config = TransactionConfig::default()
            .with_isolation_level(IsolationLevel::RepeatableRead)
            .read_only();
        assert!(config.setup_statements(SqlDialect::MySQL).is_empty());
        assert_eq!(
            config.prelude_statements(SqlDialect::MySQL),
            vec![
                "SET TRANSACTION ISOLATION LEVEL REPEATABLE READ".to_string(),
                "SET TRANSACTION READ ONLY".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_context_cancellation() {
        let ctx = TxContext::new();
        assert!(!ctx.is_fired());
        let observer = ctx.clone();
        ctx.cancel();
        observer.fired().await;
        assert!(observer.is_fired());
        assert_eq!(observer.reason(), "transaction context cancelled");
    }

    #[tokio::test(start_paused = true)]
    async fn test_context_deadline() {
        let ctx = TxContext::new().with_timeout(Duration::from_millis(50));
        assert!(!ctx.is_fired());
        ctx.fired().await;
        assert!(ctx.is_fired());
        assert_eq!(ctx.reason(), "transaction deadline exceeded");
    }
}

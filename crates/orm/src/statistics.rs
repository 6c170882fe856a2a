//! Usage statistics
//!
//! Every alias owns a [`UsageCounters`] that the handles bound to it bump
//! as they run statements and transactions. [`OrmStats`] is a point-in-time
//! snapshot of those counters plus the pool's connection numbers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::backends::DatabasePoolStats;

/// Statement categories counted separately
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Insert,
    Update,
    Delete,
    Read,
    Other,
}

impl StatementKind {
    /// Classify by the leading keyword
    pub fn of(sql: &str) -> Self {
        let keyword = sql.trim_start().split_whitespace().next().unwrap_or("");
        if keyword.eq_ignore_ascii_case("INSERT") {
            StatementKind::Insert
        } else if keyword.eq_ignore_ascii_case("UPDATE") {
            StatementKind::Update
        } else if keyword.eq_ignore_ascii_case("DELETE") {
            StatementKind::Delete
        } else if keyword.eq_ignore_ascii_case("SELECT") {
            StatementKind::Read
        } else {
            StatementKind::Other
        }
    }
}

/// Lock-free counters shared by every handle of one alias
#[derive(Debug)]
pub struct UsageCounters {
    statements: AtomicU64,
    inserts: AtomicU64,
    updates: AtomicU64,
    deletes: AtomicU64,
    reads: AtomicU64,
    transactions_begun: AtomicU64,
    transactions_committed: AtomicU64,
    transactions_rolled_back: AtomicU64,
    errors: AtomicU64,
    created_at: Instant,
}

impl Default for UsageCounters {
    fn default() -> Self {
        Self::new()
    }
}

impl UsageCounters {
    pub fn new() -> Self {
        Self {
            statements: AtomicU64::new(0),
            inserts: AtomicU64::new(0),
            updates: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
            reads: AtomicU64::new(0),
            transactions_begun: AtomicU64::new(0),
            transactions_committed: AtomicU64::new(0),
            transactions_rolled_back: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            created_at: Instant::now(),
        }
    }

    pub fn record_statement(&self, sql: &str) {
        self.statements.fetch_add(1, Ordering::Relaxed);
        let counter = match StatementKind::of(sql) {
            StatementKind::Insert => &self.inserts,
            StatementKind::Update => &self.updates,
            StatementKind::Delete => &self.deletes,
            StatementKind::Read => &self.reads,
            StatementKind::Other => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_begin(&self) {
        self.transactions_begun.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_commit(&self) {
        self.transactions_committed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rollback(&self) {
        self.transactions_rolled_back.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot the counters together with the pool's current numbers
    pub fn snapshot(&self, alias: &str, pool: DatabasePoolStats) -> OrmStats {
        OrmStats {
            alias: alias.to_string(),
            pool,
            statements: self.statements.load(Ordering::Relaxed),
            inserts: self.inserts.load(Ordering::Relaxed),
            updates: self.updates.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            reads: self.reads.load(Ordering::Relaxed),
            transactions_begun: self.transactions_begun.load(Ordering::Relaxed),
            transactions_committed: self.transactions_committed.load(Ordering::Relaxed),
            transactions_rolled_back: self.transactions_rolled_back.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            created_at: self.created_at,
        }
    }
}

/// Connection and usage numbers of one alias
#[derive(Debug, Clone)]
pub struct OrmStats {
    pub alias: String,
    pub pool: DatabasePoolStats,
    pub statements: u64,
    pub inserts: u64,
    pub updates: u64,
    pub deletes: u64,
    pub reads: u64,
    pub transactions_begun: u64,
    pub transactions_committed: u64,
    pub transactions_rolled_back: u64,
    pub errors: u64,
    pub created_at: Instant,
}

impl OrmStats {
    /// Failed statements as a percentage of all statements
    pub fn error_rate(&self) -> f64 {
        if self.statements > 0 {
            (self.errors as f64 / self.statements as f64) * 100.0
        } else {
            0.0
        }
    }

    pub fn uptime(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Active connections as a percentage of the pool size
    pub fn utilization(&self) -> f64 {
        if self.pool.total_connections > 0 {
            (self.pool.active_connections as f64 / self.pool.total_connections as f64) * 100.0
        } else {
            0.0
        }
    }

    /// Transactions begun but not yet committed or rolled back
    pub fn open_transactions(&self) -> u64 {
        self.transactions_begun
            .saturating_sub(self.transactions_committed + self.transactions_rolled_back)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_classification() {
        assert_eq!(StatementKind::of("  insert into x"), StatementKind::Insert);
        assert_eq!(StatementKind::of("SELECT COUNT(*) FROM x"), StatementKind::Read);
        assert_eq!(StatementKind::of("CREATE TABLE x"), StatementKind::Other);
        assert_eq!(StatementKind::of(""), StatementKind::Other);
    }

    #[test]
    fn test_snapshot_and_rates() {
        let counters = UsageCounters::new();
        counters.record_statement("INSERT INTO a VALUES (1)");
        counters.record_statement("UPDATE a SET b = 1");
        counters.record_statement("SELECT 1");
        counters.record_statement("DELETE FROM a");
        counters.record_error();
        counters.record_begin();
        counters.record_begin();
        counters.record_commit();

        let stats = counters.snapshot(
            "default",
            DatabasePoolStats {
                total_connections: 4,
                idle_connections: 3,
                active_connections: 1,
            },
        );
        assert_eq!(stats.statements, 4);
        assert_eq!((stats.inserts, stats.updates, stats.reads, stats.deletes), (1, 1, 1, 1));
        assert_eq!(stats.error_rate(), 25.0);
        assert_eq!(stats.utilization(), 25.0);
        assert_eq!(stats.open_transactions(), 1);
    }
}

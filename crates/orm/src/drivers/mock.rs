//! Recording driver for tests
//!
//! `MockPool` runs no SQL. It records every statement with its parameters,
//! answers with scripted responses when there are any, and otherwise
//! behaves like an empty database that hands out increasing ids per table.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::backends::{
    DatabasePool, DatabasePoolStats, DatabaseRow, DatabaseTransaction, DatabaseValue, ExecResult,
    Querier, SqlDialect,
};
use crate::error::{OrmError, OrmResult};
use crate::transaction::TransactionConfig;

/// One statement seen by the mock
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedStatement {
    pub sql: String,
    pub params: Vec<DatabaseValue>,
    pub in_transaction: bool,
}

/// Row handed back by the mock
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MockRow {
    columns: Vec<(String, DatabaseValue)>,
}

impl MockRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: &str, value: impl Into<DatabaseValue>) -> Self {
        self.columns.push((column.to_string(), value.into()));
        self
    }
}

impl DatabaseRow for MockRow {
    fn get_by_index(&self, index: usize) -> OrmResult<DatabaseValue> {
        self.columns
            .get(index)
            .map(|(_, value)| value.clone())
            .ok_or_else(|| OrmError::Database(format!("no column at position {}", index)))
    }

    fn get_by_name(&self, name: &str) -> OrmResult<DatabaseValue> {
        self.columns
            .iter()
            .find(|(column, _)| column == name)
            .map(|(_, value)| value.clone())
            .ok_or_else(|| OrmError::Database(format!("result has no column `{}`", name)))
    }

    fn column_count(&self) -> usize {
        self.columns.len()
    }

    fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|(column, _)| column.clone()).collect()
    }
}

/// Scripted answer to one statement
#[derive(Debug, Clone)]
pub enum MockResponse {
    Exec(ExecResult),
    Rows(Vec<MockRow>),
    Error(OrmError),
}

#[derive(Debug, Default)]
struct MockState {
    statements: Vec<RecordedStatement>,
    script: VecDeque<(Option<String>, MockResponse)>,
    ids: HashMap<String, i64>,
    open_transactions: u32,
}

/// In-memory recording pool
#[derive(Debug, Clone)]
pub struct MockPool {
    state: Arc<Mutex<MockState>>,
    dialect: SqlDialect,
    latency: Option<Duration>,
}

impl Default for MockPool {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPool {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            dialect: SqlDialect::MySQL,
            latency: None,
        }
    }

    /// Dialect used for transaction setup statements
    pub fn with_dialect(mut self, dialect: SqlDialect) -> Self {
        self.dialect = dialect;
        self
    }

    /// Delay every statement, e.g. to race it against a cancellation
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Answer the next statement with `response`
    pub fn push_response(&self, response: MockResponse) {
        self.lock().script.push_back((None, response));
    }

    /// Answer the next statement containing `pattern` with `response`
    pub fn respond_to(&self, pattern: &str, response: MockResponse) {
        self.lock().script.push_back((Some(pattern.to_string()), response));
    }

    pub fn push_rows(&self, rows: Vec<MockRow>) {
        self.push_response(MockResponse::Rows(rows));
    }

    pub fn push_error(&self, error: OrmError) {
        self.push_response(MockResponse::Error(error));
    }

    /// Next id handed out for `table` will be `next`
    pub fn set_next_id(&self, table: &str, next: i64) {
        self.lock().ids.insert(table.to_string(), next - 1);
    }

    pub fn statements(&self) -> Vec<RecordedStatement> {
        self.lock().statements.clone()
    }

    pub fn sql_log(&self) -> Vec<String> {
        self.lock().statements.iter().map(|s| s.sql.clone()).collect()
    }

    pub fn last_statement(&self) -> Option<RecordedStatement> {
        self.lock().statements.last().cloned()
    }

    pub fn clear(&self) {
        self.lock().statements.clear();
    }

    pub fn open_transactions(&self) -> u32 {
        self.lock().open_transactions
    }

    fn record_marker(&self, sql: &str) {
        self.lock().statements.push(RecordedStatement {
            sql: sql.to_string(),
            params: Vec::new(),
            in_transaction: true,
        });
    }

    async fn run(&self, sql: &str, params: &[DatabaseValue], in_transaction: bool) -> OrmResult<MockResponse> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.lock();
        state.statements.push(RecordedStatement {
            sql: sql.to_string(),
            params: params.to_vec(),
            in_transaction,
        });

        let scripted = state
            .script
            .iter()
            .position(|(pattern, _)| pattern.as_deref().map_or(true, |p| sql.contains(p)));
        if let Some(idx) = scripted {
            if let Some((_, response)) = state.script.remove(idx) {
                return match response {
                    MockResponse::Error(err) => Err(err),
                    other => Ok(other),
                };
            }
        }

        Ok(default_response(&mut state, sql))
    }
}

fn default_response(state: &mut MockState, sql: &str) -> MockResponse {
    let upper = sql.trim_start().to_ascii_uppercase();

    if upper.starts_with("INSERT") {
        let table = table_after(sql, "INTO").unwrap_or_default();
        let rows = 1 + sql.matches("), (").count() as u64;
        let counter = state.ids.entry(table).or_insert(0);
        *counter += rows as i64;
        let id = *counter;

        return match upper.find(" RETURNING ") {
            Some(pos) => {
                let column = sql[pos + " RETURNING ".len()..]
                    .trim()
                    .trim_matches(|c| c == '"' || c == '`')
                    .to_string();
                MockResponse::Rows(vec![MockRow::new().with(&column, id)])
            }
            None => MockResponse::Exec(ExecResult::new(rows, Some(id))),
        };
    }
    if upper.starts_with("SELECT COUNT(*)") {
        return MockResponse::Rows(vec![MockRow::new().with("COUNT(*)", 0i64)]);
    }
    if upper.starts_with("SELECT") {
        return MockResponse::Rows(Vec::new());
    }
    MockResponse::Exec(ExecResult::new(1, None))
}

fn table_after(sql: &str, keyword: &str) -> Option<String> {
    let mut words = sql.split_whitespace();
    words.find(|w| w.eq_ignore_ascii_case(keyword))?;
    words
        .next()
        .map(|w| w.trim_matches(|c| c == '"' || c == '`').to_string())
}

fn into_exec(response: MockResponse) -> ExecResult {
    match response {
        MockResponse::Exec(result) => result,
        MockResponse::Rows(rows) => ExecResult::new(rows.len() as u64, None),
        MockResponse::Error(_) => ExecResult::default(),
    }
}

fn into_rows(response: MockResponse) -> Vec<Box<dyn DatabaseRow>> {
    match response {
        MockResponse::Rows(rows) => rows
            .into_iter()
            .map(|row| Box::new(row) as Box<dyn DatabaseRow>)
            .collect(),
        _ => Vec::new(),
    }
}

#[async_trait]
impl DatabasePool for MockPool {
    async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> OrmResult<ExecResult> {
        Ok(into_exec(self.run(sql, params, false).await?))
    }

    async fn fetch_all(&self, sql: &str, params: &[DatabaseValue]) -> OrmResult<Vec<Box<dyn DatabaseRow>>> {
        Ok(into_rows(self.run(sql, params, false).await?))
    }

    async fn fetch_optional(&self, sql: &str, params: &[DatabaseValue]) -> OrmResult<Option<Box<dyn DatabaseRow>>> {
        Ok(into_rows(self.run(sql, params, false).await?).into_iter().next())
    }

    async fn begin_transaction(&self, config: &TransactionConfig) -> OrmResult<Box<dyn DatabaseTransaction>> {
        for statement in config.prelude_statements(self.dialect) {
            self.run(&statement, &[], false).await?;
        }
        self.record_marker("BEGIN");
        for statement in config.setup_statements(self.dialect) {
            self.run(&statement, &[], true).await?;
        }
        self.lock().open_transactions += 1;
        Ok(Box::new(MockTransaction {
            pool: self.clone(),
            finished: false,
        }))
    }

    async fn close(&self) -> OrmResult<()> {
        Ok(())
    }

    fn stats(&self) -> DatabasePoolStats {
        let active = self.lock().open_transactions;
        DatabasePoolStats {
            total_connections: active.max(1),
            idle_connections: if active == 0 { 1 } else { 0 },
            active_connections: active,
        }
    }
}

/// Transaction over a `MockPool`; records BEGIN / COMMIT / ROLLBACK markers
pub struct MockTransaction {
    pool: MockPool,
    finished: bool,
}

impl MockTransaction {
    fn finish(&mut self, marker: &str) {
        self.finished = true;
        self.pool.record_marker(marker);
        let mut state = self.pool.lock();
        state.open_transactions = state.open_transactions.saturating_sub(1);
    }
}

#[async_trait]
impl Querier for MockTransaction {
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> OrmResult<ExecResult> {
        Ok(into_exec(self.pool.run(sql, params, true).await?))
    }

    async fn fetch_all(&mut self, sql: &str, params: &[DatabaseValue]) -> OrmResult<Vec<Box<dyn DatabaseRow>>> {
        Ok(into_rows(self.pool.run(sql, params, true).await?))
    }

    async fn fetch_optional(&mut self, sql: &str, params: &[DatabaseValue]) -> OrmResult<Option<Box<dyn DatabaseRow>>> {
        Ok(into_rows(self.pool.run(sql, params, true).await?).into_iter().next())
    }
}

#[async_trait]
impl DatabaseTransaction for MockTransaction {
    fn as_querier(&mut self) -> &mut dyn Querier {
        self
    }

    async fn commit(mut self: Box<Self>) -> OrmResult<()> {
        self.finish("COMMIT");
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> OrmResult<()> {
        self.finish("ROLLBACK");
        Ok(())
    }
}

impl Drop for MockTransaction {
    fn drop(&mut self) {
        if !self.finished {
            self.finish("ROLLBACK");
        }
    }
}

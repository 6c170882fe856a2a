//! PostgreSQL driver
//!
//! `DatabasePool` over a sqlx `PgPool`. Transactions own their connection
//! (`Transaction<'static, Postgres>`), so they can outlive the call that
//! opened them.

use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::{Column, PgPool, Postgres, Row, TypeInfo, ValueRef};
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::backends::{
    DatabasePool, DatabasePoolStats, DatabaseRow, DatabaseTransaction, DatabaseValue, ExecResult,
    Querier, SqlDialect,
};
use crate::config::AliasConfig;
use crate::error::{OrmError, OrmResult};
use crate::transaction::TransactionConfig;

use super::classify_sqlx_error;

type PgQuery<'q> = sqlx::query::Query<'q, Postgres, PgArguments>;

/// PostgreSQL connection pool
#[derive(Debug, Clone)]
pub struct PostgresPool {
    pool: PgPool,
}

impl PostgresPool {
    /// Open a pool sized by the alias configuration
    pub async fn connect(config: &AliasConfig) -> OrmResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_open_conns)
            .min_connections(config.max_idle_conns.min(config.max_open_conns))
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.data_source)
            .await
            .map_err(|e| OrmError::Connection(format!("postgres connect to alias data source failed: {}", e)))?;
        Ok(Self { pool })
    }

    /// Wrap a pool created elsewhere
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn inner(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl DatabasePool for PostgresPool {
    async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> OrmResult<ExecResult> {
        let result = bind_all(sqlx::query(sql), params)?
            .execute(&self.pool)
            .await
            .map_err(classify_sqlx_error)?;
        Ok(ExecResult::new(result.rows_affected(), None))
    }

    async fn fetch_all(&self, sql: &str, params: &[DatabaseValue]) -> OrmResult<Vec<Box<dyn DatabaseRow>>> {
        let rows = bind_all(sqlx::query(sql), params)?
            .fetch_all(&self.pool)
            .await
            .map_err(classify_sqlx_error)?;
        Ok(rows.into_iter().map(boxed).collect())
    }

    async fn fetch_optional(&self, sql: &str, params: &[DatabaseValue]) -> OrmResult<Option<Box<dyn DatabaseRow>>> {
        let row = bind_all(sqlx::query(sql), params)?
            .fetch_optional(&self.pool)
            .await
            .map_err(classify_sqlx_error)?;
        Ok(row.map(boxed))
    }

    async fn begin_transaction(&self, config: &TransactionConfig) -> OrmResult<Box<dyn DatabaseTransaction>> {
        let mut tx = self.pool.begin().await.map_err(classify_sqlx_error)?;
        for setup in config.setup_statements(SqlDialect::PostgreSQL) {
            if let Err(e) = sqlx::query(&setup).execute(&mut *tx).await {
                return Err(OrmError::TransactionState(format!("`{}` rejected: {}", setup, e)));
            }
        }
        debug!(?config, "postgres transaction open");

        Ok(Box::new(PostgresTransaction { tx: Some(tx) }))
    }

    async fn close(&self) -> OrmResult<()> {
        self.pool.close().await;
        Ok(())
    }

    fn stats(&self) -> DatabasePoolStats {
        DatabasePoolStats::from_counts(self.pool.size(), self.pool.num_idle() as u32)
    }
}

/// Open transaction pinned to one pooled connection
pub struct PostgresTransaction {
    tx: Option<sqlx::Transaction<'static, Postgres>>,
}

impl PostgresTransaction {
    fn open(&mut self) -> OrmResult<&mut sqlx::Transaction<'static, Postgres>> {
        self.tx.as_mut().ok_or_else(finished)
    }

    fn take(&mut self) -> OrmResult<sqlx::Transaction<'static, Postgres>> {
        self.tx.take().ok_or_else(finished)
    }
}

fn finished() -> OrmError {
    OrmError::TransactionState("postgres transaction already finished".to_string())
}

#[async_trait]
impl Querier for PostgresTransaction {
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> OrmResult<ExecResult> {
        let query = bind_all(sqlx::query(sql), params)?;
        let tx = self.open()?;
        let result = query.execute(&mut **tx).await.map_err(classify_sqlx_error)?;
        Ok(ExecResult::new(result.rows_affected(), None))
    }

    async fn fetch_all(&mut self, sql: &str, params: &[DatabaseValue]) -> OrmResult<Vec<Box<dyn DatabaseRow>>> {
        let query = bind_all(sqlx::query(sql), params)?;
        let tx = self.open()?;
        let rows = query.fetch_all(&mut **tx).await.map_err(classify_sqlx_error)?;
        Ok(rows.into_iter().map(boxed).collect())
    }

    async fn fetch_optional(&mut self, sql: &str, params: &[DatabaseValue]) -> OrmResult<Option<Box<dyn DatabaseRow>>> {
        let query = bind_all(sqlx::query(sql), params)?;
        let tx = self.open()?;
        let row = query.fetch_optional(&mut **tx).await.map_err(classify_sqlx_error)?;
        Ok(row.map(boxed))
    }
}

#[async_trait]
impl DatabaseTransaction for PostgresTransaction {
    fn as_querier(&mut self) -> &mut dyn Querier {
        self
    }

    async fn commit(mut self: Box<Self>) -> OrmResult<()> {
        self.take()?.commit().await.map_err(classify_sqlx_error)
    }

    async fn rollback(mut self: Box<Self>) -> OrmResult<()> {
        self.take()?.rollback().await.map_err(classify_sqlx_error)
    }
}

pub struct PostgresRow {
    row: PgRow,
}

impl PostgresRow {
    pub fn new(row: PgRow) -> Self {
        Self { row }
    }
}

fn boxed(row: PgRow) -> Box<dyn DatabaseRow> {
    Box::new(PostgresRow::new(row))
}

impl DatabaseRow for PostgresRow {
    fn get_by_index(&self, index: usize) -> OrmResult<DatabaseValue> {
        match index < self.row.len() {
            true => decode_column(&self.row, index),
            false => Err(OrmError::Database(format!("no column at position {}", index))),
        }
    }

    fn get_by_name(&self, name: &str) -> OrmResult<DatabaseValue> {
        match self.row.columns().iter().position(|c| c.name() == name) {
            Some(index) => decode_column(&self.row, index),
            None => Err(OrmError::Database(format!("result has no column `{}`", name))),
        }
    }

    fn column_count(&self) -> usize {
        self.row.len()
    }

    fn column_names(&self) -> Vec<String> {
        self.row.columns().iter().map(|c| c.name().to_owned()).collect()
    }
}

fn bind_all<'q>(query: PgQuery<'q>, params: &[DatabaseValue]) -> OrmResult<PgQuery<'q>> {
    params.iter().try_fold(query, bind_value)
}

fn bind_value<'q>(query: PgQuery<'q>, value: &DatabaseValue) -> OrmResult<PgQuery<'q>> {
    Ok(match value {
        DatabaseValue::Null => query.bind(Option::<String>::None),
        DatabaseValue::Bool(b) => query.bind(*b),
        DatabaseValue::Int32(i) => query.bind(*i),
        DatabaseValue::Int64(i) => query.bind(*i),
        DatabaseValue::Float32(f) => query.bind(*f),
        DatabaseValue::Float64(f) => query.bind(*f),
        DatabaseValue::String(s) => query.bind(s.clone()),
        DatabaseValue::Bytes(b) => query.bind(b.clone()),
        DatabaseValue::Uuid(u) => query.bind(*u),
        DatabaseValue::DateTime(dt) => query.bind(*dt),
        DatabaseValue::Date(d) => query.bind(*d),
        DatabaseValue::Time(t) => query.bind(*t),
        DatabaseValue::Json(j) => query.bind(j.clone()),
        DatabaseValue::Array(items) => {
            if items.iter().all(|v| matches!(v, DatabaseValue::String(_))) {
                let strings: Vec<String> = items
                    .iter()
                    .filter_map(|v| match v {
                        DatabaseValue::String(s) => Some(s.clone()),
                        _ => None,
                    })
                    .collect();
                query.bind(strings)
            } else if let Some(ints) = items.iter().map(DatabaseValue::as_i64).collect::<Option<Vec<i64>>>() {
                query.bind(ints)
            } else {
                return Err(OrmError::Serialization(
                    "PostgreSQL arrays must hold only strings or only integers".to_string(),
                ));
            }
        }
    })
}

/// Decode by Postgres type name; unknown types fall back to text
fn decode_column(row: &PgRow, index: usize) -> OrmResult<DatabaseValue> {
    let raw = row.try_get_raw(index).map_err(classify_sqlx_error)?;
    if raw.is_null() {
        return Ok(DatabaseValue::Null);
    }
    let type_name = row.columns()[index].type_info().name().to_string();

    fn get<'r, T>(row: &'r PgRow, index: usize) -> OrmResult<T>
    where
        T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
    {
        row.try_get(index).map_err(classify_sqlx_error)
    }

    Ok(match type_name.as_str() {
        "BOOL" => DatabaseValue::Bool(get(row, index)?),
        "INT2" => DatabaseValue::Int32(i32::from(get::<i16>(row, index)?)),
        "INT4" => DatabaseValue::Int32(get(row, index)?),
        "INT8" => DatabaseValue::Int64(get(row, index)?),
        "FLOAT4" => DatabaseValue::Float32(get(row, index)?),
        "FLOAT8" => DatabaseValue::Float64(get(row, index)?),
        "NUMERIC" => DatabaseValue::String(get::<rust_decimal::Decimal>(row, index)?.to_string()),
        "BYTEA" => DatabaseValue::Bytes(get(row, index)?),
        "UUID" => DatabaseValue::Uuid(get(row, index)?),
        "TIMESTAMPTZ" => DatabaseValue::DateTime(get(row, index)?),
        "TIMESTAMP" => DatabaseValue::DateTime(get::<chrono::NaiveDateTime>(row, index)?.and_utc()),
        "DATE" => DatabaseValue::Date(get(row, index)?),
        "TIME" => DatabaseValue::Time(get(row, index)?),
        "JSON" | "JSONB" => DatabaseValue::Json(get::<JsonValue>(row, index)?),
        "TEXT[]" | "VARCHAR[]" => DatabaseValue::from(get::<Vec<String>>(row, index)?),
        "INT8[]" => DatabaseValue::Array(
            get::<Vec<i64>>(row, index)?
                .into_iter()
                .map(DatabaseValue::Int64)
                .collect(),
        ),
        _ => DatabaseValue::String(get(row, index)?),
    })
}

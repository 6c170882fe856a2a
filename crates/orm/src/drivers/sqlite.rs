//! SQLite driver
//!
//! SQLite stores every value in one of five storage classes, so binding
//! flattens uuids, timestamps and JSON to text and decoding follows the
//! storage class of each value rather than the declared column type.

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row, Sqlite, SqlitePool, TypeInfo, ValueRef};
use tracing::debug;

use crate::backends::{
    DatabasePool, DatabasePoolStats, DatabaseRow, DatabaseTransaction, DatabaseValue, ExecResult,
    Querier,
};
use crate::config::AliasConfig;
use crate::error::{OrmError, OrmResult};
use crate::transaction::TransactionConfig;

use super::classify_sqlx_error;

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

/// SQLite connection pool
#[derive(Debug, Clone)]
pub struct SqlitePoolHandle {
    pool: SqlitePool,
}

fn is_memory(data_source: &str) -> bool {
    data_source.contains(":memory:") || data_source.contains("mode=memory")
}

impl SqlitePoolHandle {
    /// Open a pool. In-memory databases live in a single connection that
    /// is never recycled.
    pub async fn connect(config: &AliasConfig) -> OrmResult<Self> {
        let options = SqliteConnectOptions::from_str(&config.data_source)
            .map_err(|e| OrmError::Configuration(format!("bad sqlite data source: {}", e)))?
            .create_if_missing(true)
            .foreign_keys(true);

        let mut pool_options = SqlitePoolOptions::new().acquire_timeout(config.acquire_timeout);
        pool_options = if is_memory(&config.data_source) {
            pool_options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            pool_options
                .max_connections(config.max_open_conns)
                .min_connections(config.max_idle_conns.min(config.max_open_conns))
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| OrmError::Connection(format!("sqlite open failed: {}", e)))?;
        Ok(Self { pool })
    }

    /// Wrap a pool created elsewhere
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn inner(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl DatabasePool for SqlitePoolHandle {
    async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> OrmResult<ExecResult> {
        let result = bind_all(sqlx::query(sql), params)?
            .execute(&self.pool)
            .await
            .map_err(classify_sqlx_error)?;
        Ok(ExecResult::new(result.rows_affected(), Some(result.last_insert_rowid())))
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
        if config.isolation_level.is_some() || config.read_only {
            debug!(?config, "SQLite ignores transaction isolation and read-only options");
        }
        let tx = self.pool.begin().await.map_err(classify_sqlx_error)?;
        Ok(Box::new(SqliteTransaction { tx: Some(tx) }))
    }

    async fn close(&self) -> OrmResult<()> {
        self.pool.close().await;
        Ok(())
    }

    fn stats(&self) -> DatabasePoolStats {
        DatabasePoolStats::from_counts(self.pool.size(), self.pool.num_idle() as u32)
    }
}

pub struct SqliteTransaction {
    tx: Option<sqlx::Transaction<'static, Sqlite>>,
}

impl SqliteTransaction {
    fn open(&mut self) -> OrmResult<&mut sqlx::Transaction<'static, Sqlite>> {
        self.tx.as_mut().ok_or_else(finished)
    }

    fn take(&mut self) -> OrmResult<sqlx::Transaction<'static, Sqlite>> {
        self.tx.take().ok_or_else(finished)
    }
}

fn finished() -> OrmError {
    OrmError::TransactionState("sqlite transaction already finished".to_string())
}

#[async_trait]
impl Querier for SqliteTransaction {
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> OrmResult<ExecResult> {
        let query = bind_all(sqlx::query(sql), params)?;
        let tx = self.open()?;
        let result = query.execute(&mut **tx).await.map_err(classify_sqlx_error)?;
        Ok(ExecResult::new(result.rows_affected(), Some(result.last_insert_rowid())))
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
impl DatabaseTransaction for SqliteTransaction {
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

struct SqliteDbRow {
    row: SqliteRow,
}

fn boxed(row: SqliteRow) -> Box<dyn DatabaseRow> {
    Box::new(SqliteDbRow { row })
}

impl DatabaseRow for SqliteDbRow {
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

fn bind_all<'q>(mut query: SqliteQuery<'q>, params: &[DatabaseValue]) -> OrmResult<SqliteQuery<'q>> {
    for param in params {
        query = match param {
            DatabaseValue::Null => query.bind(Option::<String>::None),
            DatabaseValue::Bool(b) => query.bind(*b),
            DatabaseValue::Int32(i) => query.bind(*i),
            DatabaseValue::Int64(i) => query.bind(*i),
            DatabaseValue::Float32(f) => query.bind(f64::from(*f)),
            DatabaseValue::Float64(f) => query.bind(*f),
            DatabaseValue::String(s) => query.bind(s.clone()),
            DatabaseValue::Bytes(b) => query.bind(b.clone()),
            DatabaseValue::Uuid(u) => query.bind(u.to_string()),
            DatabaseValue::DateTime(dt) => query.bind(dt.to_rfc3339()),
            DatabaseValue::Date(d) => query.bind(d.format("%Y-%m-%d").to_string()),
            DatabaseValue::Time(t) => query.bind(t.format("%H:%M:%S%.f").to_string()),
            DatabaseValue::Json(j) => query.bind(serde_json::to_string(j)?),
            array @ DatabaseValue::Array(_) => query.bind(serde_json::to_string(&array.to_json())?),
        };
    }
    Ok(query)
}

fn decode_column(row: &SqliteRow, index: usize) -> OrmResult<DatabaseValue> {
    let raw = row.try_get_raw(index).map_err(classify_sqlx_error)?;
    if raw.is_null() {
        return Ok(DatabaseValue::Null);
    }
    let storage = raw.type_info().name().to_ascii_uppercase();

    Ok(match storage.as_str() {
        "INTEGER" | "INT" | "BIGINT" | "BOOLEAN" => {
            DatabaseValue::Int64(row.try_get_unchecked::<i64, _>(index).map_err(classify_sqlx_error)?)
        }
        "REAL" | "FLOAT" | "DOUBLE" | "NUMERIC" => {
            DatabaseValue::Float64(row.try_get_unchecked::<f64, _>(index).map_err(classify_sqlx_error)?)
        }
        "BLOB" => DatabaseValue::Bytes(
            row.try_get_unchecked::<Vec<u8>, _>(index)
                .map_err(classify_sqlx_error)?,
        ),
        _ => DatabaseValue::String(
            row.try_get_unchecked::<String, _>(index)
                .map_err(classify_sqlx_error)?,
        ),
    })
}

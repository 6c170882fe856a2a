//! Core Database Abstractions
//!
//! Values, rows and the statement-execution contract shared by every driver
//! and dialect. A [`Querier`] is anything that can run a statement: a pool
//! handing out connections, or one open transaction. Backends only ever
//! talk to a `Querier`, so the same insert/read/update code runs unchanged
//! inside and outside a transaction.

use std::fmt;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::error::OrmResult;
use crate::transaction::TransactionConfig;

/// Outcome of a statement that does not return rows
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecResult {
    pub rows_affected: u64,
    /// Identifier generated by the statement, when the driver reports one
    pub last_insert_id: Option<i64>,
}

impl ExecResult {
    pub fn new(rows_affected: u64, last_insert_id: Option<i64>) -> Self {
        Self { rows_affected, last_insert_id }
    }
}

/// Uniform statement execution over a pooled connection or a transaction
#[async_trait]
pub trait Querier: Send {
    /// Execute a statement and report affected rows / generated id
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> OrmResult<ExecResult>;

    /// Execute a query and return all result rows
    async fn fetch_all(&mut self, sql: &str, params: &[DatabaseValue]) -> OrmResult<Vec<Box<dyn DatabaseRow>>>;

    /// Execute a query and return the first result row
    async fn fetch_optional(&mut self, sql: &str, params: &[DatabaseValue]) -> OrmResult<Option<Box<dyn DatabaseRow>>>;
}

/// An open transaction
#[async_trait]
pub trait DatabaseTransaction: Querier {
    /// View this transaction as a plain querier
    fn as_querier(&mut self) -> &mut dyn Querier;

    /// Commit the transaction
    async fn commit(self: Box<Self>) -> OrmResult<()>;

    /// Rollback the transaction
    async fn rollback(self: Box<Self>) -> OrmResult<()>;
}

/// Connection pool owned by an alias
#[async_trait]
pub trait DatabasePool: Send + Sync {
    /// Execute a statement on any pooled connection
    async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> OrmResult<ExecResult>;

    /// Execute a query on any pooled connection and return all rows
    async fn fetch_all(&self, sql: &str, params: &[DatabaseValue]) -> OrmResult<Vec<Box<dyn DatabaseRow>>>;

    /// Execute a query on any pooled connection and return the first row
    async fn fetch_optional(&self, sql: &str, params: &[DatabaseValue]) -> OrmResult<Option<Box<dyn DatabaseRow>>>;

    /// Begin a transaction on a dedicated connection
    async fn begin_transaction(&self, config: &TransactionConfig) -> OrmResult<Box<dyn DatabaseTransaction>>;

    /// Close the pool
    async fn close(&self) -> OrmResult<()>;

    /// Get pool statistics
    fn stats(&self) -> DatabasePoolStats;
}

/// A pool borrowed as a [`Querier`]; each statement may run on a different connection
pub struct PoolQuerier<'a> {
    pool: &'a dyn DatabasePool,
}

impl<'a> PoolQuerier<'a> {
    pub fn new(pool: &'a dyn DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Querier for PoolQuerier<'_> {
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> OrmResult<ExecResult> {
        self.pool.execute(sql, params).await
    }

    async fn fetch_all(&mut self, sql: &str, params: &[DatabaseValue]) -> OrmResult<Vec<Box<dyn DatabaseRow>>> {
        self.pool.fetch_all(sql, params).await
    }

    async fn fetch_optional(&mut self, sql: &str, params: &[DatabaseValue]) -> OrmResult<Option<Box<dyn DatabaseRow>>> {
        self.pool.fetch_optional(sql, params).await
    }
}

/// Connection counts reported by a pool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct DatabasePoolStats {
    pub total_connections: u32,
    pub idle_connections: u32,
    pub active_connections: u32,
}

impl DatabasePoolStats {
    pub fn from_counts(total: u32, idle: u32) -> Self {
        Self {
            total_connections: total,
            idle_connections: idle,
            active_connections: total.saturating_sub(idle),
        }
    }
}

/// One fetched row. Drivers decode each column into a [`DatabaseValue`]
/// following its storage type; the introspector maps them onto fields.
pub trait DatabaseRow: Send + Sync {
    fn get_by_index(&self, index: usize) -> OrmResult<DatabaseValue>;

    fn get_by_name(&self, name: &str) -> OrmResult<DatabaseValue>;

    fn column_count(&self) -> usize;

    /// Column names in select order
    fn column_names(&self) -> Vec<String>;
}

/// Database value enumeration for type-safe parameter binding
#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseValue {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    String(String),
    Bytes(Vec<u8>),
    Uuid(uuid::Uuid),
    DateTime(chrono::DateTime<chrono::Utc>),
    Date(chrono::NaiveDate),
    Time(chrono::NaiveTime),
    Json(JsonValue),
    Array(Vec<DatabaseValue>),
}

impl DatabaseValue {
    /// Check if the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, DatabaseValue::Null)
    }

    /// Null, or an integer equal to zero. Auto keys with this value are unset.
    pub fn is_zero_key(&self) -> bool {
        matches!(self, DatabaseValue::Null | DatabaseValue::Int32(0) | DatabaseValue::Int64(0))
    }

    /// Integer view of this value, if it holds an integer
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            DatabaseValue::Int32(i) => Some(i64::from(*i)),
            DatabaseValue::Int64(i) => Some(*i),
            _ => None,
        }
    }

    /// Convert into a Rust value
    pub fn decode<T: crate::model::FromDatabaseValue>(self) -> OrmResult<T> {
        T::from_database_value(self)
    }

    /// JSON form used for encoded lists and log output. Timestamps become
    /// RFC 3339 strings; non-finite floats become null.
    pub fn to_json(&self) -> JsonValue {
        let float = |f: f64| serde_json::Number::from_f64(f).map_or(JsonValue::Null, JsonValue::Number);
        match self {
            DatabaseValue::Null => JsonValue::Null,
            DatabaseValue::Bool(b) => (*b).into(),
            DatabaseValue::Int32(i) => (*i).into(),
            DatabaseValue::Int64(i) => (*i).into(),
            DatabaseValue::Float32(f) => float(f64::from(*f)),
            DatabaseValue::Float64(f) => float(*f),
            DatabaseValue::String(s) => s.as_str().into(),
            DatabaseValue::Bytes(bytes) => JsonValue::from(bytes.clone()),
            DatabaseValue::Uuid(u) => u.to_string().into(),
            DatabaseValue::DateTime(dt) => dt.to_rfc3339().into(),
            DatabaseValue::Date(d) => d.to_string().into(),
            DatabaseValue::Time(t) => t.to_string().into(),
            DatabaseValue::Json(json) => json.clone(),
            DatabaseValue::Array(items) => JsonValue::Array(items.iter().map(DatabaseValue::to_json).collect()),
        }
    }

    /// Inverse of `to_json` for decoded lists: integers stay integers,
    /// objects stay JSON
    pub fn from_json(json: JsonValue) -> Self {
        match json {
            JsonValue::Null => DatabaseValue::Null,
            JsonValue::Bool(b) => DatabaseValue::Bool(b),
            JsonValue::Number(n) => match (n.as_i64(), n.as_f64()) {
                (Some(i), _) => DatabaseValue::Int64(i),
                (None, Some(f)) => DatabaseValue::Float64(f),
                (None, None) => DatabaseValue::Null,
            },
            JsonValue::String(s) => DatabaseValue::String(s),
            JsonValue::Array(items) => DatabaseValue::Array(items.into_iter().map(DatabaseValue::from_json).collect()),
            object @ JsonValue::Object(_) => DatabaseValue::Json(object),
        }
    }
}

impl fmt::Display for DatabaseValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseValue::Null => f.write_str("NULL"),
            DatabaseValue::String(s) => write!(f, "'{}'", s),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for DatabaseValue {
                fn from(value: $ty) -> Self {
                    DatabaseValue::$variant(value)
                }
            }
        )*
    };
}

value_from! {
    bool => Bool,
    i32 => Int32,
    i64 => Int64,
    f32 => Float32,
    f64 => Float64,
    String => String,
    Vec<u8> => Bytes,
    uuid::Uuid => Uuid,
    chrono::DateTime<chrono::Utc> => DateTime,
    chrono::NaiveDate => Date,
    chrono::NaiveTime => Time,
    JsonValue => Json,
}

impl From<&str> for DatabaseValue {
    fn from(value: &str) -> Self {
        DatabaseValue::String(value.to_owned())
    }
}

impl From<&String> for DatabaseValue {
    fn from(value: &String) -> Self {
        DatabaseValue::String(value.clone())
    }
}

/// Lists bind as arrays; give the field a `type(text)` or `type(json)` encoding
impl From<Vec<String>> for DatabaseValue {
    fn from(value: Vec<String>) -> Self {
        DatabaseValue::Array(value.into_iter().map(DatabaseValue::String).collect())
    }
}

impl From<Vec<i64>> for DatabaseValue {
    fn from(value: Vec<i64>) -> Self {
        DatabaseValue::Array(value.into_iter().map(DatabaseValue::Int64).collect())
    }
}

impl<T> From<Option<T>> for DatabaseValue
where
    T: Into<DatabaseValue>,
{
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => DatabaseValue::Null,
        }
    }
}

/// SQL dialect enumeration for generating database-specific SQL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlDialect {
    PostgreSQL,
    MySQL,
    SQLite,
}

impl SqlDialect {
    /// Get the parameter placeholder for the zero-based parameter `index`
    pub fn parameter_placeholder(&self, index: usize) -> String {
        match self {
            SqlDialect::PostgreSQL => format!("${}", index + 1),
            SqlDialect::MySQL | SqlDialect::SQLite => "?".to_string(),
        }
    }

    /// Get the quote character for identifiers in this dialect
    pub fn identifier_quote(&self) -> char {
        match self {
            SqlDialect::PostgreSQL => '"',
            SqlDialect::MySQL => '`',
            SqlDialect::SQLite => '"',
        }
    }

    /// Quote an identifier, doubling any embedded quote character
    pub fn quote(&self, identifier: &str) -> String {
        let q = self.identifier_quote();
        let escaped = identifier.replace(q, &format!("{}{}", q, q));
        format!("{}{}{}", q, escaped, q)
    }

    /// Whether generated keys come back through `RETURNING` instead of last-insert-id
    pub fn uses_returning(&self) -> bool {
        matches!(self, SqlDialect::PostgreSQL)
    }

    /// Row locking clause appended by `read_for_update`
    pub fn locking_clause(&self) -> Option<&'static str> {
        match self {
            SqlDialect::PostgreSQL | SqlDialect::MySQL => Some("FOR UPDATE"),
            SqlDialect::SQLite => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholders_and_quoting() {
        assert_eq!(SqlDialect::PostgreSQL.parameter_placeholder(0), "$1");
        assert_eq!(SqlDialect::PostgreSQL.parameter_placeholder(4), "$5");
        assert_eq!(SqlDialect::MySQL.parameter_placeholder(3), "?");
        assert_eq!(SqlDialect::MySQL.quote("user"), "`user`");
        assert_eq!(SqlDialect::SQLite.quote("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_zero_key_detection() {
        assert!(DatabaseValue::Null.is_zero_key());
        assert!(DatabaseValue::Int64(0).is_zero_key());
        assert!(DatabaseValue::Int32(0).is_zero_key());
        assert!(!DatabaseValue::Int64(7).is_zero_key());
        assert!(!DatabaseValue::String(String::new()).is_zero_key());
    }

    #[test]
    fn test_json_conversion() {
        let value = DatabaseValue::from_json(serde_json::json!(["a", 1, null]));
        assert_eq!(
            value,
            DatabaseValue::Array(vec![
                DatabaseValue::String("a".into()),
                DatabaseValue::Int64(1),
                DatabaseValue::Null,
            ])
        );
        assert_eq!(value.to_json(), serde_json::json!(["a", 1, null]));
    }
}

//! Decoding database values into Rust field types

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::backends::DatabaseValue;
use crate::error::{OrmError, OrmResult};

/// Conversion from a [`DatabaseValue`] read out of a row
pub trait FromDatabaseValue: Sized {
    fn from_database_value(value: DatabaseValue) -> OrmResult<Self>;
}

fn mismatch<T>(value: &DatabaseValue, expected: &str) -> OrmResult<T> {
    Err(OrmError::Serialization(format!(
        "cannot decode {:?} as {}",
        value, expected
    )))
}

impl FromDatabaseValue for DatabaseValue {
    fn from_database_value(value: DatabaseValue) -> OrmResult<Self> {
        Ok(value)
    }
}

impl<T: FromDatabaseValue> FromDatabaseValue for Option<T> {
    fn from_database_value(value: DatabaseValue) -> OrmResult<Self> {
        match value {
            DatabaseValue::Null => Ok(None),
            other => T::from_database_value(other).map(Some),
        }
    }
}

impl FromDatabaseValue for bool {
    fn from_database_value(value: DatabaseValue) -> OrmResult<Self> {
        match value {
            DatabaseValue::Bool(b) => Ok(b),
            DatabaseValue::Int32(i) => Ok(i != 0),
            DatabaseValue::Int64(i) => Ok(i != 0),
            DatabaseValue::String(ref s) => match s.as_str() {
                "true" | "t" | "1" => Ok(true),
                "false" | "f" | "0" => Ok(false),
                _ => mismatch(&value, "bool"),
            },
            other => mismatch(&other, "bool"),
        }
    }
}

impl FromDatabaseValue for i32 {
    fn from_database_value(value: DatabaseValue) -> OrmResult<Self> {
        match value {
            DatabaseValue::Int32(i) => Ok(i),
            DatabaseValue::Int64(i) => i32::try_from(i)
                .map_err(|_| OrmError::Serialization(format!("integer {} overflows i32", i))),
            other => mismatch(&other, "i32"),
        }
    }
}

impl FromDatabaseValue for i64 {
    fn from_database_value(value: DatabaseValue) -> OrmResult<Self> {
        match value {
            DatabaseValue::Int32(i) => Ok(i64::from(i)),
            DatabaseValue::Int64(i) => Ok(i),
            other => mismatch(&other, "i64"),
        }
    }
}

impl FromDatabaseValue for f64 {
    fn from_database_value(value: DatabaseValue) -> OrmResult<Self> {
        match value {
            DatabaseValue::Float32(f) => Ok(f64::from(f)),
            DatabaseValue::Float64(f) => Ok(f),
            DatabaseValue::Int32(i) => Ok(f64::from(i)),
            DatabaseValue::Int64(i) => Ok(i as f64),
            // NUMERIC columns come back as text from some drivers
            DatabaseValue::String(ref s) => match s.parse::<f64>() {
                Ok(f) => Ok(f),
                Err(_) => mismatch(&value, "f64"),
            },
            other => mismatch(&other, "f64"),
        }
    }
}

impl FromDatabaseValue for String {
    fn from_database_value(value: DatabaseValue) -> OrmResult<Self> {
        match value {
            DatabaseValue::String(s) => Ok(s),
            DatabaseValue::Uuid(u) => Ok(u.to_string()),
            other => mismatch(&other, "String"),
        }
    }
}

impl FromDatabaseValue for Vec<u8> {
    fn from_database_value(value: DatabaseValue) -> OrmResult<Self> {
        match value {
            DatabaseValue::Bytes(b) => Ok(b),
            other => mismatch(&other, "bytes"),
        }
    }
}

impl FromDatabaseValue for Uuid {
    fn from_database_value(value: DatabaseValue) -> OrmResult<Self> {
        match value {
            DatabaseValue::Uuid(u) => Ok(u),
            DatabaseValue::String(ref s) => match Uuid::parse_str(s) {
                Ok(u) => Ok(u),
                Err(_) => mismatch(&value, "uuid"),
            },
            DatabaseValue::Bytes(ref b) => match Uuid::from_slice(b) {
                Ok(u) => Ok(u),
                Err(_) => mismatch(&value, "uuid"),
            },
            other => mismatch(&other, "uuid"),
        }
    }
}

/// Parse a textual timestamp; values without an offset are taken as UTC
pub(crate) fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    parse_naive_timestamp(text).map(|naive| naive.and_utc())
}

pub(crate) fn parse_naive_timestamp(text: &str) -> Option<NaiveDateTime> {
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
}

impl FromDatabaseValue for DateTime<Utc> {
    fn from_database_value(value: DatabaseValue) -> OrmResult<Self> {
        match value {
            DatabaseValue::DateTime(dt) => Ok(dt),
            DatabaseValue::String(ref s) => match parse_timestamp(s) {
                Some(dt) => Ok(dt),
                None => mismatch(&value, "timestamp"),
            },
            other => mismatch(&other, "timestamp"),
        }
    }
}

impl FromDatabaseValue for NaiveDate {
    fn from_database_value(value: DatabaseValue) -> OrmResult<Self> {
        match value {
            DatabaseValue::Date(d) => Ok(d),
            DatabaseValue::DateTime(dt) => Ok(dt.date_naive()),
            DatabaseValue::String(ref s) => match NaiveDate::parse_from_str(s, "%Y-%m-%d") {
                Ok(d) => Ok(d),
                Err(_) => mismatch(&value, "date"),
            },
            other => mismatch(&other, "date"),
        }
    }
}

impl FromDatabaseValue for NaiveTime {
    fn from_database_value(value: DatabaseValue) -> OrmResult<Self> {
        match value {
            DatabaseValue::Time(t) => Ok(t),
            DatabaseValue::String(ref s) => match NaiveTime::parse_from_str(s, "%H:%M:%S%.f") {
                Ok(t) => Ok(t),
                Err(_) => mismatch(&value, "time"),
            },
            other => mismatch(&other, "time"),
        }
    }
}

impl FromDatabaseValue for JsonValue {
    fn from_database_value(value: DatabaseValue) -> OrmResult<Self> {
        match value {
            DatabaseValue::Json(j) => Ok(j),
            DatabaseValue::String(s) => Ok(serde_json::from_str(&s)?),
            other => Ok(other.to_json()),
        }
    }
}

impl FromDatabaseValue for Vec<String> {
    fn from_database_value(value: DatabaseValue) -> OrmResult<Self> {
        match value {
            DatabaseValue::Array(items) => items.into_iter().map(String::from_database_value).collect(),
            DatabaseValue::String(s) => Ok(serde_json::from_str(&s)?),
            DatabaseValue::Json(j) => Ok(serde_json::from_value(j)?),
            other => mismatch(&other, "list of strings"),
        }
    }
}

impl FromDatabaseValue for Vec<i64> {
    fn from_database_value(value: DatabaseValue) -> OrmResult<Self> {
        match value {
            DatabaseValue::Array(items) => items.into_iter().map(i64::from_database_value).collect(),
            DatabaseValue::String(s) => Ok(serde_json::from_str(&s)?),
            DatabaseValue::Json(j) => Ok(serde_json::from_value(j)?),
            other => mismatch(&other, "list of integers"),
        }
    }
}

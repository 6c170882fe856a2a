//! Field Introspector - Moving values between models and statements
//!
//! `collect` reads the values a write statement needs out of a model,
//! `hydrate` writes a fetched row back into one. Both go through the
//! model's `ModelFields` accessor and never touch the database.

use chrono::{DateTime, FixedOffset, TimeZone, Utc};

use crate::backends::{DatabaseRow, DatabaseValue};
use crate::error::{OrmError, OrmResult};
use crate::metadata::{FieldKind, FieldMetadata, ModelMetadata, ValueEncoding};
use crate::model::fields::FieldType;
use crate::model::value::parse_naive_timestamp;
use crate::model::ModelFields;

/// Statement a value collection is for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOp {
    Insert,
    Update,
}

/// Collects and hydrates model values by metadata
pub struct FieldIntrospector;

impl FieldIntrospector {
    /// Column names and bound values for a write.
    ///
    /// With no `columns`, every stored column is used, except a zero auto
    /// key on insert and the primary key on update. Requested columns may
    /// be given by column name or field path and keep their order.
    pub fn collect(
        meta: &ModelMetadata,
        model: &dyn ModelFields,
        columns: &[&str],
        op: WriteOp,
        now: DateTime<FixedOffset>,
    ) -> OrmResult<(Vec<String>, Vec<DatabaseValue>)> {
        let explicit = !columns.is_empty();
        let fields: Vec<&FieldMetadata> = if explicit {
            columns
                .iter()
                .map(|name| {
                    let field = meta.resolve(name)?;
                    match field.column {
                        Some(_) => Ok(field),
                        None => Err(OrmError::unknown_column(&meta.name, name)),
                    }
                })
                .collect::<OrmResult<_>>()?
        } else {
            meta.stored_fields().collect()
        };

        let mut names = Vec::with_capacity(fields.len());
        let mut values = Vec::with_capacity(fields.len());

        for field in fields {
            let Some(column) = field.column() else {
                continue;
            };
            if !explicit
                && op == WriteOp::Update
                && (field.primary_key || field.kind == FieldKind::AutoNowAdd)
            {
                continue;
            }

            let value = match (field.kind, op) {
                (FieldKind::AutoNow, _) | (FieldKind::AutoNowAdd, WriteOp::Insert) => {
                    timestamp_value(field.field_type, now)
                }
                _ => model
                    .get_value(&field.path)
                    .ok_or_else(|| OrmError::unknown_field(&meta.name, &field.path))?,
            };

            if !explicit && op == WriteOp::Insert && field.is_auto() && value.is_zero_key() {
                continue;
            }

            let value = encode_value(meta, field, value)?;
            if value.is_null() && field.is_required() {
                return Err(OrmError::Validation(format!(
                    "{}.{} cannot be NULL",
                    meta.name, field.path
                )));
            }

            names.push(column.to_string());
            values.push(value);
        }

        Ok((names, values))
    }

    /// Primary key value of a model; zero or NULL keys are a Validation error
    pub fn primary_key_value(meta: &ModelMetadata, model: &dyn ModelFields) -> OrmResult<DatabaseValue> {
        let pk = meta.require_primary_key()?;
        let value = model
            .get_value(&pk.path)
            .ok_or_else(|| OrmError::unknown_field(&meta.name, &pk.path))?;
        if value.is_null() || (pk.field_type.is_integer() && value.is_zero_key()) {
            return Err(OrmError::MissingPrimaryKey(meta.name.clone()));
        }
        Ok(value)
    }

    /// Write every stored column of `row` into `model`
    pub fn hydrate(
        meta: &ModelMetadata,
        row: &dyn DatabaseRow,
        model: &mut dyn ModelFields,
        tz: FixedOffset,
    ) -> OrmResult<()> {
        for (path, value) in Self::decode_row(meta, row, tz)? {
            model.set_value(&path, value)?;
        }
        Ok(())
    }

    /// Decoded `(field path, value)` pairs of a row; columns absent from
    /// the row are skipped
    pub(crate) fn decode_row(
        meta: &ModelMetadata,
        row: &dyn DatabaseRow,
        tz: FixedOffset,
    ) -> OrmResult<Vec<(String, DatabaseValue)>> {
        let present = row.column_names();
        let mut decoded = Vec::with_capacity(present.len());

        for field in meta.stored_fields() {
            let Some(column) = field.column() else {
                continue;
            };
            if !present.iter().any(|name| name == column) {
                continue;
            }
            let raw = row.get_by_name(column)?;
            decoded.push((field.path.clone(), decode_value(field, raw, tz)?));
        }

        Ok(decoded)
    }
}

fn timestamp_value(field_type: FieldType, now: DateTime<FixedOffset>) -> DatabaseValue {
    match field_type {
        FieldType::Date => DatabaseValue::Date(now.date_naive()),
        FieldType::Time => DatabaseValue::Time(now.time()),
        _ => DatabaseValue::DateTime(now.with_timezone(&Utc)),
    }
}

fn encode_value(meta: &ModelMetadata, field: &FieldMetadata, value: DatabaseValue) -> OrmResult<DatabaseValue> {
    match (field.encoding, value) {
        (_, DatabaseValue::Null) => Ok(DatabaseValue::Null),
        (Some(ValueEncoding::Text), value @ (DatabaseValue::Array(_) | DatabaseValue::Json(_))) => {
            Ok(DatabaseValue::String(serde_json::to_string(&value.to_json())?))
        }
        (Some(ValueEncoding::Json), value @ DatabaseValue::Array(_)) => Ok(DatabaseValue::Json(value.to_json())),
        (None, DatabaseValue::Array(_)) => Err(OrmError::Validation(format!(
            "{}.{} holds a list; tag it with type(text) or type(json)",
            meta.name, field.path
        ))),
        (_, value) => Ok(value),
    }
}

fn decode_value(field: &FieldMetadata, raw: DatabaseValue, tz: FixedOffset) -> OrmResult<DatabaseValue> {
    if raw.is_null() {
        return Ok(raw);
    }

    match (field.encoding, field.field_type, raw) {
        (Some(_), FieldType::List, DatabaseValue::String(text)) => {
            let json: serde_json::Value = serde_json::from_str(&text)?;
            Ok(DatabaseValue::from_json(json))
        }
        (Some(_), FieldType::List, DatabaseValue::Json(json)) => Ok(DatabaseValue::from_json(json)),
        (Some(_), FieldType::Json, DatabaseValue::String(text)) => {
            Ok(DatabaseValue::Json(serde_json::from_str(&text)?))
        }
        (_, FieldType::DateTime, DatabaseValue::String(text)) => {
            if let Ok(dt) = DateTime::parse_from_rfc3339(&text) {
                return Ok(DatabaseValue::DateTime(dt.with_timezone(&Utc)));
            }
            let naive = parse_naive_timestamp(&text).ok_or_else(|| {
                OrmError::Serialization(format!("cannot parse '{}' as a timestamp", text))
            })?;
            let local = tz.from_local_datetime(&naive).single().ok_or_else(|| {
                OrmError::Serialization(format!("timestamp '{}' is ambiguous", text))
            })?;
            Ok(DatabaseValue::DateTime(local.with_timezone(&Utc)))
        }
        (_, _, raw) => Ok(raw),
    }
}

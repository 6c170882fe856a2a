//! Relation containers
//!
//! [`Related`] is the field type for forward relations (`rel(fk)`,
//! `rel(one)`): it always holds the referenced key and, after
//! `load_related`, the referenced model. [`RelatedSet`] carries rows loaded
//! by `load_related` into `ModelFields::set_related`, where the model turns
//! them into typed values with [`RelatedSet::into_one`] or
//! [`RelatedSet::into_many`].

use std::fmt;
use std::sync::Arc;

use crate::backends::DatabaseValue;
use crate::error::{OrmError, OrmResult};
use crate::metadata::ModelMetadata;
use crate::model::core_trait::{full_model_name, Model};

/// Forward relation: the foreign key plus the lazily loaded target
pub struct Related<T> {
    key: DatabaseValue,
    loaded: Option<Box<T>>,
}

impl<T> Related<T> {
    /// No related row; binds SQL NULL
    pub fn none() -> Self {
        Self {
            key: DatabaseValue::Null,
            loaded: None,
        }
    }

    /// Reference a row by its primary key
    pub fn key(key: impl Into<DatabaseValue>) -> Self {
        Self {
            key: key.into(),
            loaded: None,
        }
    }

    /// Build from a column value read from the database
    pub fn from_value(value: DatabaseValue) -> Self {
        Self::key(value)
    }

    /// Key bound for the foreign-key column
    pub fn key_value(&self) -> DatabaseValue {
        self.key.clone()
    }

    /// Integer key, if set
    pub fn id(&self) -> Option<i64> {
        self.key.as_i64()
    }

    pub fn is_set(&self) -> bool {
        !self.key.is_null()
    }

    /// Replace the key; a loaded target for a different key is dropped
    pub fn set_key(&mut self, key: DatabaseValue) {
        if key != self.key {
            self.loaded = None;
        }
        self.key = key;
    }

    pub fn get(&self) -> Option<&T> {
        self.loaded.as_deref()
    }

    pub fn get_mut(&mut self) -> Option<&mut T> {
        self.loaded.as_deref_mut()
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.is_some()
    }

    pub fn set_loaded(&mut self, value: Option<T>) {
        self.loaded = value.map(Box::new);
    }
}

impl<T> Default for Related<T> {
    fn default() -> Self {
        Self::none()
    }
}

impl<T: Clone> Clone for Related<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            loaded: self.loaded.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Related<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Related")
            .field("key", &self.key)
            .field("loaded", &self.loaded)
            .finish()
    }
}

impl<T: PartialEq> PartialEq for Related<T> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.loaded == other.loaded
    }
}

/// One loaded row: decoded field values plus any nested relations
#[derive(Debug, Clone)]
pub struct RelatedRow {
    pub(crate) values: Vec<(String, DatabaseValue)>,
    pub(crate) nested: Vec<(String, RelatedSet)>,
}

impl RelatedRow {
    pub(crate) fn new(values: Vec<(String, DatabaseValue)>) -> Self {
        Self {
            values,
            nested: Vec::new(),
        }
    }

    /// Decoded value of a field of the loaded row
    pub fn value(&self, field: &str) -> Option<&DatabaseValue> {
        self.values.iter().find(|(name, _)| name == field).map(|(_, v)| v)
    }
}

/// Rows of one relation, ready to be turned into target models
#[derive(Debug, Clone)]
pub struct RelatedSet {
    target: Arc<ModelMetadata>,
    rows: Vec<RelatedRow>,
}

impl RelatedSet {
    pub(crate) fn new(target: Arc<ModelMetadata>, rows: Vec<RelatedRow>) -> Self {
        Self { target, rows }
    }

    /// Metadata of the related model
    pub fn target(&self) -> &ModelMetadata {
        &self.target
    }

    pub fn rows(&self) -> &[RelatedRow] {
        &self.rows
    }

    pub(crate) fn rows_mut(&mut self) -> &mut Vec<RelatedRow> {
        &mut self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Build every row as a `T`
    pub fn into_many<T: Model>(self) -> OrmResult<Vec<T>> {
        if full_model_name::<T>() != self.target.full_name {
            return Err(OrmError::Programmer(format!(
                "related rows belong to '{}', not '{}'",
                self.target.full_name,
                full_model_name::<T>()
            )));
        }

        let mut models = Vec::with_capacity(self.rows.len());
        for row in self.rows {
            let mut model = T::default();
            for (field, value) in row.values {
                model.set_value(&field, value)?;
            }
            for (field, nested) in row.nested {
                model.set_related(&field, nested)?;
            }
            models.push(model);
        }
        Ok(models)
    }

    /// Build the first row as a `T`
    pub fn into_one<T: Model>(self) -> OrmResult<Option<T>> {
        Ok(self.into_many::<T>()?.into_iter().next())
    }
}

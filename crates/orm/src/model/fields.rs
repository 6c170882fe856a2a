//! Field declarations
//!
//! A model lists its fields as [`FieldDecl`]s. The declaration carries the
//! field path, its value type and a tag string in the grammar parsed by
//! `metadata::tags`, e.g. `"pk;auto"`, `"size(100);unique"` or
//! `"rel(fk);null;on_delete(set_null)"`.

use std::fmt;

use crate::error::OrmResult;
use crate::model::core_trait::{full_model_name, Model};
use crate::registry::{register_type, RegistryState};

/// Value type of a field, used for DDL and for decoding rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Bool,
    Int32,
    Int64,
    Float64,
    /// Fixed-point number, sized with `digits(n)` / `decimals(n)`
    Decimal,
    /// Bounded string, sized with `size(n)`
    String,
    Text,
    Bytes,
    DateTime,
    Date,
    Time,
    Uuid,
    Json,
    /// List or set stored encoded, needs `type(text)` or `type(json)`
    List,
    /// Relation field; its column type follows the target's primary key
    Relation,
}

impl FieldType {
    pub fn is_integer(&self) -> bool {
        matches!(self, FieldType::Int32 | FieldType::Int64)
    }
}

/// Typed handle to another model, used to register relation targets
#[derive(Clone, Copy)]
pub struct ModelRef {
    name: fn() -> &'static str,
    pub(crate) register: fn(&mut RegistryState, Option<&str>) -> OrmResult<()>,
}

impl ModelRef {
    pub fn of<T: Model>() -> Self {
        Self {
            name: full_model_name::<T>,
            register: register_type::<T>,
        }
    }

    /// Fully-qualified name of the referenced model
    pub fn name(&self) -> &'static str {
        (self.name)()
    }
}

impl fmt::Debug for ModelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ModelRef").field(&self.name()).finish()
    }
}

/// One declared model field
#[derive(Debug, Clone)]
pub struct FieldDecl {
    pub(crate) path: String,
    pub(crate) field_type: FieldType,
    pub(crate) tag: String,
    pub(crate) target: Option<ModelRef>,
}

impl FieldDecl {
    /// Declare a plain field. `path` may be dotted for embedded structs.
    pub fn new(path: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            path: path.into(),
            field_type,
            tag: String::new(),
            target: None,
        }
    }

    /// Declare a relation field pointing at `T`. Needs a `rel(..)` or `reverse(..)` tag.
    pub fn related<T: Model>(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            field_type: FieldType::Relation,
            tag: String::new(),
            target: Some(ModelRef::of::<T>()),
        }
    }

    /// Attach the tag string
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn field_type(&self) -> FieldType {
        self.field_type
    }

    pub fn tag_str(&self) -> &str {
        &self.tag
    }
}

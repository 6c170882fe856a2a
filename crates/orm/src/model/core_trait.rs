//! Core Model Traits - What a struct implements to become persistable
//!
//! There is no runtime reflection. A model describes its shape once through
//! [`Model::fields`] (field paths, types and tag strings) and exposes its
//! values through the object-safe [`ModelFields`] accessor. The registry
//! compiles the declarations into metadata; backends then read and write
//! values by field path without knowing the concrete type.

use std::fmt::Debug;

use crate::backends::DatabaseValue;
use crate::error::{OrmError, OrmResult};
use crate::model::fields::FieldDecl;
use crate::model::related::RelatedSet;

/// Get/set-by-field capability, usable behind `dyn`
pub trait ModelFields: Send + Sync {
    /// Current value of a declared field, `None` if the field is unknown
    fn get_value(&self, field: &str) -> Option<DatabaseValue>;

    /// Store a value read from the database into a declared field
    fn set_value(&mut self, field: &str, value: DatabaseValue) -> OrmResult<()>;

    /// Attach rows loaded by `load_related` to a relation field
    fn set_related(&mut self, field: &str, related: RelatedSet) -> OrmResult<()> {
        let _ = related;
        Err(OrmError::Programmer(format!(
            "field '{}' does not accept related rows",
            field
        )))
    }
}

/// Core trait for database models
///
/// ```ignore
/// #[derive(Debug, Default)]
/// struct Profile {
///     id: i64,
///     age: i32,
/// }
///
/// impl Model for Profile {
///     fn fields() -> Vec<FieldDecl> {
///         vec![
///             FieldDecl::new("id", FieldType::Int64).tag("pk;auto"),
///             FieldDecl::new("age", FieldType::Int32),
///         ]
///     }
/// }
/// ```
pub trait Model: ModelFields + Default + Debug + 'static {
    /// Declared fields, in column order
    fn fields() -> Vec<FieldDecl>;

    /// Table name override. Defaults to the snake-cased type name.
    fn table_name() -> Option<&'static str> {
        None
    }

    /// Multi-column unique constraints, by field path or column name
    fn unique_together() -> Vec<Vec<&'static str>> {
        Vec::new()
    }

    /// Multi-column indexes, by field path or column name
    fn index_together() -> Vec<Vec<&'static str>> {
        Vec::new()
    }

    /// The model manages its own keys and may declare no primary key
    fn manual_primary_key() -> bool {
        false
    }
}

/// Fully-qualified name the registry stores a model under
pub fn full_model_name<M: Model>() -> &'static str {
    std::any::type_name::<M>()
}

/// Last path segment of a fully-qualified type name
pub(crate) fn short_name_of(full_name: &str) -> &str {
    let base = full_name.split('<').next().unwrap_or(full_name);
    base.rsplit("::").next().unwrap_or(base)
}

/// Everything before the last path segment
pub(crate) fn namespace_of(full_name: &str) -> &str {
    let base = full_name.split('<').next().unwrap_or(full_name);
    match base.rfind("::") {
        Some(idx) => &base[..idx],
        None => "",
    }
}

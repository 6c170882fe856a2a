//! Model System - What application structs implement to be persisted
//!
//! - `core_trait`: `Model` and the object-safe `ModelFields` accessor
//! - `fields`: field declarations (`FieldDecl`, `FieldType`, `ModelRef`)
//! - `related`: relation containers filled by `load_related`
//! - `value`: decoding database values into field types

pub mod core_trait;
pub mod fields;
pub mod related;
pub mod value;

pub use core_trait::{full_model_name, Model, ModelFields};
pub use fields::{FieldDecl, FieldType, ModelRef};
pub use related::{Related, RelatedRow, RelatedSet};
pub use value::FromDatabaseValue;

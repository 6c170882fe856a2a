//! # tagorm: tag-driven ORM
//!
//! Models declare their fields with string tags (`auto`, `pk`, `rel(fk)`,
//! `reverse(many)`, `auto_now_add`, ...). A sealed [`ModelRegistry`] turns
//! those declarations into table metadata. [`Orm`] handles then run CRUD,
//! relation loading and transactions against named database aliases,
//! generating SQL through a per-dialect [`DatabaseBackend`].
//!
//! ```ignore
//! let ctx = OrmContext::new();
//! ctx.register_models::<(User, Profile)>()?;
//! ctx.connect_alias(AliasConfig::new(DatabaseBackendType::SQLite, "sqlite::memory:")).await?;
//!
//! let mut orm = ctx.new_orm()?;
//! let mut profile = Profile { id: 0, age: 30 };
//! orm.insert(&mut profile).await?;
//! ```

pub mod alias;
pub mod backends;
pub mod config;
pub mod drivers;
pub mod error;
pub mod introspect;
pub mod metadata;
pub mod model;
pub mod orm;
pub mod registry;
pub mod schema;
pub mod statistics;
pub mod transaction;

pub use alias::{Alias, AliasRegistry};
pub use backends::{
    backend_for, DatabaseBackend, DatabaseBackendType, DatabasePool, DatabaseRow, DatabaseTransaction,
    DatabaseValue, ExecResult, LoadRelatedOptions, Querier, SqlDialect,
};
pub use config::{AliasConfig, DEFAULT_ALIAS};
pub use drivers::MockPool;
pub use error::{ConstraintKind, ErrorKind, OrmError, OrmResult};
pub use introspect::{FieldIntrospector, WriteOp};
pub use metadata::{FieldKind, FieldMetadata, ModelMetadata};
pub use model::{FieldDecl, FieldType, FromDatabaseValue, Model, ModelFields, ModelRef, Related, RelatedRow, RelatedSet};
pub use orm::{Orm, OrmContext, OrmState, QueryM2M};
pub use registry::{M2MJoin, ModelRegistry, ModelSet};
pub use schema::SchemaBuilder;
pub use statistics::OrmStats;
pub use transaction::{IsolationLevel, TransactionConfig, TxContext};

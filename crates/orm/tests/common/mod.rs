//! Models and helpers shared by the integration tests

#![allow(dead_code)]

use std::sync::Arc;

use tagorm::{
    Alias, AliasConfig, DatabaseBackendType, DatabaseValue, FieldDecl, FieldType, MockPool, Model, ModelFields,
    OrmContext, OrmError, OrmResult, Related, RelatedSet,
};

#[derive(Debug, Default, Clone)]
pub struct Profile {
    pub id: i64,
    pub age: i32,
}

impl ModelFields for Profile {
    fn get_value(&self, field: &str) -> Option<DatabaseValue> {
        match field {
            "id" => Some(self.id.into()),
            "age" => Some(self.age.into()),
            _ => None,
        }
    }

    fn set_value(&mut self, field: &str, value: DatabaseValue) -> OrmResult<()> {
        match field {
            "id" => self.id = value.decode()?,
            "age" => self.age = value.decode()?,
            _ => return Err(OrmError::unknown_field("Profile", field)),
        }
        Ok(())
    }
}

impl Model for Profile {
    fn fields() -> Vec<FieldDecl> {
        vec![
            FieldDecl::new("id", FieldType::Int64).tag("pk;auto"),
            FieldDecl::new("age", FieldType::Int32),
        ]
    }
}

#[derive(Debug, Default)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub profile: Related<Profile>,
}

impl ModelFields for User {
    fn get_value(&self, field: &str) -> Option<DatabaseValue> {
        match field {
            "id" => Some(self.id.into()),
            "name" => Some(self.name.clone().into()),
            "profile" => Some(self.profile.key_value()),
            _ => None,
        }
    }

    fn set_value(&mut self, field: &str, value: DatabaseValue) -> OrmResult<()> {
        match field {
            "id" => self.id = value.decode()?,
            "name" => self.name = value.decode()?,
            "profile" => self.profile.set_key(value),
            _ => return Err(OrmError::unknown_field("User", field)),
        }
        Ok(())
    }

    fn set_related(&mut self, field: &str, related: RelatedSet) -> OrmResult<()> {
        match field {
            "profile" => self.profile.set_loaded(related.into_one()?),
            _ => return Err(OrmError::unknown_field("User", field)),
        }
        Ok(())
    }
}

impl Model for User {
    fn fields() -> Vec<FieldDecl> {
        vec![
            FieldDecl::new("id", FieldType::Int64).tag("pk;auto"),
            FieldDecl::new("name", FieldType::String).tag("size(100)"),
            FieldDecl::related::<Profile>("profile").tag("rel(fk);null"),
        ]
    }
}

/// Statement logs for `RUST_LOG=tagorm=debug cargo test`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Context with `Profile` and `User` registered and a MySQL-flavoured mock
/// bound as the default alias
pub fn mock_context(pool: &MockPool) -> OrmContext {
    mock_context_for(pool, DatabaseBackendType::MySQL)
}

/// Same models, with the default alias speaking `driver`'s dialect
pub fn mock_context_for(pool: &MockPool, driver: DatabaseBackendType) -> OrmContext {
    init_tracing();
    let ctx = OrmContext::new();
    ctx.register_models::<(Profile, User)>().unwrap();
    let data_source = match driver {
        DatabaseBackendType::PostgreSQL => "postgres://localhost/app",
        DatabaseBackendType::MySQL => "mysql://root@localhost/app",
        DatabaseBackendType::SQLite => "sqlite::memory:",
    };
    let config = AliasConfig::new(driver, data_source);
    ctx.add_alias(Alias::from_pool(config, Arc::new(pool.clone()))).unwrap();
    ctx
}

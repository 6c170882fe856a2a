//! Register two models, sync the schema of an in-memory SQLite database,
//! then insert, read and load a relation.
//!
//! Run with `RUST_LOG=tagorm=debug cargo run --example quickstart` to see
//! every statement.

use tagorm::{
    AliasConfig, DatabaseBackendType, DatabaseValue, FieldDecl, FieldType, LoadRelatedOptions, Model, ModelFields,
    OrmContext, OrmError, OrmResult, Related, RelatedSet,
};

#[derive(Debug, Default)]
struct Profile {
    id: i64,
    age: i32,
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
struct User {
    id: i64,
    name: String,
    profile: Related<Profile>,
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
            FieldDecl::new("name", FieldType::String).tag("size(100);unique"),
            FieldDecl::related::<Profile>("profile").tag("rel(one);null;on_delete(set_null)"),
        ]
    }
}

#[tokio::main]
async fn main() -> OrmResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let ctx = OrmContext::new();
    ctx.register_models::<(Profile, User)>()?;
    ctx.connect_alias(AliasConfig::new(DatabaseBackendType::SQLite, "sqlite::memory:"))
        .await?;

    let mut orm = ctx.new_orm()?;
    orm.sync_schema(false).await?;

    let mut profile = Profile { id: 0, age: 30 };
    orm.insert(&mut profile).await?;

    let mut user = User {
        name: "slene".to_string(),
        profile: Related::key(profile.id),
        ..Default::default()
    };
    orm.insert(&mut user).await?;

    let mut fetched = User {
        id: user.id,
        ..Default::default()
    };
    orm.read(&mut fetched, &[]).await?;
    orm.load_related(&mut fetched, "profile", LoadRelatedOptions::default())
        .await?;
    println!(
        "{} is {} years old",
        fetched.name,
        fetched.profile.get().map_or(0, |p| p.age)
    );

    let stats = orm.stats();
    println!(
        "{} statements, {} inserts, {} reads",
        stats.statements, stats.inserts, stats.reads
    );
    Ok(())
}

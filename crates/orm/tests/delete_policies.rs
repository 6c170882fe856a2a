//! `on_delete` policies applied by `Orm::delete` on a real SQLite database

use tagorm::{
    AliasConfig, DatabaseBackendType, DatabaseValue, FieldDecl, FieldType, Model, ModelFields, Orm, OrmContext,
    OrmError, OrmResult, Related,
};

#[derive(Debug, Default)]
struct Owner {
    id: i64,
    name: String,
}

impl ModelFields for Owner {
    fn get_value(&self, field: &str) -> Option<DatabaseValue> {
        match field {
            "id" => Some(self.id.into()),
            "name" => Some(self.name.clone().into()),
            _ => None,
        }
    }

    fn set_value(&mut self, field: &str, value: DatabaseValue) -> OrmResult<()> {
        match field {
            "id" => self.id = value.decode()?,
            "name" => self.name = value.decode()?,
            _ => return Err(OrmError::unknown_field("Owner", field)),
        }
        Ok(())
    }
}

impl Model for Owner {
    fn fields() -> Vec<FieldDecl> {
        vec![
            FieldDecl::new("id", FieldType::Int64).tag("pk;auto"),
            FieldDecl::new("name", FieldType::String).tag("size(32)"),
        ]
    }
}

/// Loses its owner when the owner goes away
#[derive(Debug, Default)]
struct Pet {
    id: i64,
    owner: Related<Owner>,
}

/// Keeps pointing at a deleted owner
#[derive(Debug, Default)]
struct Badge {
    id: i64,
    owner: Related<Owner>,
}

macro_rules! owned_fields {
    ($ty:ident) => {
        impl ModelFields for $ty {
            fn get_value(&self, field: &str) -> Option<DatabaseValue> {
                match field {
                    "id" => Some(self.id.into()),
                    "owner" => Some(self.owner.key_value()),
                    _ => None,
                }
            }

            fn set_value(&mut self, field: &str, value: DatabaseValue) -> OrmResult<()> {
                match field {
                    "id" => self.id = value.decode()?,
                    "owner" => self.owner.set_key(value),
                    _ => return Err(OrmError::unknown_field(stringify!($ty), field)),
                }
                Ok(())
            }
        }
    };
}

owned_fields!(Pet);
owned_fields!(Badge);

impl Model for Pet {
    fn fields() -> Vec<FieldDecl> {
        vec![
            FieldDecl::new("id", FieldType::Int64).tag("pk;auto"),
            FieldDecl::related::<Owner>("owner").tag("rel(fk);null;on_delete(set_null)"),
        ]
    }
}

impl Model for Badge {
    fn fields() -> Vec<FieldDecl> {
        vec![
            FieldDecl::new("id", FieldType::Int64).tag("pk;auto"),
            FieldDecl::related::<Owner>("owner").tag("rel(fk);on_delete(do_nothing)"),
        ]
    }
}

/// Self-referencing rows; the default policy cascades
#[derive(Debug, Default)]
struct Node {
    id: i64,
    label: String,
    parent: Related<Node>,
}

impl ModelFields for Node {
    fn get_value(&self, field: &str) -> Option<DatabaseValue> {
        match field {
            "id" => Some(self.id.into()),
            "label" => Some(self.label.clone().into()),
            "parent" => Some(self.parent.key_value()),
            _ => None,
        }
    }

    fn set_value(&mut self, field: &str, value: DatabaseValue) -> OrmResult<()> {
        match field {
            "id" => self.id = value.decode()?,
            "label" => self.label = value.decode()?,
            "parent" => self.parent.set_key(value),
            _ => return Err(OrmError::unknown_field("Node", field)),
        }
        Ok(())
    }
}

impl Model for Node {
    fn fields() -> Vec<FieldDecl> {
        vec![
            FieldDecl::new("id", FieldType::Int64).tag("pk;auto"),
            FieldDecl::new("label", FieldType::String).tag("size(16)"),
            FieldDecl::related::<Node>("parent").tag("rel(fk);null"),
        ]
    }
}

async fn open() -> (OrmContext, Orm) {
    let ctx = OrmContext::new();
    ctx.register_models::<(Owner, Pet, Badge, Node)>().unwrap();
    ctx.connect_alias(AliasConfig::new(DatabaseBackendType::SQLite, "sqlite::memory:"))
        .await
        .unwrap();
    let mut orm = ctx.new_orm().unwrap();
    orm.sync_schema(false).await.unwrap();
    (ctx, orm)
}

#[tokio::test]
async fn test_set_null_and_do_nothing() {
    let (_ctx, mut orm) = open().await;

    let mut owner = Owner {
        name: "ana".to_string(),
        ..Default::default()
    };
    orm.insert(&mut owner).await.unwrap();

    let mut pet = Pet {
        owner: Related::key(owner.id),
        ..Default::default()
    };
    orm.insert(&mut pet).await.unwrap();
    let mut badge = Badge {
        owner: Related::key(owner.id),
        ..Default::default()
    };
    orm.insert(&mut badge).await.unwrap();

    assert_eq!(orm.delete(&owner).await.unwrap(), 1);
    assert_eq!(orm.count::<Owner>().await.unwrap(), 0);

    let mut stored_pet = Pet {
        id: pet.id,
        ..Default::default()
    };
    orm.read(&mut stored_pet, &[]).await.unwrap();
    assert!(!stored_pet.owner.is_set());

    let mut stored_badge = Badge {
        id: badge.id,
        ..Default::default()
    };
    orm.read(&mut stored_badge, &[]).await.unwrap();
    assert_eq!(stored_badge.owner.id(), Some(owner.id));
}

#[tokio::test]
async fn test_cascade_over_a_reference_cycle_terminates() {
    let (_ctx, mut orm) = open().await;

    let mut a = Node {
        label: "a".to_string(),
        ..Default::default()
    };
    orm.insert(&mut a).await.unwrap();
    let mut b = Node {
        label: "b".to_string(),
        parent: Related::key(a.id),
        ..Default::default()
    };
    orm.insert(&mut b).await.unwrap();
    a.parent = Related::key(b.id);
    orm.update(&a, &["parent"]).await.unwrap();

    let mut outsider = Node {
        label: "c".to_string(),
        ..Default::default()
    };
    orm.insert(&mut outsider).await.unwrap();

    assert_eq!(orm.delete(&a).await.unwrap(), 1);
    assert_eq!(orm.count::<Node>().await.unwrap(), 1);

    // A row pointing at itself is removed once
    let mut looped = Node {
        label: "loop".to_string(),
        ..Default::default()
    };
    orm.insert(&mut looped).await.unwrap();
    looped.parent = Related::key(looped.id);
    orm.update(&looped, &["parent"]).await.unwrap();
    assert_eq!(orm.delete(&looped).await.unwrap(), 1);
    assert_eq!(orm.count::<Node>().await.unwrap(), 1);
}

//! End-to-end round trip against an in-memory SQLite database

use chrono::{DateTime, Utc};
use tagorm::{
    AliasConfig, DatabaseBackendType, DatabaseValue, ErrorKind, FieldDecl, FieldType, LoadRelatedOptions, Model,
    ModelFields, Orm, OrmContext, OrmError, OrmResult, Related, RelatedSet,
};

#[derive(Debug, Default)]
struct Author {
    id: i64,
    name: String,
    posts: Vec<Post>,
}

impl ModelFields for Author {
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
            _ => return Err(OrmError::unknown_field("Author", field)),
        }
        Ok(())
    }

    fn set_related(&mut self, field: &str, related: RelatedSet) -> OrmResult<()> {
        match field {
            "posts" => self.posts = related.into_many()?,
            _ => return Err(OrmError::unknown_field("Author", field)),
        }
        Ok(())
    }
}

impl Model for Author {
    fn fields() -> Vec<FieldDecl> {
        vec![
            FieldDecl::new("id", FieldType::Int64).tag("pk;auto"),
            FieldDecl::new("name", FieldType::String).tag("size(64)"),
            FieldDecl::related::<Post>("posts").tag("reverse(many)"),
        ]
    }
}

#[derive(Debug, Default)]
struct Post {
    id: i64,
    title: String,
    author: Related<Author>,
    tags: Vec<Tag>,
    created: Option<DateTime<Utc>>,
}

impl ModelFields for Post {
    fn get_value(&self, field: &str) -> Option<DatabaseValue> {
        match field {
            "id" => Some(self.id.into()),
            "title" => Some(self.title.clone().into()),
            "author" => Some(self.author.key_value()),
            "created" => Some(self.created.into()),
            _ => None,
        }
    }

    fn set_value(&mut self, field: &str, value: DatabaseValue) -> OrmResult<()> {
        match field {
            "id" => self.id = value.decode()?,
            "title" => self.title = value.decode()?,
            "author" => self.author.set_key(value),
            "created" => self.created = value.decode()?,
            _ => return Err(OrmError::unknown_field("Post", field)),
        }
        Ok(())
    }

    fn set_related(&mut self, field: &str, related: RelatedSet) -> OrmResult<()> {
        match field {
            "author" => self.author.set_loaded(related.into_one()?),
            "tags" => self.tags = related.into_many()?,
            _ => return Err(OrmError::unknown_field("Post", field)),
        }
        Ok(())
    }
}

impl Model for Post {
    fn fields() -> Vec<FieldDecl> {
        vec![
            FieldDecl::new("id", FieldType::Int64).tag("pk;auto"),
            FieldDecl::new("title", FieldType::String).tag("size(200);index"),
            FieldDecl::related::<Author>("author").tag("rel(fk)"),
            FieldDecl::related::<Tag>("tags").tag("rel(m2m)"),
            FieldDecl::new("created", FieldType::DateTime).tag("auto_now_add;null"),
        ]
    }
}

#[derive(Debug, Default)]
struct Tag {
    id: i64,
    name: String,
    weight: i32,
}

impl ModelFields for Tag {
    fn get_value(&self, field: &str) -> Option<DatabaseValue> {
        match field {
            "id" => Some(self.id.into()),
            "name" => Some(self.name.clone().into()),
            "weight" => Some(self.weight.into()),
            _ => None,
        }
    }

    fn set_value(&mut self, field: &str, value: DatabaseValue) -> OrmResult<()> {
        match field {
            "id" => self.id = value.decode()?,
            "name" => self.name = value.decode()?,
            "weight" => self.weight = value.decode()?,
            _ => return Err(OrmError::unknown_field("Tag", field)),
        }
        Ok(())
    }
}

impl Model for Tag {
    fn fields() -> Vec<FieldDecl> {
        vec![
            FieldDecl::new("id", FieldType::Int64).tag("pk;auto"),
            FieldDecl::new("name", FieldType::String).tag("size(32);unique"),
            FieldDecl::new("weight", FieldType::Int32).tag("default(0)"),
            FieldDecl::related::<Post>("posts").tag("reverse(many)"),
        ]
    }
}

async fn open() -> (OrmContext, Orm) {
    let ctx = OrmContext::new();
    ctx.register_models::<(Author, Post, Tag)>().unwrap();
    ctx.connect_alias(AliasConfig::new(DatabaseBackendType::SQLite, "sqlite::memory:"))
        .await
        .unwrap();
    let mut orm = ctx.new_orm().unwrap();
    // author, post, tag, the post/tag join table and the title index
    assert_eq!(orm.sync_schema(false).await.unwrap(), 5);
    (ctx, orm)
}

async fn tag(orm: &mut Orm, name: &str) -> Tag {
    let mut tag = Tag {
        name: name.to_string(),
        ..Default::default()
    };
    orm.insert(&mut tag).await.unwrap();
    tag
}

#[tokio::test]
async fn test_crud_round_trip() {
    let (_ctx, mut orm) = open().await;

    let mut author = Author {
        name: "slene".to_string(),
        ..Default::default()
    };
    assert_eq!(orm.insert(&mut author).await.unwrap(), 1);

    let mut post = Post {
        title: "hello".to_string(),
        author: Related::key(author.id),
        ..Default::default()
    };
    let id = orm.insert(&mut post).await.unwrap();
    assert_eq!(post.id, id);

    let mut fetched = Post {
        id,
        ..Default::default()
    };
    orm.read(&mut fetched, &[]).await.unwrap();
    assert_eq!(fetched.title, "hello");
    assert_eq!(fetched.author.id(), Some(author.id));
    assert!(fetched.created.is_some());
    assert!(!fetched.author.is_loaded());

    fetched.title = "hello again".to_string();
    assert_eq!(orm.update(&fetched, &["title"]).await.unwrap(), 1);

    let mut by_title = Post {
        title: "hello again".to_string(),
        ..Default::default()
    };
    orm.read(&mut by_title, &["title"]).await.unwrap();
    assert_eq!(by_title.id, id);

    assert_eq!(orm.count::<Post>().await.unwrap(), 1);
    assert_eq!(orm.delete(&by_title).await.unwrap(), 1);
    assert_eq!(orm.count::<Post>().await.unwrap(), 0);
    assert_eq!(orm.read(&mut by_title, &[]).await.unwrap_err().kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_unique_violation_is_a_constraint_error() {
    let (_ctx, mut orm) = open().await;

    let rust = tag(&mut orm, "rust").await;
    let go = tag(&mut orm, "go").await;
    let mut duplicate = Tag {
        name: "rust".to_string(),
        ..Default::default()
    };
    let err = orm.insert(&mut duplicate).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Constraint);

    let mut upsert = Tag {
        name: "rust".to_string(),
        weight: 9,
        ..Default::default()
    };
    // The last insert on the connection was "go"; the conflicting row is "rust"
    assert_ne!(go.id, rust.id);
    assert_eq!(orm.insert_or_update(&mut upsert, Some("name")).await.unwrap(), rust.id);
    assert_eq!(upsert.id, rust.id);

    let mut stored = Tag {
        name: "rust".to_string(),
        ..Default::default()
    };
    orm.read(&mut stored, &["name"]).await.unwrap();
    assert_eq!(stored.weight, 9);
    assert_eq!(orm.count::<Tag>().await.unwrap(), 2);

    let mut fresh = Tag {
        name: "zig".to_string(),
        ..Default::default()
    };
    let id = orm.insert_or_update(&mut fresh, Some("name")).await.unwrap();
    assert_eq!(fresh.id, id);
    assert_eq!(orm.count::<Tag>().await.unwrap(), 3);
}

#[tokio::test]
async fn test_many_to_many_and_nested_loading() {
    let (_ctx, mut orm) = open().await;

    let mut author = Author {
        name: "astaxie".to_string(),
        ..Default::default()
    };
    orm.insert(&mut author).await.unwrap();

    let mut posts = vec![
        Post {
            title: "b-second".to_string(),
            author: Related::key(author.id),
            ..Default::default()
        },
        Post {
            title: "a-first".to_string(),
            author: Related::key(author.id),
            ..Default::default()
        },
    ];
    assert_eq!(orm.insert_multi(1, &mut posts).await.unwrap(), 2);

    let rust = tag(&mut orm, "rust").await;
    let orm_tag = tag(&mut orm, "orm").await;

    {
        let mut tags = orm.query_m2m(&posts[0], "tags").unwrap();
        assert_eq!(tags.join_table(), "post_tags");
        assert_eq!(tags.add(vec![rust.id, orm_tag.id]).await.unwrap(), 2);
        assert!(tags.exist(rust.id).await.unwrap());
        assert_eq!(tags.count().await.unwrap(), 2);
        assert_eq!(tags.remove(vec![orm_tag.id]).await.unwrap(), 1);
        assert!(!tags.exist(orm_tag.id).await.unwrap());
    }

    // The reverse side sees the same join rows
    assert_eq!(orm.query_m2m(&rust, "posts").unwrap().count().await.unwrap(), 1);

    let loaded = orm
        .load_related(&mut posts[0], "tags", LoadRelatedOptions::default())
        .await
        .unwrap();
    assert_eq!(loaded, 1);
    assert_eq!(posts[0].tags[0].name, "rust");

    let loaded = orm
        .load_related(
            &mut author,
            "posts",
            LoadRelatedOptions::default().with_depth(2).with_order("title"),
        )
        .await
        .unwrap();
    assert_eq!(loaded, 2);
    assert_eq!(author.posts[0].title, "a-first");
    assert_eq!(
        author.posts[1].author.get().map(|a| a.name.as_str()),
        Some("astaxie")
    );

    let page = orm
        .load_related(
            &mut author,
            "posts",
            LoadRelatedOptions::default().with_order("-title").with_limit(Some(1)),
        )
        .await
        .unwrap();
    assert_eq!(page, 1);
    assert_eq!(author.posts[0].title, "b-second");
    assert!(!author.posts[0].author.is_loaded());

    // Deleting the author cascades to its posts and their join rows
    orm.delete(&author).await.unwrap();
    assert_eq!(orm.count::<Post>().await.unwrap(), 0);
    assert_eq!(orm.query_m2m(&rust, "posts").unwrap().count().await.unwrap(), 0);
    assert_eq!(orm.count::<Tag>().await.unwrap(), 2);
}

#[tokio::test]
async fn test_transaction_rollback_discards_writes() {
    let (_ctx, mut orm) = open().await;

    orm.begin().await.unwrap();
    tag(&mut orm, "draft").await;
    assert_eq!(orm.count::<Tag>().await.unwrap(), 1);
    orm.rollback().await.unwrap();
    assert_eq!(orm.count::<Tag>().await.unwrap(), 0);

    orm.begin().await.unwrap();
    tag(&mut orm, "kept").await;
    orm.commit().await.unwrap();
    assert_eq!(orm.count::<Tag>().await.unwrap(), 1);

    let stats = orm.stats();
    assert_eq!(stats.transactions_committed, 1);
    assert_eq!(stats.transactions_rolled_back, 1);
}

//! SQL Generation Benchmarks
//!
//! Statement building per dialect and value collection from a registered model

use chrono::{FixedOffset, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tagorm::backends::{SelectOptions, StatementBuilder};
use tagorm::{
    DatabaseValue, FieldDecl, FieldIntrospector, FieldType, Model, ModelFields, ModelRegistry, OrmError, OrmResult,
    SqlDialect, WriteOp,
};

#[derive(Debug, Default)]
struct Article {
    id: i64,
    title: String,
    body: String,
    views: i64,
    published: bool,
}

impl ModelFields for Article {
    fn get_value(&self, field: &str) -> Option<DatabaseValue> {
        match field {
            "id" => Some(self.id.into()),
            "title" => Some(self.title.clone().into()),
            "body" => Some(self.body.clone().into()),
            "views" => Some(self.views.into()),
            "published" => Some(self.published.into()),
            _ => None,
        }
    }

    fn set_value(&mut self, field: &str, value: DatabaseValue) -> OrmResult<()> {
        match field {
            "id" => self.id = value.decode()?,
            "title" => self.title = value.decode()?,
            "body" => self.body = value.decode()?,
            "views" => self.views = value.decode()?,
            "published" => self.published = value.decode()?,
            _ => return Err(OrmError::unknown_field("Article", field)),
        }
        Ok(())
    }
}

impl Model for Article {
    fn fields() -> Vec<FieldDecl> {
        vec![
            FieldDecl::new("id", FieldType::Int64).tag("pk;auto"),
            FieldDecl::new("title", FieldType::String).tag("size(200)"),
            FieldDecl::new("body", FieldType::Text),
            FieldDecl::new("views", FieldType::Int64),
            FieldDecl::new("published", FieldType::Bool),
        ]
    }
}

const DIALECTS: [SqlDialect; 3] = [SqlDialect::PostgreSQL, SqlDialect::MySQL, SqlDialect::SQLite];

fn bench_single_statements(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_statements");
    let columns = ["title", "body", "views", "published"];

    for dialect in DIALECTS {
        let builder = StatementBuilder::new(dialect);
        let name = format!("{:?}", dialect);

        group.bench_with_input(BenchmarkId::new("insert", &name), &builder, |b, builder| {
            b.iter(|| black_box(builder.insert("article", &columns, 1, Some("id"))))
        });
        group.bench_with_input(BenchmarkId::new("update", &name), &builder, |b, builder| {
            b.iter(|| black_box(builder.update("article", &columns, &["id"])))
        });
        group.bench_with_input(BenchmarkId::new("select", &name), &builder, |b, builder| {
            let options = SelectOptions {
                limit: Some(1000),
                ..Default::default()
            };
            b.iter(|| black_box(builder.select("article", &columns, &["id"], &options)))
        });
    }

    group.finish();
}

fn bench_multi_row_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("multi_row_insert");
    let builder = StatementBuilder::new(SqlDialect::PostgreSQL);
    let columns = ["title", "body", "views", "published"];

    for rows in [10usize, 100, 1000] {
        group.bench_with_input(BenchmarkId::new("rows", rows), &rows, |b, &rows| {
            b.iter(|| black_box(builder.insert("article", &columns, rows, None)))
        });
    }

    group.finish();
}

fn bench_value_collection(c: &mut Criterion) {
    let mut group = c.benchmark_group("value_collection");
    let registry = ModelRegistry::new();
    registry.register::<Article>().expect("register Article");
    registry.bootstrap().expect("bootstrap");
    let meta = registry.get_by_type::<Article>().expect("Article metadata");

    let article = Article {
        id: 7,
        title: "Benchmarks".to_string(),
        body: "x".repeat(512),
        views: 42,
        published: true,
    };
    let now = Utc::now().with_timezone(&FixedOffset::east_opt(0).expect("utc offset"));

    group.bench_function("collect_insert", |b| {
        b.iter(|| black_box(FieldIntrospector::collect(&meta, &article, &[], WriteOp::Insert, now)))
    });
    group.bench_function("collect_update_named", |b| {
        b.iter(|| black_box(FieldIntrospector::collect(&meta, &article, &["title", "views"], WriteOp::Update, now)))
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_single_statements,
    bench_multi_row_insert,
    bench_value_collection
);
criterion_main!(benches);

//! Schema Builder - DDL generated from model metadata
//!
//! `sync_statements` produces CREATE TABLE / CREATE INDEX statements for every
//! registered model and every implicit many-to-many join table. Relation
//! policies (`on_delete`) are enforced by the ORM, not by database foreign
//! keys, so no REFERENCES clauses are emitted.

use crate::backends::SqlDialect;
use crate::error::{OrmError, OrmResult};
use crate::metadata::{FieldKind, FieldMetadata, ModelMetadata, ValueEncoding};
use crate::model::FieldType;
use crate::registry::{M2MJoin, ModelRegistry};

const DEFAULT_VARCHAR: u32 = 255;
const DEFAULT_DIGITS: u32 = 10;

/// Collects DDL statements for one dialect
#[derive(Debug, Clone)]
pub struct SchemaBuilder {
    dialect: SqlDialect,
    statements: Vec<String>,
}

impl SchemaBuilder {
    pub fn new(dialect: SqlDialect) -> Self {
        Self {
            dialect,
            statements: Vec::new(),
        }
    }

    fn quote(&self, identifier: &str) -> String {
        self.dialect.quote(identifier)
    }

    /// Drop a table
    pub fn drop_table(&mut self, table: &str) -> &mut Self {
        self.statements
            .push(format!("DROP TABLE IF EXISTS {}", self.quote(table)));
        self
    }

    /// CREATE TABLE for a model, followed by its indexes
    pub fn create_model(&mut self, registry: &ModelRegistry, meta: &ModelMetadata) -> OrmResult<&mut Self> {
        let mut columns = Vec::new();
        for field in meta.stored_fields() {
            let key_type = match field.kind {
                FieldKind::ForeignKey | FieldKind::OneToOne => Some(target_key_type(registry, field)?),
                _ => None,
            };
            columns.push(self.column_definition(field, key_type)?);
        }

        let pk_column = meta.primary_key().and_then(|f| f.column());
        for group in &meta.unique_groups {
            if group.len() == 1 && Some(group[0].as_str()) == pk_column {
                continue;
            }
            columns.push(format!("UNIQUE ({})", self.column_list(group)));
        }

        self.push_create_table(&meta.table, columns);

        for group in &meta.index_groups {
            if meta.unique_groups.contains(group) {
                continue;
            }
            self.create_index(&meta.table, group);
        }
        Ok(self)
    }

    /// CREATE TABLE for a join table that has no model of its own
    pub fn create_join_table(&mut self, join: &M2MJoin) -> OrmResult<&mut Self> {
        let owner_type = key_type_of(&join.owner)?;
        let target_type = key_type_of(&join.target)?;

        let columns = vec![
            format!("{} {}", self.quote("id"), self.auto_key(FieldType::Int64)),
            format!(
                "{} {} NOT NULL",
                self.quote(&join.owner_column),
                self.column_type(owner_type, None, None, None, None)
            ),
            format!(
                "{} {} NOT NULL",
                self.quote(&join.target_column),
                self.column_type(target_type, None, None, None, None)
            ),
            format!(
                "UNIQUE ({})",
                self.column_list(&[join.owner_column.clone(), join.target_column.clone()])
            ),
        ];
        self.push_create_table(&join.table, columns);
        Ok(self)
    }

    /// Create an index named `idx_<table>_<columns>`
    pub fn create_index(&mut self, table: &str, columns: &[String]) -> &mut Self {
        let name = format!("idx_{}_{}", table, columns.join("_"));
        let if_not_exists = match self.dialect {
            SqlDialect::MySQL => "",
            SqlDialect::PostgreSQL | SqlDialect::SQLite => "IF NOT EXISTS ",
        };
        self.statements.push(format!(
            "CREATE INDEX {}{} ON {} ({})",
            if_not_exists,
            self.quote(&name),
            self.quote(table),
            self.column_list(columns)
        ));
        self
    }

    /// Get all SQL statements
    pub fn to_sql(&self) -> Vec<String> {
        self.statements.clone()
    }

    fn push_create_table(&mut self, table: &str, columns: Vec<String>) {
        let mut sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
            self.quote(table),
            columns.join(",\n    ")
        );
        if self.dialect == SqlDialect::MySQL {
            sql.push_str(" ENGINE=InnoDB DEFAULT CHARSET=utf8mb4");
        }
        self.statements.push(sql);
    }

    fn column_list(&self, columns: &[String]) -> String {
        columns
            .iter()
            .map(|c| self.quote(c))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn column_definition(&self, field: &FieldMetadata, key_type: Option<FieldType>) -> OrmResult<String> {
        let column = field
            .column()
            .ok_or_else(|| OrmError::Programmer(format!("field '{}' has no column", field.path)))?;
        let mut sql = format!("{} ", self.quote(column));

        if field.kind == FieldKind::AutoPk {
            sql.push_str(&self.auto_key(field.field_type));
            return Ok(sql);
        }

        let field_type = key_type.unwrap_or(field.field_type);
        sql.push_str(&self.column_type(
            field_type,
            field.size,
            field.digits,
            field.decimals,
            field.encoding,
        ));
        if field.primary_key {
            sql.push_str(" PRIMARY KEY");
        } else if !field.nullable {
            sql.push_str(" NOT NULL");
        }
        if let Some(default) = &field.default {
            sql.push_str(" DEFAULT ");
            sql.push_str(&default_literal(field_type, default));
        }
        if let (SqlDialect::MySQL, Some(description)) = (self.dialect, &field.description) {
            sql.push_str(&format!(" COMMENT '{}'", description.replace('\'', "''")));
        }
        Ok(sql)
    }

    fn auto_key(&self, field_type: FieldType) -> String {
        match (self.dialect, field_type) {
            (SqlDialect::PostgreSQL, FieldType::Int32) => "SERIAL PRIMARY KEY".to_string(),
            (SqlDialect::PostgreSQL, _) => "BIGSERIAL PRIMARY KEY".to_string(),
            (SqlDialect::MySQL, FieldType::Int32) => "INT AUTO_INCREMENT PRIMARY KEY".to_string(),
            (SqlDialect::MySQL, _) => "BIGINT AUTO_INCREMENT PRIMARY KEY".to_string(),
            (SqlDialect::SQLite, _) => "INTEGER PRIMARY KEY AUTOINCREMENT".to_string(),
        }
    }

    fn column_type(
        &self,
        field_type: FieldType,
        size: Option<u32>,
        digits: Option<u32>,
        decimals: Option<u32>,
        encoding: Option<ValueEncoding>,
    ) -> String {
        use SqlDialect::*;

        let dialect = self.dialect;
        match field_type {
            FieldType::Bool => match dialect {
                PostgreSQL => "BOOLEAN".into(),
                MySQL => "BOOL".into(),
                SQLite => "INTEGER".into(),
            },
            FieldType::Int32 => match dialect {
                MySQL => "INT".into(),
                PostgreSQL | SQLite => "INTEGER".into(),
            },
            FieldType::Int64 | FieldType::Relation => match dialect {
                SQLite => "INTEGER".into(),
                PostgreSQL | MySQL => "BIGINT".into(),
            },
            FieldType::Float64 => match dialect {
                PostgreSQL => "DOUBLE PRECISION".into(),
                MySQL => "DOUBLE".into(),
                SQLite => "REAL".into(),
            },
            FieldType::Decimal => {
                let digits = digits.unwrap_or(DEFAULT_DIGITS);
                let decimals = decimals.unwrap_or(0);
                match dialect {
                    PostgreSQL => format!("NUMERIC({}, {})", digits, decimals),
                    MySQL | SQLite => format!("DECIMAL({}, {})", digits, decimals),
                }
            }
            FieldType::String => format!("VARCHAR({})", size.unwrap_or(DEFAULT_VARCHAR)),
            FieldType::Text => match dialect {
                MySQL => "LONGTEXT".into(),
                PostgreSQL | SQLite => "TEXT".into(),
            },
            FieldType::Bytes => match dialect {
                PostgreSQL => "BYTEA".into(),
                MySQL => "LONGBLOB".into(),
                SQLite => "BLOB".into(),
            },
            FieldType::DateTime => match dialect {
                PostgreSQL => "TIMESTAMPTZ".into(),
                MySQL => "DATETIME(6)".into(),
                SQLite => "TEXT".into(),
            },
            FieldType::Date => match dialect {
                SQLite => "TEXT".into(),
                PostgreSQL | MySQL => "DATE".into(),
            },
            FieldType::Time => match dialect {
                SQLite => "TEXT".into(),
                PostgreSQL | MySQL => "TIME".into(),
            },
            FieldType::Uuid => match dialect {
                PostgreSQL => "UUID".into(),
                MySQL => "CHAR(36)".into(),
                SQLite => "TEXT".into(),
            },
            FieldType::Json => self.json_type(),
            FieldType::List => match encoding {
                Some(ValueEncoding::Json) => self.json_type(),
                _ => match dialect {
                    MySQL => "LONGTEXT".into(),
                    PostgreSQL | SQLite => "TEXT".into(),
                },
            },
        }
    }

    fn json_type(&self) -> String {
        match self.dialect {
            SqlDialect::PostgreSQL => "JSONB".into(),
            SqlDialect::MySQL => "JSON".into(),
            SqlDialect::SQLite => "TEXT".into(),
        }
    }
}

/// Value type of a model's primary key, as stored in referencing columns
fn key_type_of(meta: &ModelMetadata) -> OrmResult<FieldType> {
    let pk = meta.require_primary_key()?;
    Ok(match pk.field_type {
        FieldType::Relation => FieldType::Int64,
        other => other,
    })
}

fn target_key_type(registry: &ModelRegistry, field: &FieldMetadata) -> OrmResult<FieldType> {
    let target = registry.target_of(field)?;
    key_type_of(&target)
}

fn default_literal(field_type: FieldType, value: &str) -> String {
    match field_type {
        FieldType::Bool | FieldType::Int32 | FieldType::Int64 | FieldType::Float64 | FieldType::Decimal => {
            value.to_string()
        }
        _ => format!("'{}'", value.replace('\'', "''")),
    }
}

/// DDL for every registered model and implicit join table, in registration
/// order. With `drop_existing`, DROP statements come first, join tables
/// before the models they link.
pub fn sync_statements(registry: &ModelRegistry, dialect: SqlDialect, drop_existing: bool) -> OrmResult<Vec<String>> {
    let models = registry.models();
    let joins = registry.implicit_join_tables()?;
    let mut builder = SchemaBuilder::new(dialect);

    if drop_existing {
        for join in &joins {
            builder.drop_table(&join.table);
        }
        for meta in models.iter().rev() {
            builder.drop_table(&meta.table);
        }
    }
    for meta in &models {
        builder.create_model(registry, meta)?;
    }
    for join in &joins {
        builder.create_join_table(join)?;
    }
    Ok(builder.to_sql())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::DatabaseValue;
    use crate::model::{FieldDecl, Model, ModelFields, Related};

    #[derive(Debug, Default)]
    struct Tag {
        id: i64,
    }

    impl ModelFields for Tag {
        fn get_value(&self, field: &str) -> Option<DatabaseValue> {
            (field == "id").then(|| self.id.into())
        }

        fn set_value(&mut self, field: &str, value: DatabaseValue) -> OrmResult<()> {
            if field == "id" {
                self.id = value.decode()?;
            }
            Ok(())
        }
    }

    impl Model for Tag {
        fn fields() -> Vec<FieldDecl> {
            vec![
                FieldDecl::new("id", FieldType::Int64).tag("pk;auto"),
                FieldDecl::new("label", FieldType::String).tag("size(32);unique;description(shown to users)"),
            ]
        }
    }

    #[derive(Debug, Default)]
    struct Post {
        id: i64,
        author: Related<Tag>,
    }

    impl ModelFields for Post {
        fn get_value(&self, field: &str) -> Option<DatabaseValue> {
            match field {
                "id" => Some(self.id.into()),
                "author" => Some(self.author.key_value()),
                _ => None,
            }
        }

        fn set_value(&mut self, _field: &str, _value: DatabaseValue) -> OrmResult<()> {
            Ok(())
        }
    }

    impl Model for Post {
        fn fields() -> Vec<FieldDecl> {
            vec![
                FieldDecl::new("id", FieldType::Int64).tag("pk;auto"),
                FieldDecl::new("title", FieldType::String).tag("size(120);index"),
                FieldDecl::new("views", FieldType::Int32).tag("default(0)"),
                FieldDecl::new("status", FieldType::String).tag("default(draft)"),
                FieldDecl::related::<Tag>("author").tag("rel(fk);null;on_delete(set_null)"),
                FieldDecl::related::<Tag>("tags").tag("rel(m2m)"),
            ]
        }
    }

    fn registry() -> ModelRegistry {
        let registry = ModelRegistry::new();
        registry.register::<Post>().unwrap();
        registry.bootstrap().unwrap();
        registry
    }

    #[test]
    fn test_postgres_ddl() {
        let statements = sync_statements(&registry(), SqlDialect::PostgreSQL, false).unwrap();
        let post = statements.iter().find(|s| s.contains("TABLE IF NOT EXISTS \"post\"")).unwrap();

        assert!(post.contains("\"id\" BIGSERIAL PRIMARY KEY"));
        assert!(post.contains("\"title\" VARCHAR(120) NOT NULL"));
        assert!(post.contains("\"views\" INTEGER NOT NULL DEFAULT 0"));
        assert!(post.contains("\"status\" VARCHAR(255) NOT NULL DEFAULT 'draft'"));
        assert!(post.contains("\"author_id\" BIGINT"));
        assert!(!post.contains("\"author_id\" BIGINT NOT NULL"));
        assert!(!post.contains("REFERENCES"));

        assert!(statements
            .iter()
            .any(|s| s == "CREATE INDEX IF NOT EXISTS \"idx_post_title\" ON \"post\" (\"title\")"));
        let tag = statements.iter().find(|s| s.contains("\"tag\" (")).unwrap();
        assert!(tag.contains("UNIQUE (\"label\")"));
        assert!(statements.iter().any(|s| s.contains("\"post_tags\"")));
    }

    #[test]
    fn test_mysql_and_sqlite_ddl() {
        let registry = registry();
        let mysql = sync_statements(&registry, SqlDialect::MySQL, true).unwrap();
        assert!(mysql[0].starts_with("DROP TABLE IF EXISTS `post_tags`"));
        assert!(mysql.iter().any(|s| s.contains("`id` BIGINT AUTO_INCREMENT PRIMARY KEY")));
        assert!(mysql.iter().any(|s| s.contains("COMMENT 'shown to users'")));
        assert!(mysql.iter().any(|s| s.ends_with("ENGINE=InnoDB DEFAULT CHARSET=utf8mb4")));
        assert!(mysql.iter().any(|s| s.starts_with("CREATE INDEX `idx_post_title`")));

        let sqlite = sync_statements(&registry, SqlDialect::SQLite, false).unwrap();
        assert!(sqlite.iter().any(|s| s.contains("\"id\" INTEGER PRIMARY KEY AUTOINCREMENT")));
        assert!(sqlite.iter().any(|s| s.contains("\"post_id\" INTEGER NOT NULL")));
    }
}

//! Model metadata - Tables, columns and relations compiled from field tags
//!
//! Metadata is built once per model at registration and shared behind `Arc`
//! afterwards. Nothing here touches a database.

pub mod naming;
pub mod tags;

use crate::error::{OrmError, OrmResult};
use crate::model::core_trait::{full_model_name, namespace_of, short_name_of, Model};
use crate::model::fields::{FieldDecl, FieldType, ModelRef};

pub use naming::snake_case;
pub use tags::RelKind;
use tags::{parse_tags, FieldTags};

/// How a field maps onto the table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Plain,
    /// Auto-increment primary key
    AutoPk,
    ForeignKey,
    OneToOne,
    ManyToMany,
    /// Back-reference to a relation declared on another model
    Reverse,
    AutoNow,
    AutoNowAdd,
}

impl FieldKind {
    /// Foreign key or one-to-one: stored as a key column
    pub fn is_forward_relation(self) -> bool {
        matches!(self, FieldKind::ForeignKey | FieldKind::OneToOne)
    }

    pub fn is_relation(self) -> bool {
        matches!(
            self,
            FieldKind::ForeignKey | FieldKind::OneToOne | FieldKind::ManyToMany | FieldKind::Reverse
        )
    }

    /// Whether the field owns a column on its model's table
    pub fn has_column(self) -> bool {
        !matches!(self, FieldKind::ManyToMany | FieldKind::Reverse)
    }
}

/// What happens to dependent rows when the referenced row is deleted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OnDelete {
    #[default]
    Cascade,
    /// Requires the relation field to be nullable
    SetNull,
    DoNothing,
}

/// Storage encoding for lists and other composite values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueEncoding {
    /// JSON text in a text column
    Text,
    /// Native JSON column
    Json,
}

/// Cardinality of a reverse relation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReverseKind {
    One,
    Many,
}

/// Metadata for a single model field
#[derive(Debug, Clone)]
pub struct FieldMetadata {
    /// Full name of the owning model
    pub model: String,
    /// Field path, dot-separated for embedded fields
    pub path: String,
    pub kind: FieldKind,
    pub field_type: FieldType,
    /// Column name; `None` for many-to-many and reverse fields
    pub column: Option<String>,
    pub primary_key: bool,
    pub nullable: bool,
    pub indexed: bool,
    pub unique: bool,
    pub default: Option<String>,
    pub size: Option<u32>,
    pub digits: Option<u32>,
    pub decimals: Option<u32>,
    pub encoding: Option<ValueEncoding>,
    /// Full name of the relation target
    pub target: Option<String>,
    pub(crate) target_ref: Option<ModelRef>,
    pub reverse: Option<ReverseKind>,
    /// Field on the target a reverse relation points back through
    pub back_reference: Option<String>,
    /// Join table override for many-to-many
    pub rel_table: Option<String>,
    /// Through model for many-to-many, as written in the tag
    pub rel_through: Option<String>,
    /// Through model full name, resolved at bootstrap
    pub through_model: Option<String>,
    pub on_delete: OnDelete,
    pub description: Option<String>,
}

impl FieldMetadata {
    fn from_decl(model_name: &str, decl: FieldDecl, tags: FieldTags) -> OrmResult<Self> {
        let short = short_name_of(model_name);
        let fail = |msg: String| OrmError::Programmer(format!("{}.{}: {}", short, decl.path, msg));

        let is_relation_decl = decl.field_type == FieldType::Relation;
        if tags.rel.is_some() && tags.reverse.is_some() {
            return Err(fail("rel(..) and reverse(..) cannot be combined".into()));
        }
        if (tags.rel.is_some() || tags.reverse.is_some()) && !is_relation_decl {
            return Err(fail("relation tags need a related field declaration".into()));
        }
        if is_relation_decl && tags.rel.is_none() && tags.reverse.is_none() {
            return Err(fail("related field needs a rel(..) or reverse(..) tag".into()));
        }
        if tags.auto_now && tags.auto_now_add {
            return Err(fail("auto_now and auto_now_add are exclusive".into()));
        }

        let snake_path = snake_case(&decl.path);
        let mut reverse = None;
        let mut back_reference = None;

        let kind = if let Some(rel) = tags.rel {
            match rel {
                RelKind::ForeignKey => FieldKind::ForeignKey,
                RelKind::OneToOne => FieldKind::OneToOne,
                RelKind::ManyToMany => FieldKind::ManyToMany,
            }
        } else if let Some(arg) = &tags.reverse {
            match arg.as_str() {
                "one" => reverse = Some(ReverseKind::One),
                "many" => reverse = Some(ReverseKind::Many),
                field => {
                    reverse = Some(ReverseKind::Many);
                    back_reference = Some(field.to_string());
                }
            }
            FieldKind::Reverse
        } else if tags.auto {
            if !decl.field_type.is_integer() {
                return Err(fail("auto requires an integer field".into()));
            }
            FieldKind::AutoPk
        } else if tags.auto_now || tags.auto_now_add {
            if !matches!(decl.field_type, FieldType::DateTime | FieldType::Date | FieldType::Time) {
                return Err(fail("auto_now/auto_now_add require a date or time field".into()));
            }
            if tags.auto_now {
                FieldKind::AutoNow
            } else {
                FieldKind::AutoNowAdd
            }
        } else {
            FieldKind::Plain
        };

        if kind == FieldKind::AutoPk && tags.null {
            return Err(fail("an auto primary key cannot be null".into()));
        }
        if tags.pk && !kind.has_column() {
            return Err(fail("a primary key needs a column".into()));
        }
        if tags.rel_table.is_some() || tags.rel_through.is_some() {
            if kind != FieldKind::ManyToMany {
                return Err(fail("rel_table/rel_through only apply to rel(m2m)".into()));
            }
            if tags.rel_table.is_some() && tags.rel_through.is_some() {
                return Err(fail("rel_table and rel_through are exclusive".into()));
            }
        }

        let on_delete = tags.on_delete.unwrap_or_default();
        if tags.on_delete.is_some() && !kind.is_forward_relation() {
            return Err(fail("on_delete only applies to rel(fk) and rel(one)".into()));
        }
        if on_delete == OnDelete::SetNull && !tags.null {
            return Err(fail("on_delete(set_null) requires null".into()));
        }

        match (decl.field_type, tags.encoding) {
            (FieldType::List, None) => {
                return Err(fail("list fields need type(text) or type(json)".into()))
            }
            (FieldType::List | FieldType::Json, _) | (_, None) => {}
            (_, Some(_)) => return Err(fail("type(..) only applies to list and JSON fields".into())),
        }

        let column = if !kind.has_column() {
            None
        } else if let Some(column) = tags.column.clone() {
            Some(column)
        } else if kind.is_forward_relation() {
            Some(format!("{}_id", snake_path))
        } else {
            Some(snake_path)
        };

        Ok(Self {
            model: model_name.to_string(),
            path: decl.path,
            kind,
            field_type: decl.field_type,
            column,
            primary_key: tags.pk || kind == FieldKind::AutoPk,
            nullable: tags.null,
            indexed: tags.index,
            unique: tags.unique || kind == FieldKind::OneToOne,
            default: tags.default,
            size: tags.size,
            digits: tags.digits,
            decimals: tags.decimals,
            encoding: tags.encoding,
            target: decl.target.map(|t| t.name().to_string()),
            target_ref: decl.target,
            reverse,
            back_reference,
            rel_table: tags.rel_table,
            rel_through: tags.rel_through,
            through_model: None,
            on_delete,
            description: tags.description,
        })
    }

    pub fn column(&self) -> Option<&str> {
        self.column.as_deref()
    }

    pub fn is_auto(&self) -> bool {
        self.kind == FieldKind::AutoPk
    }

    /// Field value must be present when written
    pub fn is_required(&self) -> bool {
        !self.nullable && self.default.is_none() && self.kind == FieldKind::Plain && !self.primary_key
    }
}

/// Metadata for a registered model
#[derive(Debug, Clone)]
pub struct ModelMetadata {
    /// Fully-qualified type name
    pub full_name: String,
    pub namespace: String,
    /// Short type name
    pub name: String,
    pub table: String,
    /// Table prefix given at registration, empty when none
    pub prefix: String,
    pub fields: Vec<FieldMetadata>,
    /// Index of the primary key in `fields`
    pub pk_index: Option<usize>,
    /// Column groups that must be unique together, single columns included
    pub unique_groups: Vec<Vec<String>>,
    pub index_groups: Vec<Vec<String>>,
    pub manual_pk: bool,
    /// Named as `rel_through` by a many-to-many field
    pub is_junction: bool,
}

impl ModelMetadata {
    /// Compile the declarations of `M`
    pub fn build<M: Model>(prefix: Option<&str>) -> OrmResult<Self> {
        let full_name = full_model_name::<M>();
        let name = short_name_of(full_name);
        let base_table = match M::table_name() {
            Some(table) => table.to_string(),
            None => snake_case(name),
        };
        let table = format!("{}{}", prefix.unwrap_or(""), base_table);

        let mut fields: Vec<FieldMetadata> = Vec::new();
        for decl in M::fields() {
            let tags = parse_tags(&decl.tag)
                .map_err(|e| OrmError::Programmer(format!("{}.{}: {}", name, decl.path, e)))?;
            if tags.skip {
                continue;
            }
            if fields.iter().any(|f| f.path == decl.path) {
                return Err(OrmError::Programmer(format!(
                    "{}: field '{}' declared twice",
                    name, decl.path
                )));
            }
            fields.push(FieldMetadata::from_decl(full_name, decl, tags)?);
        }

        let mut columns: Vec<&str> = Vec::new();
        for column in fields.iter().filter_map(|f| f.column()) {
            if columns.contains(&column) {
                return Err(OrmError::Programmer(format!(
                    "{}: column '{}' is mapped twice",
                    name, column
                )));
            }
            columns.push(column);
        }

        let manual_pk = M::manual_primary_key();
        let pk_index = resolve_primary_key(name, &mut fields, manual_pk)?;

        let mut meta = Self {
            full_name: full_name.to_string(),
            namespace: namespace_of(full_name).to_string(),
            name: name.to_string(),
            table,
            prefix: prefix.unwrap_or("").to_string(),
            fields,
            pk_index,
            unique_groups: Vec::new(),
            index_groups: Vec::new(),
            manual_pk,
            is_junction: false,
        };

        for group in M::unique_together() {
            let columns = meta.group_columns(&group)?;
            meta.unique_groups.push(columns);
        }
        for group in M::index_together() {
            let columns = meta.group_columns(&group)?;
            meta.index_groups.push(columns);
        }
        let singles: Vec<(bool, bool, String)> = meta
            .fields
            .iter()
            .filter(|f| !f.primary_key)
            .filter_map(|f| f.column.clone().map(|c| (f.unique, f.indexed, c)))
            .collect();
        for (unique, indexed, column) in singles {
            if unique {
                meta.unique_groups.push(vec![column]);
            } else if indexed {
                meta.index_groups.push(vec![column]);
            }
        }

        Ok(meta)
    }

    fn group_columns(&self, group: &[&str]) -> OrmResult<Vec<String>> {
        group
            .iter()
            .map(|name| {
                self.resolve(name)?
                    .column
                    .clone()
                    .ok_or_else(|| OrmError::unknown_column(&self.name, name))
            })
            .collect()
    }

    /// Field by exact path
    pub fn field(&self, path: &str) -> Option<&FieldMetadata> {
        self.fields.iter().find(|f| f.path == path)
    }

    /// Field by path or column name
    pub fn resolve(&self, name: &str) -> OrmResult<&FieldMetadata> {
        self.fields
            .iter()
            .find(|f| f.path == name)
            .or_else(|| self.fields.iter().find(|f| f.column() == Some(name)))
            .ok_or_else(|| OrmError::unknown_column(&self.name, name))
    }

    /// Table name without the registration prefix
    pub fn base_table(&self) -> &str {
        self.table.strip_prefix(self.prefix.as_str()).unwrap_or(&self.table)
    }

    pub fn primary_key(&self) -> Option<&FieldMetadata> {
        self.pk_index.map(|idx| &self.fields[idx])
    }

    /// Primary key field, or a Validation error for key-less models
    pub fn require_primary_key(&self) -> OrmResult<&FieldMetadata> {
        self.primary_key()
            .ok_or_else(|| OrmError::MissingPrimaryKey(self.name.clone()))
    }

    /// Primary key column name
    pub fn pk_column(&self) -> OrmResult<&str> {
        self.require_primary_key()?
            .column()
            .ok_or_else(|| OrmError::MissingPrimaryKey(self.name.clone()))
    }

    /// Fields that own a column, in declaration order
    pub fn stored_fields(&self) -> impl Iterator<Item = &FieldMetadata> {
        self.fields.iter().filter(|f| f.column.is_some())
    }

    pub fn relation_fields(&self) -> impl Iterator<Item = &FieldMetadata> {
        self.fields.iter().filter(|f| f.kind.is_relation())
    }
}

fn resolve_primary_key(
    model: &str,
    fields: &mut [FieldMetadata],
    manual_pk: bool,
) -> OrmResult<Option<usize>> {
    let declared: Vec<usize> = fields
        .iter()
        .enumerate()
        .filter(|(_, f)| f.primary_key)
        .map(|(idx, _)| idx)
        .collect();

    match declared.as_slice() {
        [idx] => {
            if fields[*idx].nullable {
                return Err(OrmError::Programmer(format!(
                    "{}: primary key '{}' cannot be null",
                    model, fields[*idx].path
                )));
            }
            Ok(Some(*idx))
        }
        [] => {
            let implicit = fields.iter().position(|f| {
                f.path.eq_ignore_ascii_case("id")
                    && f.kind == FieldKind::Plain
                    && f.field_type.is_integer()
                    && !f.nullable
            });
            match implicit {
                Some(idx) => {
                    fields[idx].kind = FieldKind::AutoPk;
                    fields[idx].primary_key = true;
                    Ok(Some(idx))
                }
                None if manual_pk => Ok(None),
                None => Err(OrmError::Programmer(format!(
                    "{}: needs a primary key; tag one field with pk or add an integer 'id' field",
                    model
                ))),
            }
        }
        _ => Err(OrmError::Programmer(format!(
            "{}: more than one primary key declared",
            model
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::DatabaseValue;
    use crate::model::core_trait::ModelFields;
    use crate::model::related::Related;

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
                FieldDecl::new("id", FieldType::Int64),
                FieldDecl::new("age", FieldType::Int32).tag("index"),
            ]
        }
    }

    #[derive(Debug, Default)]
    struct UserAccount {
        id: i64,
        email: String,
        profile: Related<Profile>,
    }

    impl ModelFields for UserAccount {
        fn get_value(&self, field: &str) -> Option<DatabaseValue> {
            match field {
                "id" => Some(self.id.into()),
                "email" => Some((&self.email).into()),
                "profile" => Some(self.profile.key_value()),
                _ => None,
            }
        }

        fn set_value(&mut self, field: &str, value: DatabaseValue) -> OrmResult<()> {
            match field {
                "id" => self.id = value.decode()?,
                "email" => self.email = value.decode()?,
                "profile" => self.profile.set_key(value),
                _ => return Err(OrmError::unknown_field("UserAccount", field)),
            }
            Ok(())
        }
    }

    impl Model for UserAccount {
        fn fields() -> Vec<FieldDecl> {
            vec![
                FieldDecl::new("id", FieldType::Int64).tag("pk;auto"),
                FieldDecl::new("email", FieldType::String).tag("size(120);unique"),
                FieldDecl::related::<Profile>("profile").tag("rel(one);null;on_delete(set_null)"),
            ]
        }
    }

    #[derive(Debug, Default)]
    struct NoKey {
        name: String,
    }

    impl ModelFields for NoKey {
        fn get_value(&self, field: &str) -> Option<DatabaseValue> {
            (field == "name").then(|| (&self.name).into())
        }

        fn set_value(&mut self, _field: &str, value: DatabaseValue) -> OrmResult<()> {
            self.name = value.decode()?;
            Ok(())
        }
    }

    impl Model for NoKey {
        fn fields() -> Vec<FieldDecl> {
            vec![FieldDecl::new("name", FieldType::String)]
        }
    }

    #[test]
    fn test_implicit_auto_primary_key() {
        let meta = ModelMetadata::build::<Profile>(None).unwrap();
        assert_eq!(meta.name, "Profile");
        assert_eq!(meta.table, "profile");
        let pk = meta.primary_key().unwrap();
        assert_eq!(pk.path, "id");
        assert_eq!(pk.kind, FieldKind::AutoPk);
        assert_eq!(meta.index_groups, vec![vec!["age".to_string()]]);
    }

    #[test]
    fn test_relation_columns_and_prefix() {
        let meta = ModelMetadata::build::<UserAccount>(Some("app_")).unwrap();
        assert_eq!(meta.table, "app_user_account");

        let profile = meta.field("profile").unwrap();
        assert_eq!(profile.kind, FieldKind::OneToOne);
        assert_eq!(profile.column(), Some("profile_id"));
        assert!(profile.unique);
        assert_eq!(profile.on_delete, OnDelete::SetNull);
        assert_eq!(profile.target.as_deref(), Some(full_model_name::<Profile>()));

        assert_eq!(meta.resolve("profile_id").unwrap().path, "profile");
        assert!(meta.resolve("nope").unwrap_err().is_programmer_error());
        assert!(meta.unique_groups.contains(&vec!["email".to_string()]));
    }

    #[test]
    fn test_missing_primary_key_is_rejected() {
        let err = ModelMetadata::build::<NoKey>(None).unwrap_err();
        assert!(err.is_programmer_error());
    }
}

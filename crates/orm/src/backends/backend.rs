//! Database Backend - CRUD operations shared by every dialect
//!
//! A backend is bound to one alias. Dialects only supply their identity and
//! timezone; every operation is a provided method running over whatever
//! [`Querier`] the caller hands in (a pool, or an open transaction).

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};

use crate::error::{OrmError, OrmResult};
use crate::introspect::{FieldIntrospector, WriteOp};
use crate::metadata::{FieldKind, ModelMetadata, OnDelete};
use crate::model::ModelFields;
use crate::registry::{M2MJoin, ModelRegistry};

use super::core::{DatabaseRow, DatabaseValue, Querier, SqlDialect};
use super::statements::{SelectOptions, StatementBuilder};
use super::DatabaseBackendType;

/// How `load_related` pages and orders the secondary query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadRelatedOptions {
    /// Levels of forward relations to follow from the loaded rows
    pub depth: usize,
    pub limit: Option<u64>,
    pub offset: u64,
    /// Column or field name; a leading `-` sorts descending
    pub order: Option<String>,
}

impl Default for LoadRelatedOptions {
    fn default() -> Self {
        Self {
            depth: 1,
            limit: Some(1000),
            offset: 0,
            order: None,
        }
    }
}

impl LoadRelatedOptions {
    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    pub fn with_limit(mut self, limit: Option<u64>) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_order(mut self, order: impl Into<String>) -> Self {
        self.order = Some(order.into());
        self
    }
}

/// Where the rows of a relation are found
#[derive(Debug, Clone, Copy)]
pub enum RelationSource<'a> {
    /// Target rows whose `column` equals the key
    Column(&'a str),
    /// Target rows linked to the key through a join table
    Join(&'a M2MJoin),
}

/// One SQL dialect bound to an alias
#[async_trait]
pub trait DatabaseBackend: Send + Sync + fmt::Debug {
    fn backend_type(&self) -> DatabaseBackendType;

    fn sql_dialect(&self) -> SqlDialect;

    /// Timezone of the alias, used for timestamps without an offset
    fn timezone(&self) -> FixedOffset;

    fn statements(&self) -> StatementBuilder {
        StatementBuilder::new(self.sql_dialect())
    }

    /// Current time in the alias timezone
    fn now(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&self.timezone())
    }

    /// Insert one model and write a generated key back into its auto key
    async fn insert(
        &self,
        querier: &mut dyn Querier,
        meta: &ModelMetadata,
        model: &mut dyn ModelFields,
    ) -> OrmResult<i64> {
        let (names, values) = FieldIntrospector::collect(meta, model, &[], WriteOp::Insert, self.now())?;
        let id = self.insert_value(querier, meta, false, &names, &values).await?;
        write_back_key(meta, model, id)?;
        Ok(id)
    }

    /// Run an INSERT for prepared values. Single rows return the generated
    /// id; multi-row inserts (`values` holding whole rows back to back)
    /// return the affected row count.
    async fn insert_value(
        &self,
        querier: &mut dyn Querier,
        meta: &ModelMetadata,
        is_multi: bool,
        names: &[String],
        values: &[DatabaseValue],
    ) -> OrmResult<i64> {
        let statements = self.statements();

        if is_multi {
            if names.is_empty() || values.len() % names.len() != 0 {
                return Err(OrmError::Programmer(format!(
                    "{}: {} values do not fill rows of {} columns",
                    meta.name,
                    values.len(),
                    names.len()
                )));
            }
            let rows = values.len() / names.len();
            let sql = statements.insert(&meta.table, names, rows, None);
            let result = querier.execute(&sql, values).await?;
            return Ok(result.rows_affected as i64);
        }

        let pk = meta.primary_key();
        let auto_pk = pk.filter(|f| f.is_auto()).and_then(|f| f.column());

        if let (true, Some(pk_column)) = (self.sql_dialect().uses_returning(), auto_pk) {
            let sql = statements.insert(&meta.table, names, 1, Some(pk_column));
            let row = querier.fetch_optional(&sql, values).await?;
            return match row {
                Some(row) => Ok(row.get_by_index(0)?.as_i64().unwrap_or(0)),
                None => Ok(0),
            };
        }

        let sql = statements.insert(&meta.table, names, 1, None);
        let result = querier.execute(&sql, values).await?;

        // A manually assigned integer key is the identifier of the new row
        if let Some(pk) = pk.filter(|f| !f.is_auto()) {
            if let Some(idx) = names.iter().position(|n| Some(n.as_str()) == pk.column()) {
                if let Some(id) = values[idx].as_i64() {
                    return Ok(id);
                }
            }
        }
        Ok(result.last_insert_id.unwrap_or(0))
    }

    /// Insert rows in `ceil(rows / bulk)` statements, returning affected rows
    async fn insert_multi(
        &self,
        querier: &mut dyn Querier,
        meta: &ModelMetadata,
        names: &[String],
        rows: Vec<Vec<DatabaseValue>>,
        bulk: usize,
    ) -> OrmResult<i64> {
        let bulk = bulk.max(1);
        let mut affected = 0i64;

        for chunk in rows.chunks(bulk) {
            if names.is_empty() {
                for _ in chunk {
                    self.insert_value(querier, meta, false, names, &[]).await?;
                    affected += 1;
                }
                continue;
            }
            let values: Vec<DatabaseValue> = chunk.iter().flatten().cloned().collect();
            affected += self.insert_value(querier, meta, true, names, &values).await?;
        }

        Ok(affected)
    }

    /// `UPDATE ... SET ... WHERE pk`, all mutable columns when `columns` is empty
    async fn update(
        &self,
        querier: &mut dyn Querier,
        meta: &ModelMetadata,
        model: &dyn ModelFields,
        columns: &[&str],
    ) -> OrmResult<u64> {
        let pk_value = FieldIntrospector::primary_key_value(meta, model)?;
        let pk_column = meta.pk_column()?;
        let (names, mut values) = FieldIntrospector::collect(meta, model, columns, WriteOp::Update, self.now())?;
        if names.is_empty() {
            return Ok(0);
        }

        let sql = self.statements().update(&meta.table, &names, &[pk_column]);
        values.push(pk_value);
        Ok(querier.execute(&sql, &values).await?.rows_affected)
    }

    /// Delete the row with key `pk` after applying every dependent relation's
    /// `on_delete` policy and clearing many-to-many join rows. Each row is
    /// visited once, so reference cycles terminate.
    async fn delete(
        &self,
        querier: &mut dyn Querier,
        registry: &ModelRegistry,
        meta: &ModelMetadata,
        pk: DatabaseValue,
    ) -> OrmResult<u64> {
        let mut visited = Vec::new();
        delete_row(querier, self.statements(), registry, meta, pk, &mut visited).await
    }

    /// First row whose `columns` equal `values`
    async fn read(
        &self,
        querier: &mut dyn Querier,
        meta: &ModelMetadata,
        columns: &[&str],
        values: &[DatabaseValue],
        for_update: bool,
    ) -> OrmResult<Option<Box<dyn DatabaseRow>>> {
        let select: Vec<&str> = meta.stored_fields().filter_map(|f| f.column()).collect();
        let options = SelectOptions {
            for_update,
            ..Default::default()
        };
        let sql = self.statements().select(&meta.table, &select, columns, &options);
        querier.fetch_optional(&sql, values).await
    }

    /// Upsert on `conflict`; returns the id reported by the database
    async fn insert_or_update(
        &self,
        querier: &mut dyn Querier,
        meta: &ModelMetadata,
        model: &mut dyn ModelFields,
        conflict: Option<&str>,
    ) -> OrmResult<i64> {
        let conflict_column = match conflict {
            Some(name) => Some(
                meta.resolve(name)?
                    .column()
                    .ok_or_else(|| OrmError::unknown_column(&meta.name, name))?
                    .to_string(),
            ),
            None => None,
        };

        let (names, values) = FieldIntrospector::collect(meta, model, &[], WriteOp::Insert, self.now())?;
        let update: Vec<String> = names
            .iter()
            .filter(|name| Some(name.as_str()) != conflict_column.as_deref())
            .filter(|name| {
                meta.resolve(name)
                    .map(|f| f.kind != FieldKind::AutoNowAdd && !f.primary_key)
                    .unwrap_or(false)
            })
            .cloned()
            .collect();

        // The key of the affected row is reported on the conflict path too,
        // so a stale last-insert-id never reaches the model
        let auto_pk = meta.primary_key().filter(|f| f.is_auto()).and_then(|f| f.column());
        let sql = self
            .statements()
            .upsert(&meta.table, &names, conflict_column.as_deref(), &update, auto_pk)?;

        let id = match (auto_pk, self.sql_dialect()) {
            (None, _) => {
                querier.execute(&sql, &values).await?;
                0
            }
            (Some(_), SqlDialect::MySQL) => querier.execute(&sql, &values).await?.last_insert_id.unwrap_or(0),
            (Some(_), SqlDialect::PostgreSQL | SqlDialect::SQLite) => {
                match querier.fetch_optional(&sql, &values).await? {
                    Some(row) => row.get_by_index(0)?.as_i64().unwrap_or(0),
                    None => 0,
                }
            }
        };

        if id != 0 {
            write_back_key(meta, model, id)?;
        }
        Ok(id)
    }

    /// Secondary query for the rows of a relation
    async fn load_related(
        &self,
        querier: &mut dyn Querier,
        target: &ModelMetadata,
        source: RelationSource<'_>,
        key: DatabaseValue,
        options: &LoadRelatedOptions,
    ) -> OrmResult<Vec<Box<dyn DatabaseRow>>> {
        let order = match options.order.as_deref() {
            Some(order) => {
                let (name, descending) = match order.strip_prefix('-') {
                    Some(name) => (name, true),
                    None => (order, false),
                };
                let column = target
                    .resolve(name)?
                    .column()
                    .ok_or_else(|| OrmError::unknown_column(&target.name, name))?;
                Some((column.to_string(), descending))
            }
            None => None,
        };
        let select_options = SelectOptions {
            order,
            limit: options.limit,
            offset: options.offset,
            for_update: false,
        };
        let columns: Vec<&str> = target.stored_fields().filter_map(|f| f.column()).collect();

        let sql = match source {
            RelationSource::Column(column) => {
                self.statements().select(&target.table, &columns, &[column], &select_options)
            }
            RelationSource::Join(join) => self.statements().select_through(
                &target.table,
                &columns,
                target.pk_column()?,
                &join.table,
                &join.target_column,
                &join.owner_column,
                &select_options,
            ),
        };
        querier.fetch_all(&sql, &[key]).await
    }

    /// `SELECT COUNT(*)` over the whole table
    async fn count(&self, querier: &mut dyn Querier, meta: &ModelMetadata) -> OrmResult<i64> {
        let sql = self.statements().count(&meta.table, &[]);
        count_rows(querier, &sql, &[]).await
    }

    /// Link `owner` to each of `targets` in a join table
    async fn m2m_add(
        &self,
        querier: &mut dyn Querier,
        join: &M2MJoin,
        owner: DatabaseValue,
        targets: Vec<DatabaseValue>,
    ) -> OrmResult<i64> {
        if targets.is_empty() {
            return Ok(0);
        }
        let columns = [join.owner_column.as_str(), join.target_column.as_str()];
        let sql = self.statements().insert(&join.table, &columns, targets.len(), None);
        let values: Vec<DatabaseValue> = targets
            .into_iter()
            .flat_map(|target| [owner.clone(), target])
            .collect();
        Ok(querier.execute(&sql, &values).await?.rows_affected as i64)
    }

    /// Unlink `owner` from `targets`, or from everything when `targets` is empty
    async fn m2m_remove(
        &self,
        querier: &mut dyn Querier,
        join: &M2MJoin,
        owner: DatabaseValue,
        targets: Vec<DatabaseValue>,
    ) -> OrmResult<i64> {
        let statements = self.statements();
        let (sql, values) = if targets.is_empty() {
            (statements.delete(&join.table, &[join.owner_column.as_str()]), vec![owner])
        } else {
            let sql = statements.delete_in(&join.table, &join.owner_column, &join.target_column, targets.len());
            let mut values = Vec::with_capacity(targets.len() + 1);
            values.push(owner);
            values.extend(targets);
            (sql, values)
        };
        Ok(querier.execute(&sql, &values).await?.rows_affected as i64)
    }

    /// Join rows of `owner`, optionally only those pointing at `target`
    async fn m2m_count(
        &self,
        querier: &mut dyn Querier,
        join: &M2MJoin,
        owner: DatabaseValue,
        target: Option<DatabaseValue>,
    ) -> OrmResult<i64> {
        let statements = self.statements();
        match target {
            Some(target) => {
                let sql = statements.count(&join.table, &[join.owner_column.as_str(), join.target_column.as_str()]);
                count_rows(querier, &sql, &[owner, target]).await
            }
            None => {
                let sql = statements.count(&join.table, &[join.owner_column.as_str()]);
                count_rows(querier, &sql, &[owner]).await
            }
        }
    }
}

async fn count_rows(querier: &mut dyn Querier, sql: &str, params: &[DatabaseValue]) -> OrmResult<i64> {
    let row = querier.fetch_optional(sql, params).await?;
    match row {
        Some(row) => row
            .get_by_index(0)?
            .as_i64()
            .ok_or_else(|| OrmError::Serialization("COUNT(*) did not return an integer".into())),
        None => Ok(0),
    }
}

/// Store a generated id into an auto key that was unset
type DeleteFuture<'a> = Pin<Box<dyn Future<Output = OrmResult<u64>> + Send + 'a>>;

/// `(table, key)` of every row reached by one cascading delete
type Visited = Vec<(String, DatabaseValue)>;

fn delete_row<'a>(
    querier: &'a mut dyn Querier,
    statements: StatementBuilder,
    registry: &'a ModelRegistry,
    meta: &'a ModelMetadata,
    pk: DatabaseValue,
    visited: &'a mut Visited,
) -> DeleteFuture<'a> {
    Box::pin(async move {
        if visited.iter().any(|(table, key)| *table == meta.table && same_key(key, &pk)) {
            return Ok(0);
        }
        visited.push((meta.table.clone(), pk.clone()));
        let pk_column = meta.pk_column()?.to_string();

        for dependent in registry.models() {
            for field in dependent.fields.iter() {
                if field.target.as_deref() != Some(meta.full_name.as_str()) {
                    continue;
                }
                match field.kind {
                    FieldKind::ForeignKey | FieldKind::OneToOne => {
                        let Some(column) = field.column() else {
                            continue;
                        };
                        match field.on_delete {
                            OnDelete::DoNothing => {}
                            OnDelete::SetNull => {
                                let sql = statements.set_null(&dependent.table, column);
                                querier.execute(&sql, std::slice::from_ref(&pk)).await?;
                            }
                            OnDelete::Cascade => match dependent.primary_key().and_then(|f| f.column()) {
                                Some(dependent_pk) => {
                                    let sql = statements.select(
                                        &dependent.table,
                                        &[dependent_pk],
                                        &[column],
                                        &SelectOptions::default(),
                                    );
                                    let rows = querier.fetch_all(&sql, std::slice::from_ref(&pk)).await?;
                                    let mut keys = Vec::with_capacity(rows.len());
                                    for row in rows {
                                        keys.push(row.get_by_index(0)?);
                                    }
                                    for key in keys {
                                        delete_row(&mut *querier, statements, registry, &dependent, key, &mut *visited)
                                            .await?;
                                    }
                                }
                                None => {
                                    let sql = statements.delete(&dependent.table, &[column]);
                                    querier.execute(&sql, std::slice::from_ref(&pk)).await?;
                                }
                            },
                        }
                    }
                    FieldKind::ManyToMany => {
                        let join = registry.m2m_join(&dependent, field)?;
                        if !join.through {
                            let sql = statements.delete(&join.table, &[join.target_column.as_str()]);
                            querier.execute(&sql, std::slice::from_ref(&pk)).await?;
                        }
                    }
                    _ => {}
                }
            }
        }

        if let Ok(owner) = registry.get(&meta.full_name) {
            for field in meta.fields.iter().filter(|f| f.kind == FieldKind::ManyToMany) {
                let join = registry.m2m_join(&owner, field)?;
                if !join.through {
                    let sql = statements.delete(&join.table, &[join.owner_column.as_str()]);
                    querier.execute(&sql, std::slice::from_ref(&pk)).await?;
                }
            }
        }

        let sql = statements.delete(&meta.table, &[pk_column.as_str()]);
        Ok(querier.execute(&sql, &[pk]).await?.rows_affected)
    })
}

fn same_key(a: &DatabaseValue, b: &DatabaseValue) -> bool {
    match (a.as_i64(), b.as_i64()) {
        (Some(a), Some(b)) => a == b,
        _ => a == b,
    }
}

fn write_back_key(meta: &ModelMetadata, model: &mut dyn ModelFields, id: i64) -> OrmResult<()> {
    if let Some(pk) = meta.primary_key().filter(|f| f.is_auto()) {
        let current = model.get_value(&pk.path).unwrap_or(DatabaseValue::Null);
        if current.is_zero_key() && id != 0 {
            model.set_value(&pk.path, DatabaseValue::Int64(id))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_related_defaults() {
        let options = LoadRelatedOptions::default();
        assert_eq!(options.depth, 1);
        assert_eq!(options.limit, Some(1000));
        assert_eq!(options.offset, 0);
        assert!(options.order.is_none());

        let options = options.with_order("-name").with_limit(None).with_offset(5).with_depth(2);
        assert_eq!(options.order.as_deref(), Some("-name"));
        assert_eq!(options.limit, None);
        assert_eq!(options.depth, 2);
    }
}

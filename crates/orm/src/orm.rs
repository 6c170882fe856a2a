//! Orm handle - CRUD façade over an alias
//!
//! [`OrmContext`] owns the model registry and the aliases for the life of
//! the process. It hands out [`Orm`] handles, each bound to one alias and
//! running every statement either on the alias pool or on the handle's own
//! transaction:
//!
//! ```text
//! Idle --begin/begin_with/begin_tx--> InTransaction --commit/rollback--> Idle
//!                                           |
//!                                  context fired: rollback
//!                                           v
//!                                         Closed
//! ```
//!
//! A handle takes `&mut self` for every operation, so statements issued on
//! it run strictly in call order. Parallel work uses separate handles.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::FixedOffset;
use tracing::{debug, info, warn};

use crate::alias::{Alias, AliasRegistry};
use crate::backends::{
    DatabaseBackend, DatabaseRow, DatabaseTransaction, DatabaseValue, ExecResult, LoadRelatedOptions,
    PoolQuerier, Querier, RelationSource,
};
use crate::config::{AliasConfig, DEFAULT_ALIAS};
use crate::error::{OrmError, OrmResult};
use crate::introspect::{FieldIntrospector, WriteOp};
use crate::metadata::{FieldKind, ModelMetadata};
use crate::model::{Model, RelatedRow, RelatedSet};
use crate::registry::{M2MJoin, ModelRegistry, ModelSet};
use crate::schema;
use crate::statistics::{OrmStats, UsageCounters};
use crate::transaction::{TransactionConfig, TxContext};

/// Owning context: the model registry plus every configured alias
#[derive(Debug, Default)]
pub struct OrmContext {
    registry: Arc<ModelRegistry>,
    aliases: Arc<AliasRegistry>,
}

impl OrmContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_model<M: Model>(&self) -> OrmResult<()> {
        self.registry.register::<M>()
    }

    /// Register `M` with `prefix` prepended to its table name
    pub fn register_model_with_prefix<M: Model>(&self, prefix: &str) -> OrmResult<()> {
        self.registry.register_with_prefix::<M>(prefix)
    }

    /// Register a tuple of models, e.g. `register_models::<(User, Profile)>()`
    pub fn register_models<S: ModelSet>(&self) -> OrmResult<()> {
        self.registry.register_set::<S>(None)
    }

    pub fn register_models_with_prefix<S: ModelSet>(&self, prefix: &str) -> OrmResult<()> {
        self.registry.register_set::<S>(Some(prefix))
    }

    /// Validate relations and seal the registry. Later calls do nothing.
    pub fn bootstrap(&self) -> OrmResult<()> {
        self.registry.bootstrap()
    }

    pub fn add_alias(&self, alias: Alias) -> OrmResult<Arc<Alias>> {
        self.aliases.add(alias)
    }

    /// Open a pool for `config` with the bundled driver and add it
    pub async fn connect_alias(&self, config: AliasConfig) -> OrmResult<Arc<Alias>> {
        let alias = Alias::connect(config).await?;
        self.aliases.add(alias)
    }

    /// Handle bound to the `default` alias. Seals the registry if
    /// `bootstrap` was not called yet.
    pub fn new_orm(&self) -> OrmResult<Orm> {
        self.new_orm_using(DEFAULT_ALIAS)
    }

    pub fn new_orm_using(&self, alias: &str) -> OrmResult<Orm> {
        self.registry.bootstrap()?;
        let alias = self.aliases.get(alias)?;
        Ok(Orm {
            registry: self.registry.clone(),
            aliases: self.aliases.clone(),
            alias,
            state: OrmState::Idle,
            tx: None,
            ctx: None,
        })
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn aliases(&self) -> &Arc<AliasRegistry> {
        &self.aliases
    }
}

/// Transaction state of a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrmState {
    Idle,
    InTransaction,
    /// A transaction context fired; the handle refuses further work
    Closed,
}

/// Per-call handle dispatching CRUD operations to the bound alias
pub struct Orm {
    registry: Arc<ModelRegistry>,
    aliases: Arc<AliasRegistry>,
    alias: Arc<Alias>,
    state: OrmState,
    tx: Option<Box<dyn DatabaseTransaction>>,
    ctx: Option<TxContext>,
}

impl std::fmt::Debug for Orm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orm")
            .field("alias", &self.alias.name())
            .field("state", &self.state)
            .finish()
    }
}

impl Orm {
    pub fn state(&self) -> OrmState {
        self.state
    }

    pub fn is_in_transaction(&self) -> bool {
        self.state == OrmState::InTransaction
    }

    pub fn alias(&self) -> &Arc<Alias> {
        &self.alias
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    /// Connection and usage statistics of the bound alias
    pub fn stats(&self) -> OrmStats {
        self.alias.stats()
    }

    /// Rebind the handle to another alias
    pub fn using(&mut self, name: &str) -> OrmResult<()> {
        match self.state {
            OrmState::InTransaction => Err(OrmError::TransactionState(format!(
                "cannot switch to alias '{}' inside a transaction",
                name
            ))),
            OrmState::Closed => Err(closed_error()),
            OrmState::Idle => {
                self.alias = self.aliases.get(name)?;
                debug!(alias = name, "handle switched alias");
                Ok(())
            }
        }
    }

    pub async fn begin(&mut self) -> OrmResult<()> {
        self.start(TransactionConfig::default(), None).await
    }

    pub async fn begin_with(&mut self, config: TransactionConfig) -> OrmResult<()> {
        self.start(config, None).await
    }

    /// Begin a transaction observing `ctx`. An already fired context fails
    /// before any statement; one firing later rolls back and closes the handle.
    pub async fn begin_tx(&mut self, ctx: TxContext, config: TransactionConfig) -> OrmResult<()> {
        self.start(config, Some(ctx)).await
    }

    async fn start(&mut self, config: TransactionConfig, ctx: Option<TxContext>) -> OrmResult<()> {
        match self.state {
            OrmState::Closed => return Err(closed_error()),
            OrmState::InTransaction => {
                return Err(OrmError::TransactionState(
                    "a transaction is already active on this handle".to_string(),
                ))
            }
            OrmState::Idle => {}
        }
        if let Some(ctx) = ctx.as_ref().filter(|ctx| ctx.is_fired()) {
            return Err(OrmError::TransactionState(format!(
                "cannot begin: {}",
                ctx.reason()
            )));
        }

        let counters = self.alias.counters().clone();
        let tx = race(ctx.as_ref(), self.alias.pool().begin_transaction(&config))
            .await
            .map_err(|err| {
                counters.record_error();
                err
            })?;

        counters.record_begin();
        debug!(alias = self.alias.name(), ?config, "transaction started");
        self.tx = Some(tx);
        self.ctx = ctx;
        self.state = OrmState::InTransaction;
        Ok(())
    }

    pub async fn commit(&mut self) -> OrmResult<()> {
        self.ensure_usable().await?;
        let tx = self.tx.take().ok_or_else(|| {
            OrmError::TransactionState("commit without an active transaction".to_string())
        })?;
        let ctx = self.ctx.take();
        self.state = OrmState::Idle;

        let counters = self.alias.counters();
        match race(ctx.as_ref(), tx.commit()).await {
            Ok(()) => {
                counters.record_commit();
                debug!(alias = self.alias.name(), "transaction committed");
                Ok(())
            }
            Err(err) => {
                counters.record_error();
                if ctx.as_ref().map_or(false, TxContext::is_fired) {
                    counters.record_rollback();
                    self.state = OrmState::Closed;
                }
                Err(err)
            }
        }
    }

    pub async fn rollback(&mut self) -> OrmResult<()> {
        self.ensure_usable().await?;
        let tx = self.tx.take().ok_or_else(|| {
            OrmError::TransactionState("rollback without an active transaction".to_string())
        })?;
        self.ctx = None;
        self.state = OrmState::Idle;

        let result = tx.rollback().await;
        let counters = self.alias.counters();
        match &result {
            Ok(()) => counters.record_rollback(),
            Err(_) => counters.record_error(),
        }
        debug!(alias = self.alias.name(), "transaction rolled back");
        result
    }

    /// Load a row by primary key, or by `columns` read from the model
    pub async fn read<M: Model>(&mut self, model: &mut M, columns: &[&str]) -> OrmResult<()> {
        self.read_row(model, columns, false).await
    }

    /// `read` with the dialect's row lock
    pub async fn read_for_update<M: Model>(&mut self, model: &mut M, columns: &[&str]) -> OrmResult<()> {
        self.read_row(model, columns, true).await
    }

    /// Read by `columns`, inserting the model when no row matches.
    /// Returns whether a row was created and the row's id.
    pub async fn read_or_create<M: Model>(&mut self, model: &mut M, columns: &[&str]) -> OrmResult<(bool, i64)> {
        match self.read(model, columns).await {
            Ok(()) => {
                let meta = self.meta::<M>()?;
                let id = meta
                    .primary_key()
                    .and_then(|pk| model.get_value(&pk.path))
                    .and_then(|value| value.as_i64())
                    .unwrap_or(0);
                Ok((false, id))
            }
            Err(OrmError::NotFound(_)) => Ok((true, self.insert(model).await?)),
            Err(err) => Err(err),
        }
    }

    async fn read_row<M: Model>(&mut self, model: &mut M, columns: &[&str], for_update: bool) -> OrmResult<()> {
        self.ensure_usable().await?;
        let meta = self.meta::<M>()?;
        let (names, values) = lookup_values(&meta, &*model, columns)?;
        let backend = self.backend();
        let tz = self.alias.timezone();

        let result = {
            let mut querier = self.tracked();
            let names: Vec<&str> = names.iter().map(String::as_str).collect();
            match backend.read(&mut querier, &meta, &names, &values, for_update).await {
                Ok(Some(row)) => FieldIntrospector::hydrate(&meta, row.as_ref(), model, tz),
                Ok(None) => Err(OrmError::NotFound(meta.table.clone())),
                Err(err) => Err(err),
            }
        };
        self.settle(result).await
    }

    /// Insert the model; a generated key is written back into its auto key
    pub async fn insert<M: Model>(&mut self, model: &mut M) -> OrmResult<i64> {
        self.ensure_usable().await?;
        let meta = self.meta::<M>()?;
        let backend = self.backend();
        let result = {
            let mut querier = self.tracked();
            backend.insert(&mut querier, &meta, model).await
        };
        self.settle(result).await
    }

    /// Upsert; PostgreSQL and SQLite need the `conflict` column
    pub async fn insert_or_update<M: Model>(&mut self, model: &mut M, conflict: Option<&str>) -> OrmResult<i64> {
        self.ensure_usable().await?;
        let meta = self.meta::<M>()?;
        let backend = self.backend();
        let result = {
            let mut querier = self.tracked();
            backend.insert_or_update(&mut querier, &meta, model, conflict).await
        };
        self.settle(result).await
    }

    /// Insert `models` in batches of `bulk` rows, returning the affected
    /// row count. With `bulk == 1` every model is inserted on its own and
    /// gets its generated key written back.
    pub async fn insert_multi<M: Model>(&mut self, bulk: usize, models: &mut [M]) -> OrmResult<i64> {
        if bulk == 0 {
            return Err(OrmError::Programmer("insert_multi needs a bulk size of at least 1".to_string()));
        }
        if models.is_empty() {
            return Ok(0);
        }
        self.ensure_usable().await?;
        let meta = self.meta::<M>()?;
        let backend = self.backend();

        if bulk == 1 {
            let result = {
                let mut querier = self.tracked();
                let mut affected = 0;
                let mut outcome = Ok(());
                for model in models.iter_mut() {
                    match backend.insert(&mut querier, &meta, model).await {
                        Ok(_) => affected += 1,
                        Err(err) => {
                            outcome = Err(err);
                            break;
                        }
                    }
                }
                outcome.map(|()| affected)
            };
            return self.settle(result).await;
        }

        let now = backend.now();
        let mut names: Option<Vec<String>> = None;
        let mut rows = Vec::with_capacity(models.len());
        for model in models.iter() {
            let (row_names, values) = FieldIntrospector::collect(&meta, model, &[], WriteOp::Insert, now)?;
            match &names {
                Some(first) if *first != row_names => {
                    return Err(OrmError::Programmer(format!(
                        "insert_multi on {}: every row must set the same columns",
                        meta.name
                    )))
                }
                Some(_) => {}
                None => names = Some(row_names),
            }
            rows.push(values);
        }
        let names = names.unwrap_or_default();

        let result = {
            let mut querier = self.tracked();
            backend.insert_multi(&mut querier, &meta, &names, rows, bulk).await
        };
        self.settle(result).await
    }

    /// Update `columns` (every mutable column when empty) of the row keyed by the model
    pub async fn update<M: Model>(&mut self, model: &M, columns: &[&str]) -> OrmResult<u64> {
        self.ensure_usable().await?;
        let meta = self.meta::<M>()?;
        let backend = self.backend();
        let result = {
            let mut querier = self.tracked();
            backend.update(&mut querier, &meta, model, columns).await
        };
        self.settle(result).await
    }

    /// Delete the row keyed by the model, applying `on_delete` policies
    pub async fn delete<M: Model>(&mut self, model: &M) -> OrmResult<u64> {
        self.ensure_usable().await?;
        let meta = self.meta::<M>()?;
        let pk = FieldIntrospector::primary_key_value(&meta, model)?;
        let backend = self.backend();
        let registry = self.registry.clone();
        let result = {
            let mut querier = self.tracked();
            backend.delete(&mut querier, &registry, &meta, pk).await
        };
        self.settle(result).await
    }

    pub async fn count<M: Model>(&mut self) -> OrmResult<i64> {
        self.ensure_usable().await?;
        let meta = self.meta::<M>()?;
        let backend = self.backend();
        let result = {
            let mut querier = self.tracked();
            backend.count(&mut querier, &meta).await
        };
        self.settle(result).await
    }

    /// Fetch the rows of relation `field` and hand them to the model's
    /// `set_related`. Returns the number of rows loaded.
    pub async fn load_related<M: Model>(
        &mut self,
        model: &mut M,
        field: &str,
        options: LoadRelatedOptions,
    ) -> OrmResult<usize> {
        self.ensure_usable().await?;
        let meta = self.meta::<M>()?;
        let field = meta.resolve(field)?.clone();

        let (target, source, key) = match field.kind {
            FieldKind::ForeignKey | FieldKind::OneToOne => {
                let target = self.registry.target_of(&field)?;
                let key = model
                    .get_value(&field.path)
                    .ok_or_else(|| OrmError::unknown_field(&meta.name, &field.path))?;
                if key.is_null() || (key.is_zero_key() && target.require_primary_key()?.field_type.is_integer()) {
                    model.set_related(&field.path, RelatedSet::new(target, Vec::new()))?;
                    return Ok(0);
                }
                let column = target.pk_column()?.to_string();
                (target, Source::Column(column), key)
            }
            FieldKind::Reverse => {
                let back = self.registry.reverse_field(&meta, &field)?;
                let key = FieldIntrospector::primary_key_value(&meta, &*model)?;
                match back.field.kind {
                    FieldKind::ManyToMany => {
                        let join = self.registry.m2m_join(&meta, &field)?;
                        (join.target.clone(), Source::Join(join), key)
                    }
                    _ => {
                        let column = back
                            .field
                            .column()
                            .ok_or_else(|| OrmError::unknown_column(&back.target.name, &back.field.path))?
                            .to_string();
                        (back.target, Source::Column(column), key)
                    }
                }
            }
            FieldKind::ManyToMany => {
                let join = self.registry.m2m_join(&meta, &field)?;
                let key = FieldIntrospector::primary_key_value(&meta, &*model)?;
                (join.target.clone(), Source::Join(join), key)
            }
            _ => {
                return Err(OrmError::Programmer(format!(
                    "{}.{} is not a relation",
                    meta.name, field.path
                )))
            }
        };

        let backend = self.backend();
        let registry = self.registry.clone();
        let tz = self.alias.timezone();
        let result = {
            let mut querier = self.tracked();
            fetch_related(backend.as_ref(), &mut querier, &registry, target, source, key, options, tz).await
        };
        let related = self.settle(result).await?;
        let loaded = related.len();
        model.set_related(&field.path, related)?;
        Ok(loaded)
    }

    /// Relation manager for the many-to-many (or reverse many-to-many) `field`
    pub fn query_m2m<M: Model>(&mut self, model: &M, field: &str) -> OrmResult<QueryM2M<'_>> {
        let meta = self.meta::<M>()?;
        let field = meta.resolve(field)?;
        let join = self.registry.m2m_join(&meta, field)?;
        let owner = FieldIntrospector::primary_key_value(&meta, model)?;
        Ok(QueryM2M { orm: self, join, owner })
    }

    /// Create tables and indexes for every registered model, dropping
    /// existing tables first when asked. Returns the statements run.
    pub async fn sync_schema(&mut self, drop_existing: bool) -> OrmResult<usize> {
        self.ensure_usable().await?;
        let statements = schema::sync_statements(&self.registry, self.backend().sql_dialect(), drop_existing)?;
        let result = {
            let mut querier = self.tracked();
            let mut outcome = Ok(statements.len());
            for sql in &statements {
                if let Err(err) = querier.execute(sql, &[]).await {
                    outcome = Err(err);
                    break;
                }
            }
            outcome
        };
        let count = self.settle(result).await?;
        info!(alias = self.alias.name(), statements = count, drop_existing, "schema synchronized");
        Ok(count)
    }

    fn meta<M: Model>(&self) -> OrmResult<Arc<ModelMetadata>> {
        self.registry.get_by_type::<M>()
    }

    fn backend(&self) -> Arc<dyn DatabaseBackend> {
        self.alias.backend().clone()
    }

    /// Querier for the next statements: the transaction when one is open,
    /// the alias pool otherwise
    fn tracked(&mut self) -> TrackedQuerier<'_> {
        let target = match self.tx.as_mut() {
            Some(tx) => Target::Transaction(tx.as_querier()),
            None => Target::Pool(PoolQuerier::new(self.alias.pool().as_ref())),
        };
        TrackedQuerier {
            target,
            alias: self.alias.name(),
            counters: self.alias.counters(),
            ctx: self.ctx.as_ref(),
        }
    }

    fn fired_reason(&self) -> Option<&'static str> {
        self.ctx.as_ref().filter(|ctx| ctx.is_fired()).map(TxContext::reason)
    }

    async fn ensure_usable(&mut self) -> OrmResult<()> {
        match self.state {
            OrmState::Closed => Err(closed_error()),
            OrmState::InTransaction => match self.fired_reason() {
                Some(reason) => {
                    self.abort(reason).await;
                    Err(OrmError::TransactionState(reason.to_string()))
                }
                None => Ok(()),
            },
            OrmState::Idle => Ok(()),
        }
    }

    /// Turn a failure caused by a fired context into a rollback and close
    async fn settle<T>(&mut self, result: OrmResult<T>) -> OrmResult<T> {
        if result.is_err() && self.state == OrmState::InTransaction {
            if let Some(reason) = self.fired_reason() {
                self.abort(reason).await;
                return Err(OrmError::TransactionState(reason.to_string()));
            }
        }
        result
    }

    async fn abort(&mut self, reason: &str) {
        if let Some(tx) = self.tx.take() {
            warn!(alias = self.alias.name(), reason, "rolling back cancelled transaction");
            if let Err(err) = tx.rollback().await {
                warn!(alias = self.alias.name(), error = %err, "automatic rollback failed");
            }
            self.alias.counters().record_rollback();
        }
        self.ctx = None;
        self.state = OrmState::Closed;
    }
}

impl Drop for Orm {
    fn drop(&mut self) {
        if self.tx.is_some() {
            warn!(
                alias = self.alias.name(),
                "Orm handle dropped inside a transaction; the driver rolls it back"
            );
            self.alias.counters().record_rollback();
        }
    }
}

fn closed_error() -> OrmError {
    OrmError::TransactionState("handle was closed by a cancelled transaction".to_string())
}

/// Lookup columns and values for a read: the primary key, or `columns`
fn lookup_values(
    meta: &ModelMetadata,
    model: &dyn crate::model::ModelFields,
    columns: &[&str],
) -> OrmResult<(Vec<String>, Vec<DatabaseValue>)> {
    if columns.is_empty() {
        let value = FieldIntrospector::primary_key_value(meta, model)?;
        return Ok((vec![meta.pk_column()?.to_string()], vec![value]));
    }

    let mut names = Vec::with_capacity(columns.len());
    let mut values = Vec::with_capacity(columns.len());
    for name in columns {
        let field = meta.resolve(name)?;
        let column = field
            .column()
            .ok_or_else(|| OrmError::unknown_column(&meta.name, name))?;
        let value = model
            .get_value(&field.path)
            .ok_or_else(|| OrmError::unknown_field(&meta.name, &field.path))?;
        names.push(column.to_string());
        values.push(value);
    }
    Ok((names, values))
}

/// Race `fut` against the transaction context
async fn race<T>(ctx: Option<&TxContext>, fut: impl Future<Output = OrmResult<T>>) -> OrmResult<T> {
    match ctx {
        Some(ctx) => tokio::select! {
            biased;
            _ = ctx.fired() => Err(OrmError::TransactionState(ctx.reason().to_string())),
            result = fut => result,
        },
        None => fut.await,
    }
}

enum Target<'a> {
    Pool(PoolQuerier<'a>),
    Transaction(&'a mut dyn Querier),
}

/// Querier that logs, counts and guards every statement of a handle
struct TrackedQuerier<'a> {
    target: Target<'a>,
    alias: &'a str,
    counters: &'a UsageCounters,
    ctx: Option<&'a TxContext>,
}

impl<'a> TrackedQuerier<'a> {
    fn before(&self, sql: &str, params: usize) -> OrmResult<()> {
        if let Some(ctx) = self.ctx.filter(|ctx| ctx.is_fired()) {
            return Err(OrmError::TransactionState(ctx.reason().to_string()));
        }
        self.counters.record_statement(sql);
        debug!(alias = self.alias, params, sql, "executing statement");
        Ok(())
    }

    fn after<T>(&self, result: OrmResult<T>) -> OrmResult<T> {
        if let Err(err) = &result {
            self.counters.record_error();
            debug!(alias = self.alias, error = %err, "statement failed");
        }
        result
    }

    fn inner(&mut self) -> &mut dyn Querier {
        match &mut self.target {
            Target::Pool(pool) => pool,
            Target::Transaction(tx) => &mut **tx,
        }
    }
}

#[async_trait::async_trait]
impl<'a> Querier for TrackedQuerier<'a> {
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> OrmResult<ExecResult> {
        self.before(sql, params.len())?;
        let ctx = self.ctx;
        let result = race(ctx, self.inner().execute(sql, params)).await;
        self.after(result)
    }

    async fn fetch_all(&mut self, sql: &str, params: &[DatabaseValue]) -> OrmResult<Vec<Box<dyn DatabaseRow>>> {
        self.before(sql, params.len())?;
        let ctx = self.ctx;
        let result = race(ctx, self.inner().fetch_all(sql, params)).await;
        self.after(result)
    }

    async fn fetch_optional(&mut self, sql: &str, params: &[DatabaseValue]) -> OrmResult<Option<Box<dyn DatabaseRow>>> {
        self.before(sql, params.len())?;
        let ctx = self.ctx;
        let result = race(ctx, self.inner().fetch_optional(sql, params)).await;
        self.after(result)
    }
}

/// Owned form of [`RelationSource`], so nested loads can build their own
enum Source {
    Column(String),
    Join(M2MJoin),
}

type RelatedFuture<'a> = Pin<Box<dyn Future<Output = OrmResult<RelatedSet>> + Send + 'a>>;

/// Load the rows of one relation; with depth > 1 also the forward
/// relations of every loaded row
#[allow(clippy::too_many_arguments)]
fn fetch_related<'a>(
    backend: &'a dyn DatabaseBackend,
    querier: &'a mut dyn Querier,
    registry: &'a ModelRegistry,
    target: Arc<ModelMetadata>,
    source: Source,
    key: DatabaseValue,
    options: LoadRelatedOptions,
    tz: FixedOffset,
) -> RelatedFuture<'a> {
    Box::pin(async move {
        let relation = match &source {
            Source::Column(column) => RelationSource::Column(column),
            Source::Join(join) => RelationSource::Join(join),
        };
        let rows = backend
            .load_related(&mut *querier, &target, relation, key, &options)
            .await?;

        let mut related = Vec::with_capacity(rows.len());
        for row in rows {
            related.push(RelatedRow::new(FieldIntrospector::decode_row(&target, row.as_ref(), tz)?));
        }

        if options.depth > 1 {
            let nested_options = LoadRelatedOptions::default()
                .with_depth(options.depth - 1)
                .with_limit(None);
            let forward: Vec<_> = target
                .fields
                .iter()
                .filter(|f| matches!(f.kind, FieldKind::ForeignKey | FieldKind::OneToOne))
                .cloned()
                .collect();

            for row in related.iter_mut() {
                for field in &forward {
                    let key = match row.value(&field.path) {
                        Some(value) if !value.is_null() => value.clone(),
                        _ => continue,
                    };
                    let nested_target = registry.target_of(field)?;
                    let column = nested_target.pk_column()?.to_string();
                    let nested = fetch_related(
                        backend,
                        &mut *querier,
                        registry,
                        nested_target,
                        Source::Column(column),
                        key,
                        nested_options.clone(),
                        tz,
                    )
                    .await?;
                    row.nested.push((field.path.clone(), nested));
                }
            }
        }

        Ok(RelatedSet::new(target, related))
    })
}

/// Many-to-many relation manager of one model instance
pub struct QueryM2M<'o> {
    orm: &'o mut Orm,
    join: M2MJoin,
    owner: DatabaseValue,
}

impl QueryM2M<'_> {
    pub fn join_table(&self) -> &str {
        &self.join.table
    }

    /// Link the owner to each target key; returns rows inserted
    pub async fn add<V: Into<DatabaseValue>>(&mut self, targets: Vec<V>) -> OrmResult<i64> {
        let targets: Vec<DatabaseValue> = targets.into_iter().map(Into::into).collect();
        self.orm.ensure_usable().await?;
        let backend = self.orm.backend();
        let result = {
            let mut querier = self.orm.tracked();
            backend.m2m_add(&mut querier, &self.join, self.owner.clone(), targets).await
        };
        self.orm.settle(result).await
    }

    /// Unlink the owner from each target key
    pub async fn remove<V: Into<DatabaseValue>>(&mut self, targets: Vec<V>) -> OrmResult<i64> {
        let targets: Vec<DatabaseValue> = targets.into_iter().map(Into::into).collect();
        if targets.is_empty() {
            return Ok(0);
        }
        self.orm.ensure_usable().await?;
        let backend = self.orm.backend();
        let result = {
            let mut querier = self.orm.tracked();
            backend.m2m_remove(&mut querier, &self.join, self.owner.clone(), targets).await
        };
        self.orm.settle(result).await
    }

    /// Whether the owner is linked to `target`
    pub async fn exist(&mut self, target: impl Into<DatabaseValue>) -> OrmResult<bool> {
        let target = target.into();
        self.orm.ensure_usable().await?;
        let backend = self.orm.backend();
        let result = {
            let mut querier = self.orm.tracked();
            backend.m2m_count(&mut querier, &self.join, self.owner.clone(), Some(target)).await
        };
        Ok(self.orm.settle(result).await? > 0)
    }

    /// Remove every link of the owner
    pub async fn clear(&mut self) -> OrmResult<i64> {
        self.orm.ensure_usable().await?;
        let backend = self.orm.backend();
        let result = {
            let mut querier = self.orm.tracked();
            backend.m2m_remove(&mut querier, &self.join, self.owner.clone(), Vec::new()).await
        };
        self.orm.settle(result).await
    }

    pub async fn count(&mut self) -> OrmResult<i64> {
        self.orm.ensure_usable().await?;
        let backend = self.orm.backend();
        let result = {
            let mut querier = self.orm.tracked();
            backend.m2m_count(&mut querier, &self.join, self.owner.clone(), None).await
        };
        self.orm.settle(result).await
    }
}

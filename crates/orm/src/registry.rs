//! Model Registry - Registered models, bootstrap and relation resolution
//!
//! The registry starts open. Models are registered (their relation targets
//! along with them), then [`ModelRegistry::bootstrap`] validates the whole
//! set, resolves cross-model references and seals it. A sealed registry is
//! read-only.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info};

use crate::error::{OrmError, OrmResult};
use crate::metadata::{snake_case, FieldKind, FieldMetadata, ModelMetadata};
use crate::model::core_trait::{full_model_name, Model};
use crate::model::fields::ModelRef;

#[derive(Debug, Default)]
pub(crate) struct RegistryState {
    models: HashMap<String, Arc<ModelMetadata>>,
    order: Vec<String>,
    short_names: HashMap<String, String>,
    tables: HashMap<String, String>,
    sealed: bool,
}

/// Register `T` and, recursively, every relation target it declares.
pub(crate) fn register_type<T: Model>(state: &mut RegistryState, prefix: Option<&str>) -> OrmResult<()> {
    let full_name = full_model_name::<T>();
    if state.sealed {
        return Err(OrmError::Programmer(format!(
            "cannot register '{}' after bootstrap",
            full_name
        )));
    }
    if state.models.contains_key(full_name) {
        return Ok(());
    }

    let meta = ModelMetadata::build::<T>(prefix)?;
    if let Some(owner) = state.tables.get(&meta.table) {
        return Err(OrmError::Programmer(format!(
            "table '{}' of '{}' is already used by '{}'",
            meta.table, full_name, owner
        )));
    }
    if let Some(owner) = state.short_names.get(&meta.name) {
        return Err(OrmError::Programmer(format!(
            "model name '{}' of '{}' is already used by '{}'",
            meta.name, full_name, owner
        )));
    }

    let targets: Vec<ModelRef> = meta.fields.iter().filter_map(|f| f.target_ref).collect();
    debug!(model = %meta.name, table = %meta.table, fields = meta.fields.len(), "registered model");

    state.tables.insert(meta.table.clone(), full_name.to_string());
    state.short_names.insert(meta.name.clone(), full_name.to_string());
    state.order.push(full_name.to_string());
    state.models.insert(full_name.to_string(), Arc::new(meta));

    // The model is already present, so cycles between targets terminate.
    // Targets pulled in here share the prefix of the model declaring them.
    for target in targets {
        if !state.models.contains_key(target.name()) {
            (target.register)(state, prefix)?;
        }
    }
    Ok(())
}

/// Join table of a many-to-many relation, seen from one side
#[derive(Debug, Clone)]
pub struct M2MJoin {
    pub table: String,
    /// Join column holding the owner's key
    pub owner_column: String,
    /// Join column holding the target's key
    pub target_column: String,
    pub owner: Arc<ModelMetadata>,
    pub target: Arc<ModelMetadata>,
    /// The join table belongs to a `rel_through` model
    pub through: bool,
}

/// Forward side of a reverse relation
#[derive(Debug, Clone)]
pub struct ReverseTarget {
    pub target: Arc<ModelMetadata>,
    /// Relation field on `target` that points back to the owner
    pub field: FieldMetadata,
}

impl RegistryState {
    fn lookup(&self, name: &str) -> OrmResult<Arc<ModelMetadata>> {
        self.models
            .get(name)
            .or_else(|| self.short_names.get(name).and_then(|full| self.models.get(full)))
            .cloned()
            .ok_or_else(|| OrmError::unregistered(name))
    }

    fn target_of(&self, field: &FieldMetadata) -> OrmResult<Arc<ModelMetadata>> {
        let target = field.target.as_deref().ok_or_else(|| {
            OrmError::Programmer(format!("field '{}' is not a relation", field.path))
        })?;
        self.lookup(target)
    }

    fn reverse_field(&self, owner: &ModelMetadata, field: &FieldMetadata) -> OrmResult<ReverseTarget> {
        if field.kind != FieldKind::Reverse {
            return Err(OrmError::Programmer(format!(
                "{}.{} is not a reverse relation",
                owner.name, field.path
            )));
        }
        let target = self.target_of(field)?;
        let candidates: Vec<&FieldMetadata> = target
            .fields
            .iter()
            .filter(|f| {
                matches!(
                    f.kind,
                    FieldKind::ForeignKey | FieldKind::OneToOne | FieldKind::ManyToMany
                ) && f.target.as_deref() == Some(owner.full_name.as_str())
            })
            .filter(|f| match &field.back_reference {
                Some(name) => f.path == *name,
                None => true,
            })
            .collect();

        match candidates.as_slice() {
            [forward] => {
                let forward = (*forward).clone();
                Ok(ReverseTarget { target, field: forward })
            }
            [] => Err(OrmError::Programmer(format!(
                "{}.{}: no relation on '{}' points back to '{}'",
                owner.name, field.path, target.name, owner.name
            ))),
            _ => Err(OrmError::Programmer(format!(
                "{}.{}: several relations on '{}' point back to '{}'; name one with reverse(<field>)",
                owner.name, field.path, target.name, owner.name
            ))),
        }
    }

    fn m2m_join(&self, owner: &Arc<ModelMetadata>, field: &FieldMetadata) -> OrmResult<M2MJoin> {
        match field.kind {
            FieldKind::ManyToMany => self.forward_join(owner, field),
            FieldKind::Reverse => {
                let back = self.reverse_field(owner, field)?;
                if back.field.kind != FieldKind::ManyToMany {
                    return Err(OrmError::Programmer(format!(
                        "{}.{} is not a many-to-many relation",
                        owner.name, field.path
                    )));
                }
                let join = self.forward_join(&back.target, &back.field)?;
                Ok(M2MJoin {
                    table: join.table,
                    owner_column: join.target_column,
                    target_column: join.owner_column,
                    owner: join.target,
                    target: join.owner,
                    through: join.through,
                })
            }
            _ => Err(OrmError::Programmer(format!(
                "{}.{} is not a many-to-many relation",
                owner.name, field.path
            ))),
        }
    }

    fn forward_join(&self, owner: &Arc<ModelMetadata>, field: &FieldMetadata) -> OrmResult<M2MJoin> {
        let target = self.target_of(field)?;

        if let Some(through) = field.through_model.as_deref().or(field.rel_through.as_deref()) {
            let through = self.lookup(through)?;
            let mut to_owner = through
                .fields
                .iter()
                .filter(|f| f.kind.is_forward_relation())
                .filter(|f| f.target.as_deref() == Some(owner.full_name.as_str()));
            let owner_field = to_owner.next();
            let target_field = through
                .fields
                .iter()
                .filter(|f| f.kind.is_forward_relation())
                .filter(|f| f.target.as_deref() == Some(target.full_name.as_str()))
                .find(|f| Some(f.path.as_str()) != owner_field.map(|o| o.path.as_str()));

            return match (owner_field.and_then(|f| f.column()), target_field.and_then(|f| f.column())) {
                (Some(owner_column), Some(target_column)) => Ok(M2MJoin {
                    table: through.table.clone(),
                    owner_column: owner_column.to_string(),
                    target_column: target_column.to_string(),
                    owner: owner.clone(),
                    target,
                    through: true,
                }),
                _ => Err(OrmError::Programmer(format!(
                    "{}.{}: through model '{}' needs foreign keys to '{}' and '{}'",
                    owner.name, field.path, through.name, owner.name, target.name
                ))),
            };
        }

        let table = match field.rel_table.as_deref() {
            Some(table) => format!("{}{}", owner.prefix, table),
            None => format!("{}{}_{}s", owner.prefix, owner.base_table(), target.base_table()),
        };
        let owner_column = format!("{}_id", snake_case(&owner.name));
        let mut target_column = format!("{}_id", snake_case(&target.name));
        if target_column == owner_column {
            target_column = format!("to_{}", target_column);
        }
        Ok(M2MJoin {
            table,
            owner_column,
            target_column,
            owner: owner.clone(),
            target,
            through: false,
        })
    }
}

/// Registered models, open for registration until bootstrapped
#[derive(Debug, Default)]
pub struct ModelRegistry {
    state: RwLock<RegistryState>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a model and its relation targets
    pub fn register<M: Model>(&self) -> OrmResult<()> {
        register_type::<M>(&mut self.write(), None)
    }

    /// Register a model whose table name gets `prefix` prepended
    pub fn register_with_prefix<M: Model>(&self, prefix: &str) -> OrmResult<()> {
        register_type::<M>(&mut self.write(), Some(prefix))
    }

    /// Register a tuple of models, e.g. `registry.register_set::<(User, Post)>()`
    pub fn register_set<S: ModelSet>(&self, prefix: Option<&str>) -> OrmResult<()> {
        S::register_all(self, prefix)
    }

    fn register_optional_prefix<M: Model>(&self, prefix: Option<&str>) -> OrmResult<()> {
        register_type::<M>(&mut self.write(), prefix)
    }

    /// Validate, resolve and seal. Calls after the first are no-ops.
    pub fn bootstrap(&self) -> OrmResult<()> {
        let mut state = self.write();
        if state.sealed {
            return Ok(());
        }

        let mut through_links: Vec<(String, usize, String)> = Vec::new();
        for name in &state.order {
            let meta = &state.models[name];
            for (idx, field) in meta.fields.iter().enumerate() {
                if let Some(target) = &field.target {
                    if !state.models.contains_key(target) {
                        return Err(OrmError::unregistered(target));
                    }
                }
                if let Some(through) = &field.rel_through {
                    let through = state.lookup(through).map_err(|_| {
                        OrmError::Programmer(format!(
                            "{}.{}: through model '{}' is not registered",
                            meta.name, field.path, through
                        ))
                    })?;
                    through_links.push((name.clone(), idx, through.full_name.clone()));
                }
            }
        }

        for (model, idx, through) in through_links {
            if let Some(meta) = state.models.get_mut(&model) {
                Arc::make_mut(meta).fields[idx].through_model = Some(through.clone());
            }
            if let Some(meta) = state.models.get_mut(&through) {
                Arc::make_mut(meta).is_junction = true;
            }
        }

        for name in &state.order {
            let meta = state.models[name].clone();
            for field in meta.relation_fields() {
                match field.kind {
                    FieldKind::ManyToMany => {
                        state.forward_join(&meta, field)?;
                    }
                    FieldKind::Reverse => {
                        state.reverse_field(&meta, field)?;
                    }
                    _ => {}
                }
            }
        }

        state.sealed = true;
        info!(models = state.order.len(), "model registry bootstrapped");
        Ok(())
    }

    pub fn is_sealed(&self) -> bool {
        self.read().sealed
    }

    /// Model by short or full name
    pub fn get(&self, name: &str) -> OrmResult<Arc<ModelMetadata>> {
        self.read().lookup(name)
    }

    pub fn get_by_type<M: Model>(&self) -> OrmResult<Arc<ModelMetadata>> {
        self.read().lookup(full_model_name::<M>())
    }

    /// All models in registration order
    pub fn models(&self) -> Vec<Arc<ModelMetadata>> {
        let state = self.read();
        state
            .order
            .iter()
            .filter_map(|name| state.models.get(name).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Metadata of the model a relation field points to
    pub fn target_of(&self, field: &FieldMetadata) -> OrmResult<Arc<ModelMetadata>> {
        self.read().target_of(field)
    }

    /// Forward relation a reverse field mirrors
    pub fn reverse_field(&self, owner: &ModelMetadata, field: &FieldMetadata) -> OrmResult<ReverseTarget> {
        self.read().reverse_field(owner, field)
    }

    /// Join table of a many-to-many field (forward or reverse)
    pub fn m2m_join(&self, owner: &Arc<ModelMetadata>, field: &FieldMetadata) -> OrmResult<M2MJoin> {
        self.read().m2m_join(owner, field)
    }

    /// Join tables no registered model owns
    pub fn implicit_join_tables(&self) -> OrmResult<Vec<M2MJoin>> {
        let state = self.read();
        let mut joins = Vec::new();
        for name in &state.order {
            let meta = state.models[name].clone();
            for field in meta.fields.iter().filter(|f| f.kind == FieldKind::ManyToMany) {
                let join = state.forward_join(&meta, field)?;
                if !join.through && !joins.iter().any(|j: &M2MJoin| j.table == join.table) {
                    joins.push(join);
                }
            }
        }
        Ok(joins)
    }
}

/// A tuple of models registered together
pub trait ModelSet {
    fn register_all(registry: &ModelRegistry, prefix: Option<&str>) -> OrmResult<()>;
}

macro_rules! impl_model_set {
    ($($name:ident),+) => {
        impl<$($name: Model),+> ModelSet for ($($name,)+) {
            fn register_all(registry: &ModelRegistry, prefix: Option<&str>) -> OrmResult<()> {
                $( registry.register_optional_prefix::<$name>(prefix)?; )+
                Ok(())
            }
        }
    };
}

impl_model_set!(A);
impl_model_set!(A, B);
impl_model_set!(A, B, C);
impl_model_set!(A, B, C, D);
impl_model_set!(A, B, C, D, E);
impl_model_set!(A, B, C, D, E, F);
impl_model_set!(A, B, C, D, E, F, G);
impl_model_set!(A, B, C, D, E, F, G, H);

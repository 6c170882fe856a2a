//! Aliases - named connection profiles
//!
//! An [`Alias`] binds a configuration to a live pool and to the backend
//! strategy of its driver. Several aliases coexist in an [`AliasRegistry`]
//! and handles switch between them by name.

use std::sync::Arc;

use chrono::FixedOffset;
use dashmap::DashMap;
use tracing::info;

use crate::backends::{backend_for, DatabaseBackend, DatabaseBackendType, DatabasePool};
use crate::config::AliasConfig;
use crate::drivers;
use crate::error::{OrmError, OrmResult};
use crate::statistics::{OrmStats, UsageCounters};

/// One named database
pub struct Alias {
    config: AliasConfig,
    backend: Arc<dyn DatabaseBackend>,
    pool: Arc<dyn DatabasePool>,
    counters: Arc<UsageCounters>,
}

impl std::fmt::Debug for Alias {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Alias")
            .field("name", &self.config.name)
            .field("driver", &self.config.driver)
            .field("backend", &self.backend)
            .finish()
    }
}

impl Alias {
    /// Validate the configuration and open a pool with the bundled driver
    pub async fn connect(config: AliasConfig) -> OrmResult<Self> {
        config.validate()?;
        let pool = drivers::connect(&config).await?;
        Ok(Self::from_pool(config, pool))
    }

    /// Bind an existing pool; the backend follows `config.driver`
    pub fn from_pool(config: AliasConfig, pool: Arc<dyn DatabasePool>) -> Self {
        let backend = backend_for(config.driver, config.timezone);
        Self {
            config,
            backend,
            pool,
            counters: Arc::new(UsageCounters::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn driver(&self) -> DatabaseBackendType {
        self.config.driver
    }

    pub fn timezone(&self) -> FixedOffset {
        self.config.timezone
    }

    pub fn config(&self) -> &AliasConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<dyn DatabaseBackend> {
        &self.backend
    }

    pub fn pool(&self) -> &Arc<dyn DatabasePool> {
        &self.pool
    }

    pub fn counters(&self) -> &Arc<UsageCounters> {
        &self.counters
    }

    pub fn stats(&self) -> OrmStats {
        self.counters.snapshot(&self.config.name, self.pool.stats())
    }

    pub async fn close(&self) -> OrmResult<()> {
        self.pool.close().await
    }
}

/// Aliases by name
#[derive(Debug, Default)]
pub struct AliasRegistry {
    aliases: DashMap<String, Arc<Alias>>,
}

impl AliasRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an alias; names are unique
    pub fn add(&self, alias: Alias) -> OrmResult<Arc<Alias>> {
        let name = alias.name().to_string();
        let alias = Arc::new(alias);
        match self.aliases.entry(name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(OrmError::Configuration(format!(
                "alias '{}' is already registered",
                name
            ))),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(alias.clone());
                info!(alias = %name, driver = %alias.driver(), "database alias registered");
                Ok(alias)
            }
        }
    }

    pub fn get(&self, name: &str) -> OrmResult<Arc<Alias>> {
        self.aliases
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| OrmError::Configuration(format!("unknown database alias '{}'", name)))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.aliases.contains_key(name)
    }

    pub fn remove(&self, name: &str) -> Option<Arc<Alias>> {
        self.aliases.remove(name).map(|(_, alias)| alias)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.aliases.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::MockPool;
    use crate::error::ErrorKind;

    fn mock_alias(name: &str, driver: DatabaseBackendType) -> Alias {
        let config = AliasConfig::new(driver, "sqlite::memory:").with_name(name);
        Alias::from_pool(config, Arc::new(MockPool::new().with_dialect(driver.sql_dialect())))
    }

    #[test]
    fn test_alias_picks_backend_from_driver() {
        let alias = mock_alias("reports", DatabaseBackendType::PostgreSQL);
        assert_eq!(alias.backend().backend_type(), DatabaseBackendType::PostgreSQL);
        assert_eq!(alias.stats().alias, "reports");
    }

    #[test]
    fn test_registry_names_are_unique() {
        let registry = AliasRegistry::new();
        registry.add(mock_alias("default", DatabaseBackendType::MySQL)).unwrap();
        registry.add(mock_alias("replica", DatabaseBackendType::SQLite)).unwrap();

        let err = registry.add(mock_alias("default", DatabaseBackendType::SQLite)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert_eq!(registry.names(), vec!["default".to_string(), "replica".to_string()]);

        assert_eq!(registry.get("replica").unwrap().driver(), DatabaseBackendType::SQLite);
        assert_eq!(registry.get("missing").unwrap_err().kind(), ErrorKind::Configuration);
    }
}

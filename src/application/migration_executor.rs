use crate::domain::{MigrationContext, MigrationError, MigrationReport};
use crate::infrastructure::connection_strings::ConnectionStringResolver;
use crate::infrastructure::metrics::MigrationMetrics;
use crate::infrastructure::schema_store::{
    CollectionSpec, DatabaseTarget, SchemaStore, SchemaStoreError,
};
use crate::infrastructure::unit_of_work::UnitOfWork;
use async_trait::async_trait;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, info};

/// Brings one owner's structural elements into existence. Must be safe to run
/// any number of times; returns how many elements it created.
#[async_trait]
pub trait SchemaInitializer: Send + Sync {
    async fn initialize(
        &self,
        store: &dyn SchemaStore,
        target: &DatabaseTarget,
    ) -> Result<usize, SchemaStoreError>;
}

/// Initializer driven by a fixed list of collections and their indexes.
#[derive(Debug, Clone, Default)]
pub struct CollectionSetInitializer {
    collections: Vec<CollectionSpec>,
}

impl CollectionSetInitializer {
    pub fn new(collections: Vec<CollectionSpec>) -> Self {
        Self { collections }
    }

    pub fn collections(&self) -> &[CollectionSpec] {
        &self.collections
    }
}

#[async_trait]
impl SchemaInitializer for CollectionSetInitializer {
    async fn initialize(
        &self,
        store: &dyn SchemaStore,
        target: &DatabaseTarget,
    ) -> Result<usize, SchemaStoreError> {
        let mut created = 0;
        for collection in &self.collections {
            if store.ensure_collection(target, &collection.name).await? {
                created += 1;
            }
            for index in &collection.indexes {
                if store.ensure_index(target, &collection.name, index).await? {
                    created += 1;
                }
            }
        }
        Ok(created)
    }
}

/// A logical unit of schema belonging to one service.
#[derive(Clone)]
pub struct SchemaOwner {
    pub name: String,
    /// Key passed to the connection-string resolver.
    pub connection_string_name: String,
    /// Overrides the database name derived from the connection string.
    pub database_name: Option<String>,
    pub initializer: Arc<dyn SchemaInitializer>,
}

impl SchemaOwner {
    pub fn new(
        name: impl Into<String>,
        connection_string_name: impl Into<String>,
        initializer: Arc<dyn SchemaInitializer>,
    ) -> Self {
        Self {
            name: name.into(),
            connection_string_name: connection_string_name.into(),
            database_name: None,
            initializer,
        }
    }

    pub fn with_database_name(mut self, database_name: impl Into<String>) -> Self {
        self.database_name = Some(database_name.into());
        self
    }

    /// Explicit name, else the database named by the connection string, else
    /// the connection-string key itself.
    pub fn target_database_name(&self, connection_string: &str) -> String {
        self.database_name
            .clone()
            .filter(|name| !name.trim().is_empty())
            .or_else(|| database_from_connection_string(connection_string))
            .unwrap_or_else(|| self.connection_string_name.clone())
    }
}

impl std::fmt::Debug for SchemaOwner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaOwner")
            .field("name", &self.name)
            .field("connection_string_name", &self.connection_string_name)
            .field("database_name", &self.database_name)
            .finish()
    }
}

/// Reads the database from either a URL (`postgres://host/db`,
/// `mongodb://host/db?x=y`) or a key/value string (`Server=.;Database=db`).
pub fn database_from_connection_string(connection_string: &str) -> Option<String> {
    if let Ok(url) = reqwest::Url::parse(connection_string) {
        if url.has_host() {
            return url
                .path_segments()
                .and_then(|mut segments| segments.next())
                .filter(|segment| !segment.is_empty())
                .map(str::to_string);
        }
    }

    connection_string
        .split(';')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| {
            let key = key.trim();
            key.eq_ignore_ascii_case("database") || key.eq_ignore_ascii_case("initial catalog")
        })
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Statically assembled list of every schema owner this process is
/// responsible for, in registration order.
#[derive(Debug, Clone, Default)]
pub struct SchemaOwnerRegistry {
    owners: Vec<SchemaOwner>,
}

impl SchemaOwnerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, owner: SchemaOwner) -> Self {
        self.owners.push(owner);
        self
    }

    pub fn owners(&self) -> &[SchemaOwner] {
        &self.owners
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}

pub struct MigrationExecutor {
    registry: Arc<SchemaOwnerRegistry>,
    connection_strings: Arc<dyn ConnectionStringResolver>,
    store: Arc<dyn SchemaStore>,
    metrics: Arc<MigrationMetrics>,
}

impl MigrationExecutor {
    pub fn new(
        registry: Arc<SchemaOwnerRegistry>,
        connection_strings: Arc<dyn ConnectionStringResolver>,
        store: Arc<dyn SchemaStore>,
    ) -> Self {
        Self {
            registry,
            connection_strings,
            store,
            metrics: Arc::new(MigrationMetrics::default()),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MigrationMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn registry(&self) -> &SchemaOwnerRegistry {
        &self.registry
    }

    /// Applies every registered owner once. Owners whose connection string
    /// resolves empty are skipped. The first failing owner aborts the run.
    pub async fn ensure_schemas(
        &self,
        context: &MigrationContext,
        unit_of_work: &mut UnitOfWork,
    ) -> Result<MigrationReport, MigrationError> {
        let mut report = MigrationReport::default();

        for owner in self.registry.owners() {
            let Some(connection_string) = self
                .connection_strings
                .resolve(context.tenant_id, &owner.connection_string_name)
                .await
            else {
                info!(
                    "Skipping schema owner {}: no connection string {} for tenant {:?}",
                    owner.name, owner.connection_string_name, context.tenant_id
                );
                self.metrics.owners_skipped.fetch_add(1, Ordering::Relaxed);
                report.skipped_owners.push(owner.name.clone());
                continue;
            };

            let target = DatabaseTarget {
                database_name: owner.target_database_name(&connection_string),
                connection_string,
            };
            let changes = self.apply_owner(owner, &target).await?;

            debug!(
                "Schema owner {} on {}: {} structural change(s)",
                owner.name, target.database_name, changes
            );
            if changes > 0 {
                unit_of_work.record(
                    owner.name.clone(),
                    format!("{} change(s) on {}", changes, target.database_name),
                );
            }

            self.metrics.owners_applied.fetch_add(1, Ordering::Relaxed);
            self.metrics
                .structural_changes
                .fetch_add(changes as u64, Ordering::Relaxed);
            report.applied_owners.push(owner.name.clone());
            report.structural_changes += changes;
        }

        Ok(report)
    }

    async fn apply_owner(
        &self,
        owner: &SchemaOwner,
        target: &DatabaseTarget,
    ) -> Result<usize, MigrationError> {
        let to_error = |e: SchemaStoreError| MigrationError::SchemaStore {
            owner: owner.name.clone(),
            message: e.to_string(),
        };

        let mut changes = 0;
        if self
            .store
            .ensure_database(target)
            .await
            .map_err(to_error)?
        {
            changes += 1;
        }
        changes += owner
            .initializer
            .initialize(self.store.as_ref(), target)
            .await
            .map_err(to_error)?;
        Ok(changes)
    }
}

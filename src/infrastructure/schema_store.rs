use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum SchemaStoreError {
    #[error("Connection failed: {0}")]
    Connection(String),
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),
    #[error("Statement failed: {0}")]
    Statement(String),
}

/// A concrete database resolved for one schema owner.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DatabaseTarget {
    pub connection_string: String,
    pub database_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: String,
    pub fields: Vec<String>,
    pub unique: bool,
}

impl IndexSpec {
    pub fn on(name: impl Into<String>, fields: &[&str]) -> Self {
        Self {
            name: name.into(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
            unique: false,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSpec {
    pub name: String,
    pub indexes: Vec<IndexSpec>,
}

impl CollectionSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            indexes: Vec::new(),
        }
    }

    pub fn with_index(mut self, index: IndexSpec) -> Self {
        self.indexes.push(index);
        self
    }
}

/// Create-if-absent structural operations. Every method returns whether it
/// changed anything; none of them ever drops or rewrites existing data.
#[async_trait]
pub trait SchemaStore: Send + Sync {
    async fn ensure_database(&self, target: &DatabaseTarget) -> Result<bool, SchemaStoreError>;

    async fn ensure_collection(
        &self,
        target: &DatabaseTarget,
        collection: &str,
    ) -> Result<bool, SchemaStoreError>;

    async fn ensure_index(
        &self,
        target: &DatabaseTarget,
        collection: &str,
        index: &IndexSpec,
    ) -> Result<bool, SchemaStoreError>;
}

type Collections = BTreeMap<String, BTreeSet<String>>;

#[derive(Debug, Clone, Default)]
pub struct InMemorySchemaStore {
    databases: Arc<DashMap<DatabaseTarget, Collections>>,
    changes: Arc<AtomicUsize>,
}

impl InMemorySchemaStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total structural changes made since creation.
    pub fn change_count(&self) -> usize {
        self.changes.load(Ordering::SeqCst)
    }

    pub fn has_database(&self, database_name: &str) -> bool {
        self.databases
            .iter()
            .any(|entry| entry.key().database_name == database_name)
    }

    pub fn has_collection(&self, database_name: &str, collection: &str) -> bool {
        self.databases.iter().any(|entry| {
            entry.key().database_name == database_name && entry.value().contains_key(collection)
        })
    }

    pub fn has_index(&self, database_name: &str, collection: &str, index: &str) -> bool {
        self.databases.iter().any(|entry| {
            entry.key().database_name == database_name
                && entry
                    .value()
                    .get(collection)
                    .map(|indexes| indexes.contains(index))
                    .unwrap_or(false)
        })
    }

    fn changed(&self, changed: bool) -> bool {
        if changed {
            self.changes.fetch_add(1, Ordering::SeqCst);
        }
        changed
    }
}

#[async_trait]
impl SchemaStore for InMemorySchemaStore {
    async fn ensure_database(&self, target: &DatabaseTarget) -> Result<bool, SchemaStoreError> {
        let mut created = false;
        self.databases.entry(target.clone()).or_insert_with(|| {
            created = true;
            Collections::new()
        });
        Ok(self.changed(created))
    }

    async fn ensure_collection(
        &self,
        target: &DatabaseTarget,
        collection: &str,
    ) -> Result<bool, SchemaStoreError> {
        let mut database = self.databases.entry(target.clone()).or_default();
        let created = !database.contains_key(collection);
        if created {
            database.insert(collection.to_string(), BTreeSet::new());
        }
        drop(database);
        Ok(self.changed(created))
    }

    async fn ensure_index(
        &self,
        target: &DatabaseTarget,
        collection: &str,
        index: &IndexSpec,
    ) -> Result<bool, SchemaStoreError> {
        let mut database = self.databases.entry(target.clone()).or_default();
        let created = database
            .entry(collection.to_string())
            .or_default()
            .insert(index.name.clone());
        drop(database);
        Ok(self.changed(created))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> DatabaseTarget {
        DatabaseTarget {
            connection_string: "memory://catalog".to_string(),
            database_name: "catalog".to_string(),
        }
    }

    #[tokio::test]
    async fn ensure_operations_are_create_if_absent() {
        let store = InMemorySchemaStore::new();
        let index = IndexSpec::on("ix_products_code", &["code"]).unique();

        assert!(store.ensure_database(&target()).await.unwrap());
        assert!(store.ensure_collection(&target(), "products").await.unwrap());
        assert!(store.ensure_index(&target(), "products", &index).await.unwrap());
        assert_eq!(store.change_count(), 3);

        assert!(!store.ensure_database(&target()).await.unwrap());
        assert!(!store.ensure_collection(&target(), "products").await.unwrap());
        assert!(!store.ensure_index(&target(), "products", &index).await.unwrap());
        assert_eq!(store.change_count(), 3);

        assert!(store.has_index("catalog", "products", "ix_products_code"));
    }
}

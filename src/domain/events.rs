use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Asks every service owning `database_name` to bring its schema up to date.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MigrationRequestEvent {
    /// `None` targets the host (shared) database.
    pub tenant_id: Option<Uuid>,
    pub database_name: String,
}

impl MigrationRequestEvent {
    pub fn host(database_name: impl Into<String>) -> Self {
        Self {
            tenant_id: None,
            database_name: database_name.into(),
        }
    }

    pub fn for_tenant(tenant_id: Uuid, database_name: impl Into<String>) -> Self {
        Self {
            tenant_id: Some(tenant_id),
            database_name: database_name.into(),
        }
    }

    /// Name of the distributed lock guarding this (tenant, database) pair.
    pub fn lock_key(&self) -> String {
        match self.tenant_id {
            Some(tenant_id) => format!("DatabaseMigration_{}_{}", tenant_id, self.database_name),
            None => format!("DatabaseMigration_host_{}", self.database_name),
        }
    }

    pub fn tenant_label(&self) -> String {
        self.tenant_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "host".to_string())
    }
}

/// Delivery wrapper that carries the attempt counters alongside the payload.
///
/// Every republish produces a new envelope through [`Envelope::next_attempt`] or
/// [`Envelope::next_lock_wait`]; the payload itself is never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<T> {
    pub id: Uuid,
    /// Failed executions so far.
    #[serde(default)]
    pub attempts: u32,
    /// Republishes caused by another process holding the lock.
    #[serde(default)]
    pub lock_waits: u32,
    pub published_at: DateTime<Utc>,
    pub payload: T,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl<T: Clone> Envelope<T> {
    pub fn new(payload: T) -> Self {
        Self {
            id: Uuid::new_v4(),
            attempts: 0,
            lock_waits: 0,
            published_at: Utc::now(),
            payload,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn next_attempt(&self) -> Self {
        Self {
            id: Uuid::new_v4(),
            attempts: self.attempts.saturating_add(1),
            lock_waits: self.lock_waits,
            published_at: Utc::now(),
            payload: self.payload.clone(),
            metadata: self.metadata.clone(),
        }
    }

    pub fn next_lock_wait(&self) -> Self {
        Self {
            id: Uuid::new_v4(),
            attempts: self.attempts,
            lock_waits: self.lock_waits.saturating_add(1),
            published_at: Utc::now(),
            payload: self.payload.clone(),
            metadata: self.metadata.clone(),
        }
    }
}

pub type MigrationEnvelope = Envelope<MigrationRequestEvent>;

use crate::domain::events::MigrationRequestEvent;
use thiserror::Error;
use uuid::Uuid;

/// Explicit scope threaded through every migration call instead of ambient
/// tenant state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationContext {
    pub tenant_id: Option<Uuid>,
    pub database_name: String,
}

impl From<&MigrationRequestEvent> for MigrationContext {
    fn from(event: &MigrationRequestEvent) -> Self {
        Self {
            tenant_id: event.tenant_id,
            database_name: event.database_name.clone(),
        }
    }
}

/// Outcome of one executor run. Only used for logging and metrics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub applied_owners: Vec<String>,
    pub skipped_owners: Vec<String>,
    pub structural_changes: usize,
}

impl MigrationReport {
    pub fn any_applied(&self) -> bool {
        !self.applied_owners.is_empty()
    }

    pub fn applied_count(&self) -> usize {
        self.applied_owners.len()
    }
}

#[derive(Debug, Error, Clone)]
pub enum MigrationError {
    #[error("Lock {key} is held by another process")]
    LockUnavailable { key: String },
    #[error("Lock provider error: {0}")]
    Lock(String),
    #[error("Connection string for {owner} is invalid: {message}")]
    InvalidConnectionString { owner: String, message: String },
    #[error("Schema store error for {owner}: {message}")]
    SchemaStore { owner: String, message: String },
    #[error("Unit of work {id} failed to complete: {message}")]
    UnitOfWork { id: Uuid, message: String },
}

impl MigrationError {
    pub fn is_lock_contention(&self) -> bool {
        matches!(self, MigrationError::LockUnavailable { .. })
    }
}

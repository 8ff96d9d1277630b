use crate::domain::MigrationError;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnitOfWorkOptions {
    /// Completing after this deadline fails the unit of work.
    pub timeout: Option<Duration>,
}

/// One structural change recorded while the unit of work was open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedChange {
    pub owner: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitOfWorkSummary {
    pub id: Uuid,
    pub changes: Vec<RecordedChange>,
    pub elapsed: Duration,
}

/// Scope and timing boundary around one database migration. Each delivery
/// begins a fresh one and never joins another. It is not a database
/// transaction: schema statements are idempotent and apply as they run, and
/// the unit of work only records them and enforces the optional deadline.
#[derive(Debug)]
pub struct UnitOfWork {
    id: Uuid,
    options: UnitOfWorkOptions,
    started_at: Instant,
    changes: Vec<RecordedChange>,
    completed: bool,
}

impl UnitOfWork {
    pub fn begin(options: UnitOfWorkOptions) -> Self {
        let id = Uuid::new_v4();
        debug!("Begin unit of work {} (timeout: {:?})", id, options.timeout);
        Self {
            id,
            options,
            started_at: Instant::now(),
            changes: Vec::new(),
            completed: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn options(&self) -> UnitOfWorkOptions {
        self.options
    }

    pub fn record(&mut self, owner: impl Into<String>, description: impl Into<String>) {
        self.changes.push(RecordedChange {
            owner: owner.into(),
            description: description.into(),
        });
    }

    pub fn changes(&self) -> &[RecordedChange] {
        &self.changes
    }

    pub async fn complete(mut self) -> Result<UnitOfWorkSummary, MigrationError> {
        let elapsed = self.started_at.elapsed();
        if let Some(timeout) = self.options.timeout {
            if elapsed > timeout {
                return Err(MigrationError::UnitOfWork {
                    id: self.id,
                    message: format!(
                        "exceeded timeout of {} ms (took {} ms)",
                        timeout.as_millis(),
                        elapsed.as_millis()
                    ),
                });
            }
        }

        self.completed = true;
        debug!(
            "Completed unit of work {} with {} change(s) in {:?}",
            self.id,
            self.changes.len(),
            elapsed
        );
        Ok(UnitOfWorkSummary {
            id: self.id,
            changes: std::mem::take(&mut self.changes),
            elapsed,
        })
    }
}

impl Drop for UnitOfWork {
    fn drop(&mut self) {
        if !self.completed {
            warn!(
                "Unit of work {} disposed without completion ({} change(s) recorded)",
                self.id,
                self.changes.len()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn complete_returns_recorded_changes() {
        let mut uow = UnitOfWork::begin(UnitOfWorkOptions::default());
        uow.record("Catalog", "created collection products");

        let summary = uow.complete().await.unwrap();
        assert_eq!(summary.changes.len(), 1);
        assert_eq!(summary.changes[0].owner, "Catalog");
    }

    #[tokio::test]
    async fn complete_fails_after_timeout() {
        let uow = UnitOfWork::begin(UnitOfWorkOptions {
            timeout: Some(Duration::from_millis(1)),
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        let result = uow.complete().await;
        assert!(matches!(result, Err(MigrationError::UnitOfWork { .. })));
    }
}

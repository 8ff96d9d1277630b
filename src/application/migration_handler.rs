use crate::application::migration_executor::MigrationExecutor;
use crate::domain::{MigrationContext, MigrationEnvelope, MigrationError, MigrationReport};
use crate::infrastructure::distributed_lock::{DistributedLockProvider, LockLease};
use crate::infrastructure::metrics::MigrationMetrics;
use crate::infrastructure::retry_scheduler::{RetryPolicy, RetryScheduler};
use crate::infrastructure::unit_of_work::{UnitOfWork, UnitOfWorkOptions};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(120);

/// What happened to one delivery. Informational only; the handler has already
/// taken every action the outcome describes.
#[derive(Debug, Clone, PartialEq)]
pub enum HandleOutcome {
    /// The event targets a database this handler does not own.
    Ignored,
    Migrated(MigrationReport),
    RetryScheduled { attempt: u32, delay: Duration },
    LockWaitScheduled { wait: u32, delay: Duration },
    Abandoned { attempts: u32, lock_waits: u32, reason: String },
}

/// Consumes migration requests for one logical database.
///
/// Each delivery takes the distributed lock for its (tenant, database) key,
/// runs the executor inside a fresh unit of work and releases the lock. Any
/// failure is turned into a delayed republish or, once the budget is spent, an
/// error log. Execution failures and lock contention have separate budgets:
/// `RetryPolicy::max_attempts` and `RetryPolicy::max_lock_waits`.
pub struct MigrationEventHandler {
    database_name: String,
    lock: Arc<dyn DistributedLockProvider>,
    executor: Arc<MigrationExecutor>,
    scheduler: RetryScheduler,
    policy: RetryPolicy,
    lock_ttl: Duration,
    unit_of_work: UnitOfWorkOptions,
    metrics: Arc<MigrationMetrics>,
}

impl MigrationEventHandler {
    pub fn new(
        database_name: impl Into<String>,
        lock: Arc<dyn DistributedLockProvider>,
        executor: Arc<MigrationExecutor>,
        scheduler: RetryScheduler,
    ) -> Self {
        Self {
            database_name: database_name.into(),
            lock,
            executor,
            scheduler,
            policy: RetryPolicy::default(),
            lock_ttl: DEFAULT_LOCK_TTL,
            unit_of_work: UnitOfWorkOptions::default(),
            metrics: Arc::new(MigrationMetrics::default()),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_lock_ttl(mut self, lock_ttl: Duration) -> Self {
        self.lock_ttl = lock_ttl;
        self
    }

    pub fn with_unit_of_work_options(mut self, options: UnitOfWorkOptions) -> Self {
        self.unit_of_work = options;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MigrationMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &Arc<MigrationMetrics> {
        &self.metrics
    }

    pub fn database_name(&self) -> &str {
        &self.database_name
    }

    pub async fn handle(&self, envelope: MigrationEnvelope) -> HandleOutcome {
        self.process(envelope).await.0
    }

    /// Like `handle`, but also waits until any scheduled republish is back on
    /// the bus. The flag is `false` when that republish failed, in which case
    /// the delivery must not be acknowledged.
    pub async fn handle_and_settle(&self, envelope: MigrationEnvelope) -> (HandleOutcome, bool) {
        let (outcome, republish) = self.process(envelope).await;
        let settled = match republish {
            Some(republish) => republish.await.unwrap_or(false),
            None => true,
        };
        (outcome, settled)
    }

    async fn process(
        &self,
        envelope: MigrationEnvelope,
    ) -> (HandleOutcome, Option<JoinHandle<bool>>) {
        self.metrics.events_received.fetch_add(1, Ordering::Relaxed);

        if !envelope
            .payload
            .database_name
            .eq_ignore_ascii_case(&self.database_name)
        {
            debug!(
                "Ignoring migration request for {} (handler owns {})",
                envelope.payload.database_name, self.database_name
            );
            self.metrics.events_ignored.fetch_add(1, Ordering::Relaxed);
            return (HandleOutcome::Ignored, None);
        }

        let started = Instant::now();
        match self.migrate(&envelope).await {
            Ok(report) => {
                self.metrics.record_migration_latency(started.elapsed());
                self.metrics
                    .migrations_succeeded
                    .fetch_add(1, Ordering::Relaxed);
                info!(
                    tenant = %envelope.payload.tenant_label(),
                    database = %envelope.payload.database_name,
                    applied = report.applied_count(),
                    changes = report.structural_changes,
                    "Database migration completed in {:?}",
                    started.elapsed()
                );
                (HandleOutcome::Migrated(report), None)
            }
            Err(e) if e.is_lock_contention() => self.on_lock_contention(&envelope),
            Err(e) => self.on_failure(&envelope, &e),
        }
    }

    async fn migrate(&self, envelope: &MigrationEnvelope) -> Result<MigrationReport, MigrationError> {
        let event = &envelope.payload;
        let key = event.lock_key();
        let unit_of_work = UnitOfWork::begin(self.unit_of_work);

        let lease = self
            .lock
            .try_acquire(&key, self.lock_ttl)
            .await
            .map_err(|e| MigrationError::Lock(e.to_string()))?
            .ok_or_else(|| MigrationError::LockUnavailable { key: key.clone() })?;
        self.metrics.locks_acquired.fetch_add(1, Ordering::Relaxed);
        debug!("Acquired migration lock {}", key);

        let result = self
            .run_locked(MigrationContext::from(event), unit_of_work)
            .await;
        self.release(&lease).await;
        result
    }

    async fn run_locked(
        &self,
        context: MigrationContext,
        mut unit_of_work: UnitOfWork,
    ) -> Result<MigrationReport, MigrationError> {
        let report = self
            .executor
            .ensure_schemas(&context, &mut unit_of_work)
            .await?;
        unit_of_work.complete().await?;
        Ok(report)
    }

    async fn release(&self, lease: &LockLease) {
        match self.lock.release(lease).await {
            Ok(true) => debug!("Released migration lock {}", lease.key),
            Ok(false) => {
                self.metrics
                    .lock_release_failures
                    .fetch_add(1, Ordering::Relaxed);
                warn!("Migration lock {} had already expired", lease.key);
            }
            Err(e) => {
                self.metrics
                    .lock_release_failures
                    .fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Failed to release migration lock {}, it will expire after {:?}: {}",
                    lease.key, lease.ttl, e
                );
            }
        }
    }

    fn on_failure(
        &self,
        envelope: &MigrationEnvelope,
        e: &MigrationError,
    ) -> (HandleOutcome, Option<JoinHandle<bool>>) {
        let event = &envelope.payload;
        let attempt = envelope.attempts.saturating_add(1);

        if attempt > self.policy.max_attempts {
            self.metrics.events_abandoned.fetch_add(1, Ordering::Relaxed);
            error!(
                tenant = %event.tenant_label(),
                database = %event.database_name,
                attempts = attempt,
                "Database migration abandoned after {} attempts: {}",
                attempt,
                e
            );
            let outcome = HandleOutcome::Abandoned {
                attempts: envelope.attempts,
                lock_waits: envelope.lock_waits,
                reason: e.to_string(),
            };
            return (outcome, None);
        }

        let delay = self.policy.next_delay();
        warn!(
            tenant = %event.tenant_label(),
            database = %event.database_name,
            "Database migration failed (attempt {}/{}), retrying in {:?}: {}",
            attempt,
            self.policy.max_attempts,
            delay,
            e
        );
        self.metrics.retries_scheduled.fetch_add(1, Ordering::Relaxed);
        let republish = self.scheduler.schedule(envelope.next_attempt(), delay);
        (HandleOutcome::RetryScheduled { attempt, delay }, Some(republish))
    }

    fn on_lock_contention(
        &self,
        envelope: &MigrationEnvelope,
    ) -> (HandleOutcome, Option<JoinHandle<bool>>) {
        let event = &envelope.payload;
        let wait = envelope.lock_waits.saturating_add(1);
        self.metrics.lock_contention.fetch_add(1, Ordering::Relaxed);

        if wait > self.policy.max_lock_waits {
            self.metrics.events_abandoned.fetch_add(1, Ordering::Relaxed);
            error!(
                tenant = %event.tenant_label(),
                database = %event.database_name,
                lock_waits = envelope.lock_waits,
                "Database migration abandoned: lock {} still held after {} waits",
                event.lock_key(),
                envelope.lock_waits
            );
            let outcome = HandleOutcome::Abandoned {
                attempts: envelope.attempts,
                lock_waits: envelope.lock_waits,
                reason: format!("lock {} unavailable", event.lock_key()),
            };
            return (outcome, None);
        }

        let delay = self.policy.next_delay();
        info!(
            "Migration lock {} is held elsewhere, waiting {:?} ({}/{})",
            event.lock_key(),
            delay,
            wait,
            self.policy.max_lock_waits
        );
        self.metrics
            .lock_waits_scheduled
            .fetch_add(1, Ordering::Relaxed);
        let republish = self.scheduler.schedule(envelope.next_lock_wait(), delay);
        (HandleOutcome::LockWaitScheduled { wait, delay }, Some(republish))
    }
}

/// Feeds deliveries from an in-process bus to the handler, one task per event
/// so different keys migrate in parallel.
pub fn spawn_dispatcher(
    handler: Arc<MigrationEventHandler>,
    mut deliveries: mpsc::UnboundedReceiver<MigrationEnvelope>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                delivery = deliveries.recv() => {
                    let Some(envelope) = delivery else { break };
                    let handler = handler.clone();
                    tokio::spawn(async move {
                        handler.handle(envelope).await;
                    });
                }
            }
        }
        debug!("Migration dispatcher stopped");
    })
}

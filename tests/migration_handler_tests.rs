use async_trait::async_trait;
use futures::future::join_all;
use shop_coordinator::application::{
    spawn_dispatcher, CollectionSetInitializer, HandleOutcome, MigrationEventHandler,
    MigrationExecutor, SchemaOwner, SchemaOwnerRegistry,
};
use shop_coordinator::domain::{Envelope, MigrationContext, MigrationRequestEvent};
use shop_coordinator::infrastructure::{
    CollectionSpec, ConfiguredConnectionStrings, DatabaseTarget, EventBus, InMemoryDistributedLock,
    InMemoryEventBus, InMemorySchemaStore, IndexSpec, RetryPolicy, RetryScheduler, SchemaStore,
    SchemaStoreError, UnitOfWork, UnitOfWorkOptions,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::Layer;
use uuid::Uuid;

/// Collects the message of every error-level event.
#[derive(Clone, Default)]
struct ErrorLogs(Arc<Mutex<Vec<String>>>);

impl ErrorLogs {
    fn messages(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

struct MessageVisitor(String);

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{:?}", value);
        }
    }
}

impl<S: Subscriber> Layer<S> for ErrorLogs {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() == Level::ERROR {
            let mut visitor = MessageVisitor(String::new());
            event.record(&mut visitor);
            self.0.lock().unwrap().push(visitor.0);
        }
    }
}

/// In-memory store that fails the first `failures` database checks and tracks
/// how many callers are inside it at once.
#[derive(Clone, Default)]
struct TestStore {
    inner: InMemorySchemaStore,
    failures_left: Arc<AtomicUsize>,
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
    hold_for: Duration,
}

impl TestStore {
    fn failing(failures: usize) -> Self {
        let store = Self::default();
        store.failures_left.store(failures, Ordering::SeqCst);
        store
    }

    fn slow(hold_for: Duration) -> Self {
        Self {
            hold_for,
            ..Self::default()
        }
    }
}

#[async_trait]
impl SchemaStore for TestStore {
    async fn ensure_database(&self, target: &DatabaseTarget) -> Result<bool, SchemaStoreError> {
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);
        if !self.hold_for.is_zero() {
            tokio::time::sleep(self.hold_for).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(SchemaStoreError::Connection("connection refused".to_string()));
        }
        self.inner.ensure_database(target).await
    }

    async fn ensure_collection(
        &self,
        target: &DatabaseTarget,
        collection: &str,
    ) -> Result<bool, SchemaStoreError> {
        self.inner.ensure_collection(target, collection).await
    }

    async fn ensure_index(
        &self,
        target: &DatabaseTarget,
        collection: &str,
        index: &IndexSpec,
    ) -> Result<bool, SchemaStoreError> {
        self.inner.ensure_index(target, collection, index).await
    }
}

fn registry() -> SchemaOwnerRegistry {
    SchemaOwnerRegistry::new()
        .register(SchemaOwner::new(
            "Catalog",
            "Catalog",
            Arc::new(CollectionSetInitializer::new(vec![
                CollectionSpec::new("products")
                    .with_index(IndexSpec::on("ix_products_code", &["code"]).unique()),
                CollectionSpec::new("product_images"),
            ])),
        ))
        .register(SchemaOwner::new(
            "Payment",
            "Payment",
            Arc::new(CollectionSetInitializer::new(vec![CollectionSpec::new(
                "payment_requests",
            )])),
        ))
}

fn connection_strings() -> ConfiguredConnectionStrings {
    ConfiguredConnectionStrings::new().with("Catalog", "mongodb://localhost:27017/catalog")
}

struct Harness {
    handler: Arc<MigrationEventHandler>,
    bus: InMemoryEventBus,
    lock: InMemoryDistributedLock,
    scheduler: RetryScheduler,
}

fn harness(store: TestStore, policy: RetryPolicy) -> Harness {
    let bus = InMemoryEventBus::new();
    let lock = InMemoryDistributedLock::new();
    let scheduler = RetryScheduler::new(Arc::new(bus.clone()), CancellationToken::new());
    let executor = MigrationExecutor::new(
        Arc::new(registry()),
        Arc::new(connection_strings()),
        Arc::new(store),
    );
    let handler = MigrationEventHandler::new(
        "catalog",
        Arc::new(lock.clone()),
        Arc::new(executor),
        scheduler.clone(),
    )
    .with_policy(policy);

    Harness {
        handler: Arc::new(handler),
        bus,
        lock,
        scheduler,
    }
}

#[tokio::test]
async fn successful_migration_publishes_nothing_and_releases_lock() {
    let store = TestStore::default();
    let h = harness(store.clone(), RetryPolicy::default());
    let event = MigrationRequestEvent::host("catalog");

    let outcome = h.handler.handle(Envelope::new(event.clone())).await;

    match outcome {
        HandleOutcome::Migrated(report) => {
            assert_eq!(report.applied_owners, vec!["Catalog"]);
            assert_eq!(report.skipped_owners, vec!["Payment"]);
        }
        other => panic!("expected migration, got {:?}", other),
    }
    assert_eq!(h.bus.published_count(), 0);
    assert!(!h.lock.is_held(&event.lock_key()));
    assert!(store.inner.has_collection("catalog", "products"));
    assert!(store.inner.has_collection("catalog", "product_images"));
    assert!(store.inner.has_index("catalog", "products", "ix_products_code"));
}

#[tokio::test(start_paused = true)]
async fn each_failure_republishes_with_next_attempt_until_budget_is_spent() {
    let h = harness(TestStore::failing(usize::MAX), RetryPolicy::default());
    let mut envelope = Envelope::new(MigrationRequestEvent::host("catalog"));

    for expected_attempt in 1..=3u32 {
        let outcome = h.handler.handle(envelope.clone()).await;
        assert!(matches!(
            outcome,
            HandleOutcome::RetryScheduled { attempt, delay }
                if attempt == expected_attempt
                    && delay >= Duration::from_secs(5)
                    && delay <= Duration::from_secs(15)
        ));

        h.scheduler.wait_idle().await;
        let published = h.bus.published();
        assert_eq!(published.len(), expected_attempt as usize);
        envelope = published[published.len() - 1].clone();
        assert_eq!(envelope.attempts, expected_attempt);
        assert_eq!(envelope.payload.database_name, "catalog");
    }

    let outcome = h.handler.handle(envelope).await;
    assert!(matches!(outcome, HandleOutcome::Abandoned { attempts: 3, .. }));

    h.scheduler.wait_idle().await;
    let attempts: Vec<u32> = h.bus.published().iter().map(|e| e.attempts).collect();
    assert_eq!(attempts, vec![1, 2, 3]);
    assert!(!h.lock.is_held("DatabaseMigration_host_catalog"));
}

#[tokio::test]
async fn exhausted_event_is_abandoned_without_republish() {
    let h = harness(TestStore::failing(1), RetryPolicy::default());
    let errors = ErrorLogs::default();
    let _subscriber =
        tracing::subscriber::set_default(tracing_subscriber::registry().with(errors.clone()));

    let outcome = h
        .handler
        .handle(Envelope::new(MigrationRequestEvent::host("catalog")).with_attempts(3))
        .await;

    assert!(matches!(outcome, HandleOutcome::Abandoned { attempts: 3, .. }));
    assert_eq!(h.scheduler.pending(), 0);
    assert_eq!(h.bus.published_count(), 0);
    assert_eq!(
        h.handler.metrics().events_abandoned.load(Ordering::Relaxed),
        1
    );

    let logged = errors.messages();
    assert_eq!(logged.len(), 1, "{:?}", logged);
    assert!(
        logged[0].starts_with("Database migration abandoned after 4 attempts"),
        "{}",
        logged[0]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_deliveries_for_one_key_never_overlap() {
    let store = TestStore::slow(Duration::from_millis(20));
    let h = harness(store.clone(), RetryPolicy::default());

    let deliveries = (0..16).map(|_| {
        let handler = h.handler.clone();
        tokio::spawn(async move {
            handler
                .handle(Envelope::new(MigrationRequestEvent::host("catalog")))
                .await
        })
    });
    let outcomes: Vec<HandleOutcome> = join_all(deliveries)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    assert!(store.max_active.load(Ordering::SeqCst) <= 1);
    let migrated = outcomes
        .iter()
        .filter(|o| matches!(o, HandleOutcome::Migrated(_)))
        .count();
    let waiting = outcomes
        .iter()
        .filter(|o| matches!(o, HandleOutcome::LockWaitScheduled { .. }))
        .count();
    assert!(migrated >= 1);
    assert_eq!(migrated + waiting, 16);
}

#[tokio::test]
async fn different_tenants_migrate_in_parallel() {
    let store = TestStore::slow(Duration::from_millis(50));
    let h = harness(store.clone(), RetryPolicy::default());

    let a = h
        .handler
        .handle(Envelope::new(MigrationRequestEvent::for_tenant(Uuid::new_v4(), "catalog")));
    let b = h
        .handler
        .handle(Envelope::new(MigrationRequestEvent::for_tenant(Uuid::new_v4(), "catalog")));
    let (a, b) = tokio::join!(a, b);

    assert!(matches!(a, HandleOutcome::Migrated(_)));
    assert!(matches!(b, HandleOutcome::Migrated(_)));
    assert_eq!(store.max_active.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn executor_second_run_makes_no_changes() {
    let store = InMemorySchemaStore::new();
    let executor = MigrationExecutor::new(
        Arc::new(registry()),
        Arc::new(connection_strings()),
        Arc::new(store.clone()),
    );
    let context = MigrationContext {
        tenant_id: None,
        database_name: "catalog".to_string(),
    };

    let mut first_uow = UnitOfWork::begin(UnitOfWorkOptions::default());
    let first = executor.ensure_schemas(&context, &mut first_uow).await.unwrap();
    first_uow.complete().await.unwrap();
    let changes_after_first = store.change_count();

    let mut second_uow = UnitOfWork::begin(UnitOfWorkOptions::default());
    let second = executor
        .ensure_schemas(&context, &mut second_uow)
        .await
        .unwrap();
    let summary = second_uow.complete().await.unwrap();

    assert_eq!(first.structural_changes, 4);
    assert_eq!(second.structural_changes, 0);
    assert!(second.any_applied());
    assert!(summary.changes.is_empty());
    assert_eq!(store.change_count(), changes_after_first);
}

#[tokio::test]
async fn tenant_connection_string_targets_tenant_database() {
    let tenant = Uuid::new_v4();
    let store = InMemorySchemaStore::new();
    let strings = connection_strings().with_tenant(
        tenant,
        "Catalog",
        "mongodb://localhost:27017/catalog_tenant_a",
    );
    let executor =
        MigrationExecutor::new(Arc::new(registry()), Arc::new(strings), Arc::new(store.clone()));

    let mut uow = UnitOfWork::begin(UnitOfWorkOptions::default());
    executor
        .ensure_schemas(
            &MigrationContext {
                tenant_id: Some(tenant),
                database_name: "catalog".to_string(),
            },
            &mut uow,
        )
        .await
        .unwrap();
    uow.complete().await.unwrap();

    assert!(store.has_collection("catalog_tenant_a", "products"));
    assert!(!store.has_database("catalog"));
}

#[tokio::test]
async fn dispatcher_retries_until_migration_succeeds() {
    let store = TestStore::failing(2);
    let policy = RetryPolicy {
        min_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(10),
        ..RetryPolicy::default()
    };
    let h = harness(store.clone(), policy);
    let shutdown = CancellationToken::new();
    let dispatcher = spawn_dispatcher(h.handler.clone(), h.bus.subscribe(), shutdown.clone());

    h.bus
        .publish(Envelope::new(MigrationRequestEvent::host("catalog")))
        .await
        .unwrap();

    let migrated = tokio::time::timeout(Duration::from_secs(5), async {
        while !store.inner.has_collection("catalog", "products") {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(migrated.is_ok());

    shutdown.cancel();
    dispatcher.await.unwrap();

    let attempts: Vec<u32> = h.bus.published().iter().map(|e| e.attempts).collect();
    assert_eq!(attempts, vec![0, 1, 2]);
    assert_eq!(
        h.handler
            .metrics()
            .migrations_succeeded
            .load(Ordering::Relaxed),
        1
    );
}

use anyhow::Context;
use shop_coordinator::application::{
    CollectionSetInitializer, MigrationEventHandler, MigrationExecutor, SchemaOwner,
    SchemaOwnerRegistry,
};
use shop_coordinator::domain::{Envelope, MigrationRequestEvent};
use shop_coordinator::infrastructure::logging::{init_logging, LoggingConfig};
use shop_coordinator::infrastructure::shutdown::{shutdown_signal, ShutdownManager};
use shop_coordinator::infrastructure::{
    CollectionSpec, ConfiguredConnectionStrings, EventBus, IndexSpec, KafkaEventBus,
    KafkaMigrationConsumer, MigrationMetrics, MigrationWorkerConfig, PostgresSchemaStore,
    RedisDistributedLock, RetryScheduler, UnitOfWorkOptions,
};
use std::sync::Arc;
use tracing::{error, info};

/// Schema owners known to this worker. Owners without a configured connection
/// string are skipped at migration time.
fn schema_owners() -> SchemaOwnerRegistry {
    SchemaOwnerRegistry::new()
        .register(SchemaOwner::new(
            "Catalog",
            "Catalog",
            Arc::new(CollectionSetInitializer::new(vec![
                CollectionSpec::new("products")
                    .with_index(IndexSpec::on("ix_products_code", &["code"]).unique())
                    .with_index(IndexSpec::on("ix_products_name", &["name"])),
                CollectionSpec::new("product_images")
                    .with_index(IndexSpec::on("ix_product_images_product", &["productId"])),
            ])),
        ))
        .register(SchemaOwner::new(
            "Ordering",
            "Ordering",
            Arc::new(CollectionSetInitializer::new(vec![
                CollectionSpec::new("orders")
                    .with_index(IndexSpec::on("ix_orders_buyer", &["buyerId"]))
                    .with_index(IndexSpec::on("ix_orders_status", &["orderStatus"])),
            ])),
        ))
        .register(SchemaOwner::new(
            "Basket",
            "Basket",
            Arc::new(CollectionSetInitializer::new(vec![CollectionSpec::new(
                "baskets",
            )
            .with_index(IndexSpec::on("ix_baskets_user", &["userId"]).unique())])),
        ))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let _logging = init_logging(LoggingConfig::from_env("migration-worker.log"))
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {}", e))?;

    let config = MigrationWorkerConfig::from_env();
    info!(
        "Starting migration worker for database {} (topic {})",
        config.database_name, config.kafka.migration_topic
    );

    let mut shutdown_manager = ShutdownManager::new(shutdown_signal());
    let shutdown = shutdown_manager.token();
    let metrics = Arc::new(MigrationMetrics::default());

    let bus: Arc<dyn EventBus> =
        Arc::new(KafkaEventBus::new(config.kafka.clone()).context("creating Kafka producer")?);
    let lock = RedisDistributedLock::connect(&config.redis_url)
        .await
        .context("connecting to Redis")?;

    let executor = MigrationExecutor::new(
        Arc::new(schema_owners()),
        Arc::new(ConfiguredConnectionStrings::from_env()),
        Arc::new(PostgresSchemaStore::new(config.max_db_connections)),
    )
    .with_metrics(metrics.clone());

    let scheduler = RetryScheduler::new(bus.clone(), shutdown.clone());
    shutdown_manager.register("retry scheduler", Arc::new(scheduler.clone()));
    let handler = Arc::new(
        MigrationEventHandler::new(
            config.database_name.clone(),
            Arc::new(lock),
            Arc::new(executor),
            scheduler.clone(),
        )
        .with_policy(config.retry.clone())
        .with_lock_ttl(config.lock_ttl)
        .with_unit_of_work_options(UnitOfWorkOptions {
            timeout: config.unit_of_work_timeout,
        })
        .with_metrics(metrics.clone()),
    );

    let consumer =
        KafkaMigrationConsumer::new(config.kafka.clone()).context("creating Kafka consumer")?;

    if config.migrate_on_startup {
        let request = Envelope::new(MigrationRequestEvent::host(config.database_name.clone()))
            .with_metadata("trigger", "startup");
        if let Err(e) = bus.publish(request).await {
            error!("Failed to publish startup migration request: {}", e);
        }
    }

    consumer
        .run(shutdown.clone(), move |envelope| {
            let handler = handler.clone();
            async move { handler.handle_and_settle(envelope).await.1 }
        })
        .await;

    info!("Flushing {} pending retries", scheduler.pending());
    shutdown_manager.shutdown_all().await;
    info!("Migration worker stopped: {}", metrics.to_json());
    Ok(())
}

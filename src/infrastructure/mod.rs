pub mod aggregation_cache;
pub mod config;
pub mod connection_strings;
pub mod distributed_lock;
pub mod event_bus;
pub mod http_client;
pub mod kafka_event_bus;
pub mod logging;
pub mod metrics;
pub mod postgres_schema_store;
pub mod proxy_config;
pub mod redis_lock;
pub mod retry_scheduler;
pub mod schema_store;
pub mod shutdown;
pub mod unit_of_work;

pub use aggregation_cache::{AggregationCache, AggregationCacheConfig};
pub use config::{GatewayConfig, MigrationWorkerConfig};
pub use connection_strings::{ConfiguredConnectionStrings, ConnectionStringResolver};
pub use distributed_lock::{DistributedLockProvider, InMemoryDistributedLock, LockError, LockLease};
pub use event_bus::{EventBus, EventBusError, InMemoryEventBus};
pub use http_client::{EndpointClient, ReqwestEndpointClient};
pub use kafka_event_bus::{KafkaConfig, KafkaEventBus, KafkaMigrationConsumer};
pub use metrics::{GatewayMetrics, MigrationMetrics};
pub use postgres_schema_store::PostgresSchemaStore;
pub use proxy_config::{
    FileProxyConfigProvider, ProxyConfigError, ProxyConfigProvider, StaticProxyConfigProvider,
};
pub use redis_lock::RedisDistributedLock;
pub use retry_scheduler::{RetryPolicy, RetryScheduler};
pub use schema_store::{
    CollectionSpec, DatabaseTarget, InMemorySchemaStore, IndexSpec, SchemaStore, SchemaStoreError,
};
pub use unit_of_work::{UnitOfWork, UnitOfWorkOptions, UnitOfWorkSummary};

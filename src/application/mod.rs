pub mod aggregation;
pub mod cluster_discovery;
pub mod migration_executor;
pub mod migration_handler;

pub use aggregation::{
    configuration_request, localization_request, AggregationEngine, AggregationService,
};
pub use cluster_discovery::ClusterDiscovery;
pub use migration_executor::{
    CollectionSetInitializer, MigrationExecutor, SchemaInitializer, SchemaOwner,
    SchemaOwnerRegistry,
};
pub use migration_handler::{spawn_dispatcher, HandleOutcome, MigrationEventHandler};

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod web;

// Re-export commonly used types
pub use application::{
    AggregationEngine, AggregationService, ClusterDiscovery, HandleOutcome, MigrationEventHandler,
    MigrationExecutor, SchemaOwner, SchemaOwnerRegistry,
};
pub use domain::{
    AggregationResult, ClusterMap, Envelope, MigrationEnvelope, MigrationError,
    MigrationRequestEvent, ProxyConfigSnapshot, RequestContext,
};
pub use infrastructure::{GatewayConfig, MigrationWorkerConfig};
pub use web::{create_router, GatewayState};

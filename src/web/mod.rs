pub mod handlers;
pub mod proxy;
pub mod routes;

pub use proxy::{ProxyError, ReverseProxy};
pub use routes::{create_router, GatewayState, CONFIGURATION_ROUTE, LOCALIZATION_ROUTE};

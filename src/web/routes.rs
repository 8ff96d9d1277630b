use crate::application::{AggregationEngine, AggregationService, ClusterDiscovery};
use crate::infrastructure::aggregation_cache::AggregationCache;
use crate::infrastructure::config::GatewayConfig;
use crate::infrastructure::http_client::EndpointClient;
use crate::infrastructure::metrics::GatewayMetrics;
use crate::infrastructure::proxy_config::ProxyConfigProvider;
use crate::web::handlers::*;
use crate::web::proxy::ReverseProxy;
use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub const LOCALIZATION_ROUTE: &str = "/api/abp/application-localization";
pub const CONFIGURATION_ROUTE: &str = "/api/abp/application-configuration";

#[derive(Clone)]
pub struct GatewayState {
    pub aggregation: Arc<AggregationService>,
    pub proxy: Arc<ReverseProxy>,
    pub proxy_config: Arc<dyn ProxyConfigProvider>,
    pub metrics: Arc<GatewayMetrics>,
    pub forwarded_headers: Arc<Vec<String>>,
}

impl GatewayState {
    pub fn new(
        config: &GatewayConfig,
        proxy_config: Arc<dyn ProxyConfigProvider>,
        endpoint_client: Arc<dyn EndpointClient>,
        proxy_client: reqwest::Client,
    ) -> Self {
        let metrics = Arc::new(GatewayMetrics::default());
        let engine = AggregationEngine::new(endpoint_client, config.aggregation_timeout)
            .with_cache(AggregationCache::new(config.aggregation_cache.clone()))
            .with_metrics(metrics.clone());
        let aggregation = AggregationService::new(ClusterDiscovery::new(proxy_config.clone()), engine);
        let proxy = ReverseProxy::new(proxy_config.clone(), proxy_client, metrics.clone());

        Self {
            aggregation: Arc::new(aggregation),
            proxy: Arc::new(proxy),
            proxy_config,
            metrics,
            forwarded_headers: Arc::new(config.forwarded_headers.clone()),
        }
    }
}

/// The two aggregated routes are served here; everything else falls through to
/// the reverse proxy.
pub fn create_router(state: GatewayState) -> Router {
    Router::new()
        .route(LOCALIZATION_ROUTE, get(application_localization))
        .route(CONFIGURATION_ROUTE, get(application_configuration))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .fallback(proxy_request)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

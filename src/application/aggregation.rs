use crate::application::cluster_discovery::ClusterDiscovery;
use crate::domain::{
    AggregationError, AggregationRequest, AggregationResult, ClusterMap, EndpointOutcome,
    RequestContext,
};
use crate::infrastructure::aggregation_cache::AggregationCache;
use crate::infrastructure::http_client::EndpointClient;
use crate::infrastructure::metrics::GatewayMetrics;
use futures::future::join_all;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, warn};

pub const LOCALIZATION_PATH: &str = "api/abp/application-localization";
pub const CONFIGURATION_PATH: &str = "api/abp/application-configuration";

/// Calls every endpoint of a request concurrently and merges the results.
/// A failing endpoint only fails its own slot.
pub struct AggregationEngine {
    client: Arc<dyn EndpointClient>,
    timeout: Duration,
    cache: Option<AggregationCache>,
    metrics: Arc<GatewayMetrics>,
}

impl AggregationEngine {
    pub fn new(client: Arc<dyn EndpointClient>, timeout: Duration) -> Self {
        Self {
            client,
            timeout,
            cache: None,
            metrics: Arc::new(GatewayMetrics::default()),
        }
    }

    pub fn with_cache(mut self, cache: AggregationCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<GatewayMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub async fn aggregate(
        &self,
        request: &AggregationRequest,
        context: &RequestContext,
    ) -> AggregationResult {
        self.metrics
            .aggregation_requests
            .fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();

        let slots = request
            .endpoints
            .iter()
            .map(|(key, url)| self.call_slot(key, url, context));
        let entries = join_all(slots).await.into_iter().collect();

        self.metrics.record_aggregation_latency(started.elapsed());
        let result = AggregationResult { entries };
        debug!(
            "Aggregated {} endpoint(s) in {:?}, {} failed",
            result.len(),
            started.elapsed(),
            result.failed_keys().len()
        );
        result
    }

    async fn call_slot(
        &self,
        key: &str,
        url: &str,
        context: &RequestContext,
    ) -> (String, EndpointOutcome) {
        let cache_key = context.cache_key(key);
        if let Some(cached) = self.cache.as_ref().and_then(|cache| cache.get(&cache_key)) {
            self.metrics.cache_hits.fetch_add(1, Ordering::Relaxed);
            return (key.to_string(), EndpointOutcome::Success(cached));
        }

        self.metrics.endpoint_calls.fetch_add(1, Ordering::Relaxed);
        let result = match timeout(self.timeout, self.client.get_json(url, context)).await {
            Ok(result) => result,
            Err(_) => Err(AggregationError::Timeout(self.timeout.as_millis() as u64)),
        };

        let outcome = match result {
            Ok(payload) => {
                if let Some(cache) = &self.cache {
                    cache.insert(cache_key, payload.clone());
                }
                EndpointOutcome::Success(payload)
            }
            Err(e) => {
                self.metrics
                    .endpoint_failures
                    .fetch_add(1, Ordering::Relaxed);
                warn!("Aggregation endpoint {} ({}) failed: {}", key, url, e);
                EndpointOutcome::Failed {
                    error: e.to_string(),
                }
            }
        };
        (key.to_string(), outcome)
    }
}

/// `{address}/{path}?{params}`, tolerating a trailing slash on the address.
pub fn endpoint_url(address: &str, path: &str, params: &[(&str, &str)]) -> String {
    let base = format!("{}/{}", address.trim_end_matches('/'), path);
    match reqwest::Url::parse(&base) {
        Ok(mut url) => {
            if !params.is_empty() {
                url.query_pairs_mut().extend_pairs(params.iter().copied());
            }
            url.to_string()
        }
        Err(_) => {
            let query: Vec<String> = params.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
            if query.is_empty() {
                base
            } else {
                format!("{}?{}", base, query.join("&"))
            }
        }
    }
}

/// One localization request per cluster, keyed `{clusterId}_{cultureName}`.
pub fn localization_request(clusters: &ClusterMap, culture_name: &str) -> AggregationRequest {
    let mut request = AggregationRequest::default();
    for cluster in clusters.iter() {
        request.insert(
            format!("{}_{}", cluster.cluster_id, culture_name),
            endpoint_url(
                &cluster.address,
                LOCALIZATION_PATH,
                &[("cultureName", culture_name), ("onlyDynamics", "false")],
            ),
        );
    }
    request
}

/// One application-configuration request per cluster, keyed
/// `{clusterId}_AppConfig`.
pub fn configuration_request(clusters: &ClusterMap) -> AggregationRequest {
    let mut request = AggregationRequest::default();
    for cluster in clusters.iter() {
        request.insert(
            format!("{}_AppConfig", cluster.cluster_id),
            endpoint_url(
                &cluster.address,
                CONFIGURATION_PATH,
                &[("includeLocalizationResources", "false")],
            ),
        );
    }
    request
}

/// Discovery plus fan-out for the two aggregated gateway routes.
pub struct AggregationService {
    discovery: ClusterDiscovery,
    engine: AggregationEngine,
}

impl AggregationService {
    pub fn new(discovery: ClusterDiscovery, engine: AggregationEngine) -> Self {
        Self { discovery, engine }
    }

    pub async fn localization(&self, context: &RequestContext) -> AggregationResult {
        let clusters = self.discovery.discover();
        let request = localization_request(&clusters, context.culture_or_empty());
        self.engine.aggregate(&request, context).await
    }

    pub async fn configuration(&self, context: &RequestContext) -> AggregationResult {
        let clusters = self.discovery.discover();
        let request = configuration_request(&clusters);
        self.engine.aggregate(&request, context).await
    }
}

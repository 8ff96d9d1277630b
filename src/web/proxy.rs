use crate::domain::ProxyConfigSnapshot;
use crate::infrastructure::metrics::GatewayMetrics;
use crate::infrastructure::proxy_config::ProxyConfigProvider;
use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, HeaderMap, HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

const HOP_BY_HOP: [HeaderName; 7] = [
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("No route matches {0}")]
    NoRoute(String),
    #[error("Cluster {0} has no destinations")]
    NoDestination(String),
    #[error("Failed to read request body: {0}")]
    Body(String),
    #[error("Upstream request failed: {0}")]
    Upstream(String),
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = match &self {
            ProxyError::NoRoute(_) => StatusCode::NOT_FOUND,
            ProxyError::NoDestination(_) => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::Body(_) => StatusCode::BAD_REQUEST,
            ProxyError::Upstream(_) => StatusCode::BAD_GATEWAY,
        };
        (status, self.to_string()).into_response()
    }
}

/// Forwards everything that is not aggregated to a single destination of the
/// cluster owning the longest matching route prefix.
pub struct ReverseProxy {
    config: Arc<dyn ProxyConfigProvider>,
    client: reqwest::Client,
    cursors: DashMap<String, AtomicUsize>,
    metrics: Arc<GatewayMetrics>,
}

impl ReverseProxy {
    pub fn new(
        config: Arc<dyn ProxyConfigProvider>,
        client: reqwest::Client,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        Self {
            config,
            client,
            cursors: DashMap::new(),
            metrics,
        }
    }

    /// Picks the destination address for `path`, rotating round-robin over
    /// the cluster's destinations.
    pub fn select_destination(
        &self,
        snapshot: &ProxyConfigSnapshot,
        path: &str,
    ) -> Result<String, ProxyError> {
        let route = snapshot
            .match_route(path)
            .ok_or_else(|| ProxyError::NoRoute(path.to_string()))?;
        let cluster = snapshot
            .cluster(&route.cluster_id)
            .filter(|cluster| !cluster.destinations.is_empty())
            .ok_or_else(|| ProxyError::NoDestination(route.cluster_id.clone()))?;

        let next = self
            .cursors
            .entry(cluster.cluster_id.clone())
            .or_insert_with(|| AtomicUsize::new(0))
            .fetch_add(1, Ordering::Relaxed);
        let destination = &cluster.destinations[next % cluster.destinations.len()];
        Ok(destination.address.clone())
    }

    pub async fn forward(&self, request: Request) -> Response {
        match self.try_forward(request).await {
            Ok(response) => response,
            Err(e) => {
                match &e {
                    ProxyError::NoRoute(path) => {
                        self.metrics.unmatched_routes.fetch_add(1, Ordering::Relaxed);
                        debug!("No proxy route for {}", path);
                    }
                    other => {
                        self.metrics.proxy_errors.fetch_add(1, Ordering::Relaxed);
                        warn!("Proxy error: {}", other);
                    }
                }
                e.into_response()
            }
        }
    }

    async fn try_forward(&self, request: Request) -> Result<Response, ProxyError> {
        let snapshot = self.config.snapshot();
        let (parts, body) = request.into_parts();
        let address = self.select_destination(&snapshot, parts.uri.path())?;

        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let upstream_url = format!("{}{}", address.trim_end_matches('/'), path_and_query);

        let body = axum::body::to_bytes(body, MAX_BODY_BYTES)
            .await
            .map_err(|e| ProxyError::Body(e.to_string()))?;

        debug!("Proxying {} {} -> {}", parts.method, parts.uri, upstream_url);
        self.metrics.proxied_requests.fetch_add(1, Ordering::Relaxed);

        let upstream = self
            .client
            .request(parts.method, &upstream_url)
            .headers(forwardable(&parts.headers, true))
            .body(body)
            .send()
            .await
            .map_err(|e| ProxyError::Upstream(e.to_string()))?;

        let status = upstream.status();
        let headers = forwardable(upstream.headers(), false);
        let bytes = upstream
            .bytes()
            .await
            .map_err(|e| ProxyError::Upstream(e.to_string()))?;

        let mut response = Response::new(Body::from(bytes));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

fn forwardable(headers: &HeaderMap, outbound: bool) -> HeaderMap {
    let mut forwarded = headers.clone();
    for name in HOP_BY_HOP.iter() {
        forwarded.remove(name);
    }
    // Rewritten by the client for the new body.
    forwarded.remove(header::CONTENT_LENGTH);
    if outbound {
        forwarded.remove(header::HOST);
    }
    forwarded
}

//! Outbound HTTP used by the aggregation fan-out.

use crate::domain::{AggregationError, RequestContext};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Issues a GET and decodes the JSON body.
#[async_trait]
pub trait EndpointClient: Send + Sync {
    async fn get_json(&self, url: &str, context: &RequestContext) -> Result<Value, AggregationError>;
}

#[derive(Clone)]
pub struct ReqwestEndpointClient {
    client: reqwest::Client,
    timeout: Duration,
}

impl Default for ReqwestEndpointClient {
    fn default() -> Self {
        Self::new(DEFAULT_REQUEST_TIMEOUT)
    }
}

impl ReqwestEndpointClient {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client, timeout }
    }

    pub fn inner(&self) -> &reqwest::Client {
        &self.client
    }
}

#[async_trait]
impl EndpointClient for ReqwestEndpointClient {
    async fn get_json(&self, url: &str, context: &RequestContext) -> Result<Value, AggregationError> {
        let mut request = self.client.get(url);
        for (name, value) in &context.forwarded_headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                AggregationError::Timeout(self.timeout.as_millis() as u64)
            } else {
                AggregationError::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AggregationError::Status(status.as_u16()));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| AggregationError::InvalidPayload(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;
    use serde_json::json;

    async fn spawn_backend() -> String {
        let app = Router::new()
            .route("/ok", get(|| async { axum::Json(json!({ "values": { "Hello": "World" } })) }))
            .route("/down", get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "down") }))
            .route("/text", get(|| async { "not json" }));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn maps_responses_to_outcomes() {
        let base = spawn_backend().await;
        let client = ReqwestEndpointClient::default();
        let context = RequestContext::default();

        let ok = client.get_json(&format!("{}/ok", base), &context).await.unwrap();
        assert_eq!(ok["values"]["Hello"], "World");

        let down = client.get_json(&format!("{}/down", base), &context).await;
        assert_eq!(down, Err(AggregationError::Status(503)));

        let text = client.get_json(&format!("{}/text", base), &context).await;
        assert!(matches!(text, Err(AggregationError::InvalidPayload(_))));
    }
}

use async_trait::async_trait;
use serde_json::{json, Value};
use shop_coordinator::application::{AggregationEngine, AggregationService, ClusterDiscovery};
use shop_coordinator::domain::{
    AggregationError, AggregationRequest, ClusterConfig, DestinationConfig, EndpointOutcome,
    ProxyConfigSnapshot, RequestContext,
};
use shop_coordinator::infrastructure::{
    AggregationCache, AggregationCacheConfig, EndpointClient, GatewayMetrics,
    StaticProxyConfigProvider,
};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Answers by URL prefix; anything under `https://slow` never answers in time.
#[derive(Default)]
struct StubClient {
    calls: Mutex<Vec<String>>,
}

impl StubClient {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl EndpointClient for StubClient {
    async fn get_json(&self, url: &str, context: &RequestContext) -> Result<Value, AggregationError> {
        self.calls.lock().unwrap().push(url.to_string());

        if url.starts_with("https://slow") {
            tokio::time::sleep(Duration::from_secs(30)).await;
            return Ok(json!({}));
        }
        if url.starts_with("https://broken") {
            return Err(AggregationError::Status(500));
        }
        let current_user = context
            .forwarded_headers
            .iter()
            .find(|(name, _)| name == "authorization")
            .map(|(_, value)| value.clone());
        Ok(json!({
            "url": url,
            "culture": context.culture_name,
            "currentUser": current_user,
        }))
    }
}

fn snapshot(clusters: &[(&str, &str)]) -> ProxyConfigSnapshot {
    ProxyConfigSnapshot {
        routes: vec![],
        clusters: clusters
            .iter()
            .map(|(id, address)| ClusterConfig {
                cluster_id: id.to_string(),
                destinations: vec![DestinationConfig {
                    destination_id: "destination1".to_string(),
                    address: address.to_string(),
                }],
            })
            .collect(),
    }
}

fn service(
    clusters: &[(&str, &str)],
    client: Arc<StubClient>,
    cache: Option<AggregationCache>,
) -> AggregationService {
    let provider = Arc::new(StaticProxyConfigProvider::new(snapshot(clusters)));
    let mut engine = AggregationEngine::new(client, Duration::from_millis(200));
    if let Some(cache) = cache {
        engine = engine.with_cache(cache);
    }
    AggregationService::new(ClusterDiscovery::new(provider), engine)
}

#[tokio::test]
async fn localization_is_keyed_by_cluster_and_culture() {
    let client = Arc::new(StubClient::default());
    let service = service(
        &[("Administration", "https://a"), ("Identity", "https://b")],
        client.clone(),
        None,
    );

    let result = service
        .localization(&RequestContext::with_culture("en"))
        .await;

    let keys: Vec<&String> = result.entries.keys().collect();
    assert_eq!(keys, vec!["Administration_en", "Identity_en"]);
    assert!(result.failed_keys().is_empty());

    let mut calls = client.calls();
    calls.sort();
    assert_eq!(
        calls,
        vec![
            "https://a/api/abp/application-localization?cultureName=en&onlyDynamics=false",
            "https://b/api/abp/application-localization?cultureName=en&onlyDynamics=false",
        ]
    );
}

#[tokio::test]
async fn configuration_is_keyed_by_cluster() {
    let client = Arc::new(StubClient::default());
    let service = service(
        &[("Administration", "https://a"), ("Catalog", "https://c")],
        client.clone(),
        None,
    );

    let result = service.configuration(&RequestContext::default()).await;

    assert!(result.get("Administration_AppConfig").is_some());
    assert!(result.get("Catalog_AppConfig").is_some());
    assert!(client
        .calls()
        .iter()
        .all(|url| url.ends_with("application-configuration?includeLocalizationResources=false")));
}

#[tokio::test(start_paused = true)]
async fn slow_endpoint_fails_only_its_own_slot() {
    let client = Arc::new(StubClient::default());
    let metrics = Arc::new(GatewayMetrics::default());
    let engine = AggregationEngine::new(client, Duration::from_millis(200)).with_metrics(metrics.clone());

    let mut request = AggregationRequest::default();
    request.insert("A", "https://a/ok");
    request.insert("B", "https://slow/never");

    let result = engine.aggregate(&request, &RequestContext::default()).await;

    assert!(matches!(result.get("A"), Some(EndpointOutcome::Success(_))));
    assert_eq!(
        result.get("B"),
        Some(&EndpointOutcome::Failed {
            error: AggregationError::Timeout(200).to_string()
        })
    );
    assert_eq!(metrics.endpoint_failures.load(Ordering::Relaxed), 1);

    let body = serde_json::to_value(&result).unwrap();
    assert_eq!(body["A"]["url"], "https://a/ok");
    assert!(body["B"]["error"].is_string());
}

#[tokio::test]
async fn empty_configuration_returns_empty_object() {
    let client = Arc::new(StubClient::default());
    let service = service(&[], client.clone(), None);

    let result = service
        .localization(&RequestContext::with_culture("en"))
        .await;

    assert!(result.is_empty());
    assert_eq!(serde_json::to_string(&result).unwrap(), "{}");
    assert!(client.calls().is_empty());
}

#[tokio::test]
async fn shared_addresses_are_called_once() {
    let client = Arc::new(StubClient::default());
    let service = service(
        &[("Administration", "https://a"), ("Saas", "https://a"), ("Identity", "https://b")],
        client.clone(),
        None,
    );

    let result = service.configuration(&RequestContext::default()).await;

    assert_eq!(result.len(), 2);
    assert!(result.get("Saas_AppConfig").is_none());
    assert_eq!(client.calls().len(), 2);
}

#[tokio::test]
async fn cached_successes_skip_the_backend_but_failures_do_not() {
    let client = Arc::new(StubClient::default());
    let service = service(
        &[("Administration", "https://a"), ("Broken", "https://broken")],
        client.clone(),
        Some(AggregationCache::new(AggregationCacheConfig::default())),
    );
    let context = RequestContext::with_culture("en");

    let first = service.localization(&context).await;
    let second = service.localization(&context).await;

    assert_eq!(first, second);
    assert_eq!(second.failed_keys(), vec!["Broken_en"]);

    let calls = client.calls();
    assert_eq!(calls.iter().filter(|u| u.starts_with("https://a")).count(), 1);
    assert_eq!(calls.iter().filter(|u| u.starts_with("https://broken")).count(), 2);
}

fn signed_in(token: &str) -> RequestContext {
    RequestContext {
        culture_name: None,
        forwarded_headers: vec![("authorization".to_string(), token.to_string())],
    }
}

#[tokio::test]
async fn cached_configuration_is_not_shared_between_users() {
    let client = Arc::new(StubClient::default());
    let service = service(
        &[("Administration", "https://a")],
        client.clone(),
        Some(AggregationCache::new(AggregationCacheConfig::default())),
    );

    let alice = service.configuration(&signed_in("Bearer alice")).await;
    let bob = service.configuration(&signed_in("Bearer bob")).await;
    let alice_again = service.configuration(&signed_in("Bearer alice")).await;

    let user = |result: &shop_coordinator::domain::AggregationResult| {
        result
            .get("Administration_AppConfig")
            .and_then(EndpointOutcome::payload)
            .map(|payload| payload["currentUser"].clone())
    };
    assert_eq!(user(&alice), Some(json!("Bearer alice")));
    assert_eq!(user(&bob), Some(json!("Bearer bob")));
    assert_eq!(alice_again, alice);
    assert_eq!(client.calls().len(), 2);
}

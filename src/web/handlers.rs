use crate::domain::{AggregationResult, RequestContext};
use crate::web::routes::GatewayState;
use axum::extract::{Query, Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use tracing::error;

const DEFAULT_CULTURE: &str = "en";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalizationQuery {
    pub culture_name: Option<String>,
}

/// Copies the configured headers from the inbound request.
pub fn request_context(headers: &HeaderMap, forwarded: &[String]) -> RequestContext {
    let forwarded_headers = forwarded
        .iter()
        .filter_map(|name| {
            headers
                .get(name.as_str())
                .and_then(|value| value.to_str().ok())
                .map(|value| (name.clone(), value.to_string()))
        })
        .collect();
    RequestContext {
        culture_name: None,
        forwarded_headers,
    }
}

/// `cultureName` query parameter, else the first `Accept-Language` tag.
fn culture_name(query: LocalizationQuery, headers: &HeaderMap) -> String {
    query
        .culture_name
        .filter(|c| !c.trim().is_empty())
        .or_else(|| {
            headers
                .get(header::ACCEPT_LANGUAGE)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.split(',').next())
                .map(|tag| tag.split(';').next().unwrap_or("").trim().to_string())
                .filter(|tag| !tag.is_empty() && tag != "*")
        })
        .unwrap_or_else(|| DEFAULT_CULTURE.to_string())
}

fn pretty_json(result: &AggregationResult) -> Response {
    match serde_json::to_string_pretty(result) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to serialize aggregation result: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn application_localization(
    State(state): State<GatewayState>,
    Query(query): Query<LocalizationQuery>,
    headers: HeaderMap,
) -> Response {
    let mut context = request_context(&headers, &state.forwarded_headers);
    context.culture_name = Some(culture_name(query, &headers));

    let result = state.aggregation.localization(&context).await;
    pretty_json(&result)
}

pub async fn application_configuration(
    State(state): State<GatewayState>,
    headers: HeaderMap,
) -> Response {
    let context = request_context(&headers, &state.forwarded_headers);

    let result = state.aggregation.configuration(&context).await;
    pretty_json(&result)
}

pub async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}

pub async fn metrics(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    let snapshot = state.proxy_config.snapshot();
    let mut metrics = state.metrics.to_json();
    metrics["proxy_routes"] = snapshot.routes.len().into();
    metrics["proxy_clusters"] = snapshot.clusters.len().into();
    Json(metrics)
}

pub async fn proxy_request(State(state): State<GatewayState>, request: Request) -> Response {
    state.proxy.forward(request).await
}

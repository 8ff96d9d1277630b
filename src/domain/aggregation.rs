use serde::{Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Request-scoped values passed explicitly to the aggregation path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub culture_name: Option<String>,
    /// Headers forwarded verbatim to every backend call.
    pub forwarded_headers: Vec<(String, String)>,
}

impl RequestContext {
    pub fn with_culture(culture_name: impl Into<String>) -> Self {
        Self {
            culture_name: Some(culture_name.into()),
            forwarded_headers: Vec::new(),
        }
    }

    pub fn culture_or_empty(&self) -> &str {
        self.culture_name.as_deref().unwrap_or("")
    }

    /// Cache key for an endpoint payload as seen by this caller. Backends
    /// answer per user and per culture, so every forwarded header is part of it.
    pub fn cache_key(&self, endpoint_key: &str) -> String {
        let mut headers: Vec<String> = self
            .forwarded_headers
            .iter()
            .map(|(name, value)| format!("{}={}", name.to_ascii_lowercase(), value))
            .collect();
        headers.sort();
        format!("{}|{}", endpoint_key, headers.join("|"))
    }
}

/// Endpoints to call, keyed by `"{clusterId}_{suffix}"`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregationRequest {
    pub endpoints: BTreeMap<String, String>,
}

impl AggregationRequest {
    pub fn insert(&mut self, key: impl Into<String>, url: impl Into<String>) {
        self.endpoints.insert(key.into(), url.into());
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EndpointOutcome {
    Success(Value),
    Failed { error: String },
}

impl EndpointOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, EndpointOutcome::Success(_))
    }

    pub fn payload(&self) -> Option<&Value> {
        match self {
            EndpointOutcome::Success(value) => Some(value),
            EndpointOutcome::Failed { .. } => None,
        }
    }
}

impl Serialize for EndpointOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            EndpointOutcome::Success(value) => value.serialize(serializer),
            EndpointOutcome::Failed { error } => {
                serde_json::json!({ "error": error }).serialize(serializer)
            }
        }
    }
}

/// Merged result; serializes as a flat JSON object keyed by endpoint key.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct AggregationResult {
    pub entries: BTreeMap<String, EndpointOutcome>,
}

impl AggregationResult {
    pub fn get(&self, key: &str) -> Option<&EndpointOutcome> {
        self.entries.get(key)
    }

    pub fn failed_keys(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(_, outcome)| !outcome.is_success())
            .map(|(key, _)| key.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Failure of a single backend call. Never escapes the fan-out engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AggregationError {
    #[error("Timed out after {0} ms")]
    Timeout(u64),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Backend returned status {0}")]
    Status(u16),
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cache_key_depends_on_forwarded_headers() {
        let alice = RequestContext {
            culture_name: None,
            forwarded_headers: vec![
                ("authorization".to_string(), "Bearer alice".to_string()),
                ("accept-language".to_string(), "tr".to_string()),
            ],
        };
        let bob = RequestContext {
            culture_name: None,
            forwarded_headers: vec![("authorization".to_string(), "Bearer bob".to_string())],
        };
        let reordered = RequestContext {
            culture_name: None,
            forwarded_headers: alice.forwarded_headers.iter().rev().cloned().collect(),
        };

        assert_ne!(alice.cache_key("Catalog_AppConfig"), bob.cache_key("Catalog_AppConfig"));
        assert_eq!(
            alice.cache_key("Catalog_AppConfig"),
            reordered.cache_key("Catalog_AppConfig")
        );
        assert_ne!(
            RequestContext::default().cache_key("Catalog_AppConfig"),
            RequestContext::default().cache_key("Identity_AppConfig")
        );
    }

    #[test]
    fn result_serializes_flat_with_error_markers() {
        let mut result = AggregationResult::default();
        result
            .entries
            .insert("Catalog_en".to_string(), EndpointOutcome::Success(json!({ "a": 1 })));
        result.entries.insert(
            "Ordering_en".to_string(),
            EndpointOutcome::Failed {
                error: "Backend returned status 503".to_string(),
            },
        );

        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["Catalog_en"], json!({ "a": 1 }));
        assert_eq!(value["Ordering_en"]["error"], "Backend returned status 503");
        assert_eq!(result.failed_keys(), vec!["Ordering_en"]);
    }
}

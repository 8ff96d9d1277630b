use serde::{Deserialize, Serialize};

/// One physical backend instance of a cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct DestinationConfig {
    pub destination_id: String,
    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct ClusterConfig {
    pub cluster_id: String,
    #[serde(default)]
    pub destinations: Vec<DestinationConfig>,
}

/// Maps an inbound path prefix to the cluster that serves it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct RouteConfig {
    pub route_id: String,
    pub cluster_id: String,
    pub path_prefix: String,
}

/// Immutable view of the reverse-proxy configuration at one instant.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct ProxyConfigSnapshot {
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
    #[serde(default)]
    pub clusters: Vec<ClusterConfig>,
}

impl ProxyConfigSnapshot {
    pub fn cluster(&self, cluster_id: &str) -> Option<&ClusterConfig> {
        self.clusters.iter().find(|c| c.cluster_id == cluster_id)
    }

    /// Longest-prefix route match for an inbound path.
    pub fn match_route(&self, path: &str) -> Option<&RouteConfig> {
        self.routes
            .iter()
            .filter(|r| path_has_prefix(path, &r.path_prefix))
            .max_by_key(|r| r.path_prefix.len())
    }
}

fn path_has_prefix(path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return true;
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// A logical service and the one address chosen to represent it.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterDescriptor {
    pub cluster_id: String,
    pub address: String,
}

/// Discovered clusters in configuration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterMap {
    descriptors: Vec<ClusterDescriptor>,
}

impl ClusterMap {
    pub fn new(descriptors: Vec<ClusterDescriptor>) -> Self {
        Self { descriptors }
    }

    pub fn get(&self, cluster_id: &str) -> Option<&str> {
        self.descriptors
            .iter()
            .find(|d| d.cluster_id == cluster_id)
            .map(|d| d.address.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClusterDescriptor> {
        self.descriptors.iter()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

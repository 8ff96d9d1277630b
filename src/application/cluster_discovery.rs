use crate::domain::{ClusterDescriptor, ClusterMap, ProxyConfigSnapshot};
use crate::infrastructure::proxy_config::ProxyConfigProvider;
use std::collections::HashSet;
use std::sync::Arc;

/// Reduces the reverse-proxy configuration to one address per backend.
///
/// Addresses are the identity of a backend: when several clusters point at
/// the same address only the first one (in configuration order) is kept. A
/// cluster with several destinations is represented by its first surviving
/// destination.
#[derive(Clone)]
pub struct ClusterDiscovery {
    provider: Arc<dyn ProxyConfigProvider>,
}

impl ClusterDiscovery {
    pub fn new(provider: Arc<dyn ProxyConfigProvider>) -> Self {
        Self { provider }
    }

    /// Reads one snapshot and resolves it.
    pub fn discover(&self) -> ClusterMap {
        let snapshot = self.provider.snapshot();
        Self::resolve(&snapshot)
    }

    pub fn resolve(snapshot: &ProxyConfigSnapshot) -> ClusterMap {
        let mut seen_addresses = HashSet::new();
        let mut seen_clusters = HashSet::new();
        let mut descriptors = Vec::new();

        let destinations = snapshot.clusters.iter().flat_map(|cluster| {
            cluster
                .destinations
                .iter()
                .map(move |destination| (cluster.cluster_id.as_str(), destination.address.as_str()))
        });

        for (cluster_id, address) in destinations {
            if address.trim().is_empty() {
                continue;
            }
            if !seen_addresses.insert(normalize(address)) {
                continue;
            }
            if !seen_clusters.insert(cluster_id) {
                continue;
            }
            descriptors.push(ClusterDescriptor {
                cluster_id: cluster_id.to_string(),
                address: address.to_string(),
            });
        }

        ClusterMap::new(descriptors)
    }
}

fn normalize(address: &str) -> String {
    address.trim().trim_end_matches('/').to_ascii_lowercase()
}

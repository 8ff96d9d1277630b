use crate::domain::{ClusterConfig, DestinationConfig, ProxyConfigSnapshot, RouteConfig};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ProxyConfigError {
    #[error("Failed to read proxy config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse proxy config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Source of the live reverse-proxy configuration. Callers take one snapshot
/// per request and work only on that snapshot.
pub trait ProxyConfigProvider: Send + Sync {
    fn snapshot(&self) -> Arc<ProxyConfigSnapshot>;
}

/// Holds a snapshot that can be swapped atomically.
#[derive(Debug, Default)]
pub struct StaticProxyConfigProvider {
    current: RwLock<Arc<ProxyConfigSnapshot>>,
}

impl StaticProxyConfigProvider {
    pub fn new(snapshot: ProxyConfigSnapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot)),
        }
    }

    pub fn update(&self, snapshot: ProxyConfigSnapshot) {
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(snapshot);
    }
}

impl ProxyConfigProvider for StaticProxyConfigProvider {
    fn snapshot(&self) -> Arc<ProxyConfigSnapshot> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct YarpDocument {
    reverse_proxy: YarpSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct YarpSection {
    #[serde(default)]
    routes: BTreeMap<String, YarpRoute>,
    #[serde(default)]
    clusters: BTreeMap<String, YarpCluster>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct YarpRoute {
    cluster_id: String,
    #[serde(rename = "Match")]
    route_match: YarpMatch,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct YarpMatch {
    path: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct YarpCluster {
    #[serde(default)]
    destinations: BTreeMap<String, YarpDestination>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct YarpDestination {
    address: String,
}

/// `/api/catalog/{**everything}` -> `/api/catalog`
fn path_prefix(pattern: &str) -> String {
    let literal = pattern.split('{').next().unwrap_or("");
    let trimmed = literal.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Accepts either a YARP-style `{"ReverseProxy": {...}}` document (routes and
/// clusters keyed by id, taken in key order) or a flat snapshot.
pub fn parse_proxy_config(text: &str) -> Result<ProxyConfigSnapshot, ProxyConfigError> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    if value.get("ReverseProxy").is_none() {
        return Ok(serde_json::from_value(value)?);
    }

    let document: YarpDocument = serde_json::from_value(value)?;
    let section = document.reverse_proxy;

    let routes = section
        .routes
        .into_iter()
        .map(|(route_id, route)| RouteConfig {
            route_id,
            cluster_id: route.cluster_id,
            path_prefix: path_prefix(&route.route_match.path),
        })
        .collect();

    let clusters = section
        .clusters
        .into_iter()
        .map(|(cluster_id, cluster)| ClusterConfig {
            cluster_id,
            destinations: cluster
                .destinations
                .into_iter()
                .map(|(destination_id, d)| DestinationConfig {
                    destination_id,
                    address: d.address,
                })
                .collect(),
        })
        .collect();

    Ok(ProxyConfigSnapshot { routes, clusters })
}

/// Proxy configuration loaded from a JSON file and re-read when it changes.
/// A file that fails to parse leaves the previous snapshot in place.
pub struct FileProxyConfigProvider {
    path: PathBuf,
    inner: StaticProxyConfigProvider,
    last_modified: RwLock<Option<SystemTime>>,
}

impl FileProxyConfigProvider {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ProxyConfigError> {
        let provider = Self {
            path: path.as_ref().to_path_buf(),
            inner: StaticProxyConfigProvider::default(),
            last_modified: RwLock::new(None),
        };
        provider.reload()?;
        Ok(provider)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn reload(&self) -> Result<(), ProxyConfigError> {
        let io_error = |source| ProxyConfigError::Io {
            path: self.path.display().to_string(),
            source,
        };
        let modified = std::fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .map_err(io_error)?;
        let text = std::fs::read_to_string(&self.path).map_err(io_error)?;
        let snapshot = parse_proxy_config(&text)?;

        info!(
            "Loaded proxy config from {} ({} routes, {} clusters)",
            self.path.display(),
            snapshot.routes.len(),
            snapshot.clusters.len()
        );
        self.inner.update(snapshot);
        *self.last_modified.write().unwrap_or_else(|e| e.into_inner()) = Some(modified);
        Ok(())
    }

    fn changed_on_disk(&self) -> bool {
        let on_disk = std::fs::metadata(&self.path).and_then(|m| m.modified()).ok();
        let known = *self.last_modified.read().unwrap_or_else(|e| e.into_inner());
        on_disk.is_some() && on_disk != known
    }

    /// Polls the file every `every` until `shutdown` fires.
    pub fn spawn_reloader(
        self: Arc<Self>,
        every: Duration,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(every);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if self.changed_on_disk() {
                            if let Err(e) = self.reload() {
                                warn!("Keeping previous proxy config: {}", e);
                            }
                        }
                    }
                }
            }
        })
    }
}

impl ProxyConfigProvider for FileProxyConfigProvider {
    fn snapshot(&self) -> Arc<ProxyConfigSnapshot> {
        self.inner.snapshot()
    }
}

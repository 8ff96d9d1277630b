use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Components that hold background work implement this so the binaries can
/// drain them in order.
#[async_trait]
pub trait Shutdown: Send + Sync {
    async fn shutdown(&self) -> Result<()>;
}

/// Token cancelled on the first ctrl-c or SIGTERM.
pub fn shutdown_signal() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();

    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Shutdown signal received");
        trigger.cancel();
    });

    token
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            warn!("Failed to install SIGTERM handler: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

pub struct ShutdownManager {
    token: CancellationToken,
    components: Vec<(String, std::sync::Arc<dyn Shutdown>)>,
}

impl ShutdownManager {
    pub fn new(token: CancellationToken) -> Self {
        Self {
            token,
            components: Vec::new(),
        }
    }

    pub fn register(&mut self, name: impl Into<String>, component: std::sync::Arc<dyn Shutdown>) {
        self.components.push((name.into(), component));
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Cancels the token, then shuts components down in registration order.
    pub async fn shutdown_all(&self) {
        self.token.cancel();
        for (name, component) in &self.components {
            match component.shutdown().await {
                Ok(()) => info!("{} stopped", name),
                Err(e) => warn!("{} failed to stop cleanly: {}", name, e),
            }
        }
    }
}

use anyhow::Context;
use shop_coordinator::infrastructure::logging::{init_logging, LoggingConfig};
use shop_coordinator::infrastructure::proxy_config::FileProxyConfigProvider;
use shop_coordinator::infrastructure::shutdown::shutdown_signal;
use shop_coordinator::infrastructure::{GatewayConfig, ReqwestEndpointClient};
use shop_coordinator::web::{create_router, GatewayState};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let _logging = init_logging(LoggingConfig::from_env("shop-gateway.log"))
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {}", e))?;

    let config = GatewayConfig::from_env();
    info!("Starting shop gateway with {:?}", config);

    let shutdown = shutdown_signal();

    let proxy_config = Arc::new(
        FileProxyConfigProvider::load(&config.proxy_config_path)
            .with_context(|| format!("loading {}", config.proxy_config_path))?,
    );
    let reloader = proxy_config
        .clone()
        .spawn_reloader(config.proxy_config_reload_interval, shutdown.clone());

    let proxy_client = reqwest::Client::builder()
        .build()
        .context("building proxy client")?;
    let state = GatewayState::new(
        &config,
        proxy_config,
        Arc::new(ReqwestEndpointClient::new(config.aggregation_timeout)),
        proxy_client,
    );
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Gateway listening on {}", addr);

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
        .await?;

    shutdown.cancel();
    let _ = reloader.await;
    info!("Gateway stopped");
    Ok(())
}

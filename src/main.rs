use anyhow::Result;
use tracing::info;

use quay_gateway::config::ProxyConfig;
use quay_gateway::server;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,quay_gateway=debug")),
        )
        .init();

    info!("Starting quay-gateway v{}", quay_gateway::VERSION);

    // Build the configuration snapshot; a bad environment aborts boot here.
    let config = ProxyConfig::from_env()?;
    for route in &config.routes {
        info!(
            "Route {} -> cluster '{}' ({:?}, strip_prefix={})",
            route.prefix, route.cluster_id, route.kind, route.strip_prefix
        );
    }

    server::run(config).await
}

mod config;
mod context;
mod keeper;
mod metrics;
mod registry;
mod scoring;
mod web;

use std::sync::Arc;
use tracing::info;

use crate::config::Config;
use crate::context::ServiceContext;
use crate::web::server::WebServer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "health_keeper=info".into()),
        )
        .init();

    info!("🩺 health-keeper v{} starting...", env!("CARGO_PKG_VERSION"));

    // Load config
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "health-keeper.toml".to_string());

    let config = Config::load(&config_path)?;
    info!("Config loaded from {}", config_path);

    let ctx = Arc::new(ServiceContext::new(Arc::new(config))?);

    if ctx.start_keeper() {
        info!("🚀 Service started with keeper");
    }

    // Web API runs in the foreground until Ctrl-C
    let web = WebServer::new(ctx.clone());
    web.run(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutdown requested");
    })
    .await?;

    ctx.shutdown().await;
    info!("🩺 health-keeper stopped");
    Ok(())
}

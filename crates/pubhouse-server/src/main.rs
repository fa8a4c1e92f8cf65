//! Pubhouse server binary

use pubhouse_server::{AppState, config::ServerConfig, create_router, error::Result, worker};
use std::net::SocketAddr;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| {
            "pubhouse_server=debug,pubhouse_registry=debug,tower_http=debug".to_string()
        }))
        .init();

    // Load configuration
    let config = ServerConfig::from_env()?;
    info!("Starting Pubhouse Server on {}:{}", config.host, config.port);

    let state = AppState::from_config(config.clone()).await?;
    state.bootstrap_admin().await?;

    let registry = state.registry.clone();
    let _monitor = worker::spawn_job_monitor(registry.jobs());

    // Build router
    let app = create_router(state);

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|_| pubhouse_server::error::ApiError::Config(format!("Invalid HOST value: {}", config.host)))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("Server listening on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    let discarded = registry.jobs().shutdown();
    info!(discarded, "job queue shut down");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
        // Without a signal source, keep serving
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

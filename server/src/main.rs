//! Tally Server binary.

use std::sync::Arc;

use tally_server::config::Config;
use tally_server::remote::HttpSyncApi;
use tally_server::{app, db, AppState};
use tally_session::SyncManager;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "tally_server=debug,tally_session=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!("Starting Tally Server on {}:{}", config.host, config.port);

    // Connect to the property book and run migrations
    let store = db::connect(&config.database_url, 10).await?;

    let remote = HttpSyncApi::new(&config.remote_api_url, config.remote_api_token.clone())?;
    tracing::info!(remote = %config.remote_api_url, "Remote sync API configured");

    let manager = SyncManager::new(Arc::new(remote), Arc::new(store), config.session_config());
    let state = AppState::new(manager.clone());

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    manager.shutdown().await;
    tracing::info!("Server stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    tracing::info!("Shutdown signal received");
}

//! Meter Service - quota ledger and subscription reconciler over HTTP.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use meter_service::{create_router, open_store, AppState, ServiceConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,meter=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Meter Service");

    let config = ServiceConfig::from_env();

    tracing::info!(
        listen_addr = %config.listen_addr,
        store_backend = ?config.store_backend,
        store_timeout = ?config.store_timeout,
        free_tier_limit = config.free_tier_limit,
        service_key_configured = config.service_api_key.is_some(),
        admin_key_configured = config.admin_api_key.is_some(),
        "Service configuration loaded"
    );

    let store = open_store(&config).await?;
    let state = AppState::new(store, config.clone());

    let app = create_router(state);

    tracing::info!(listen_addr = %config.listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

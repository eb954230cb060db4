// Main entry point - Dependency injection and server setup
use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use aggregation_topology::application::aggregation_service::AggregationService;
use aggregation_topology::infrastructure::config::load_app_config;
use aggregation_topology::infrastructure::sensorthings_store::SensorThingsStore;
use aggregation_topology::presentation::app_state::AppState;
use aggregation_topology::presentation::handlers::routes;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Load configuration
    let app_config = load_app_config().context("failed to load config/aggregation")?;

    // Create entity store (infrastructure layer)
    let store = Arc::new(SensorThingsStore::new(app_config.store.url.clone()));

    // Create services (application layer)
    let aggregation_service = AggregationService::new(store, app_config.discovery_options());

    // Create application state
    let state = Arc::new(AppState { aggregation_service });

    // Build router (presentation layer)
    let router = routes(state).layer(TraceLayer::new_for_http());

    // Start server
    let addr: SocketAddr = app_config
        .server
        .bind
        .parse()
        .with_context(|| format!("invalid server.bind {:?}", app_config.server.bind))?;
    tracing::info!(%addr, store = %app_config.store.url, "Starting aggregation-topology service");

    axum::serve(tokio::net::TcpListener::bind(addr).await?, router).await?;

    Ok(())
}

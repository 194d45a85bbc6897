//! Beacon ingestion API binary entrypoint.

use std::net::SocketAddr;
use std::sync::Arc;

use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use beacon_common::config::AppConfig;
use beacon_common::queue::RedisIntakeQueue;
use beacon_common::redis_pool::connect_redis;

use beacon_api::routes::create_router;
use beacon_api::state::AppState;

/// Largest accepted request body.
const MAX_BODY_BYTES: usize = 64 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("beacon_api=debug,tower_http=debug")),
        )
        .init();

    tracing::info!("Starting Beacon ingestion API...");

    // Load configuration
    let config = AppConfig::from_env()?;

    // Create Redis connection
    let (client, redis) = connect_redis(&config.redis_url).await?;
    let intake = Arc::new(RedisIntakeQueue::new(&config.intake_queue, client, redis));

    // Build application state
    let state = AppState::from_config(intake, &config)?;
    if state.allowed_ips.is_empty() {
        tracing::warn!("ALLOWED_IPS is empty, accepting pushes from any address");
    }

    // Build router
    let app = create_router(state)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr: SocketAddr = config.api_bind_addr.parse()?;
    tracing::info!("API server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Received shutdown signal, stopping gracefully...");
    })
    .await?;

    Ok(())
}

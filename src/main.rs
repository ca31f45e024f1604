// Initialize configuration
// Set up logging
// Open the metric store
// Build compute engines and the refresh coordinator
// Start HTTP server, drain background refreshes on shutdown

use metric_refresh_service::{
    api,
    clock::SystemClock,
    config::Config,
    db::{connection, SqliteStore},
    refresh::RefreshCoordinator,
    state::AppState,
    upstream::{HttpJsonEngine, UpstreamRateLimiter},
};

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting metric-refresh-service");

    let config = Config::from_env();
    config.validate()?;
    tracing::info!("Configuration loaded: {:?}", config);

    let db_pool = connection::establish_connection(&config.database_url).await?;
    let store = Arc::new(SqliteStore::new(db_pool));

    let coordinator = RefreshCoordinator::new(config.coordinator.clone(), store)?;

    // One limiter shared by every endpoint: they usually sit behind the same upstream quota
    let limiter = Arc::new(UpstreamRateLimiter::new(
        config.upstream_max_requests,
        config.upstream_window,
        Arc::new(SystemClock),
    ));
    let upstream_timeout = Duration::from_secs(config.upstream_timeout_secs);

    let mut state = AppState::new(config.clone(), coordinator.clone());
    for (metric, url_template) in &config.metric_endpoints {
        let engine = HttpJsonEngine::new(url_template, limiter.clone(), upstream_timeout)?;
        state = state.with_engine(metric, Arc::new(engine));
    }
    if state.engines.is_empty() {
        tracing::warn!("No METRIC_ENDPOINTS configured, every metric request will 404");
    }
    tracing::info!("Serving metrics: {:?}", state.metric_names());

    let app = api::create_router(Arc::new(state));
    let addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
        }
        tracing::info!("Shutdown signal received");
        signal.cancel();
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    coordinator.shutdown().await;
    Ok(())
}

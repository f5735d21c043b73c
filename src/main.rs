// Main entry point - Dependency injection and server setup
mod application;
mod domain;
mod infrastructure;
mod presentation;

use std::{net::SocketAddr, sync::Arc};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crate::application::dashboard_service::DashboardService;
use crate::application::telemetry_source::TelemetrySource;
use crate::domain::location::{Location, sort_locations};
use crate::infrastructure::config::load_dashboard_config;
use crate::infrastructure::http_source::HttpTelemetrySource;
use crate::presentation::app_state::AppState;
use crate::presentation::handlers::router;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = load_dashboard_config()?;

    // Source (infrastructure layer)
    let source = Arc::new(
        HttpTelemetrySource::new(config.backend.base_url.clone(), config.backend.token.clone())
            .with_prediction_polling(
                config.backend.prediction_poll_interval(),
                config.backend.prediction_max_attempts,
            ),
    );

    // The grid is static for the lifetime of the process.
    let mut locations = source.fetch_locations().await?;
    sort_locations(&mut locations);
    tracing::info!(count = locations.len(), "grid loaded");
    let grid: Arc<[Location]> = locations.into();

    // Session (application layer)
    let dashboard = DashboardService::spawn(source, grid.clone(), config.stream.to_dashboard_settings());

    // Open with live data, like a freshly loaded dashboard.
    let initial = dashboard.clone();
    tokio::spawn(async move {
        if let Err(e) = initial.request_live().await {
            tracing::warn!(error = %e, "initial live load failed");
        }
    });

    let state = Arc::new(AppState {
        dashboard,
        grid,
        login_url: config.server.login_url.clone(),
    });

    let app = router(state).layer(TraceLayer::new_for_http());

    let addr: SocketAddr = config.server.bind_address.parse()?;
    tracing::info!(%addr, "starting crowd-dashboard service");

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app).await?;

    Ok(())
}

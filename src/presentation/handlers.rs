// HTTP request handlers
use crate::application::dashboard_service::DashboardError;
use crate::domain::batch::LocationId;
use crate::domain::dashboard::ViewSnapshot;
use crate::domain::navigation::Direction;
use crate::domain::range::HistoryRange;
use crate::infrastructure::chunked_json::stream_from_watch;
use crate::infrastructure::http_response::{accepts_brotli, json_response};
use crate::presentation::app_state::AppState;
use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[derive(Deserialize)]
pub struct SeekBody {
    pub index: usize,
}

#[derive(Deserialize)]
pub struct AnimationBody {
    pub direction: Direction,
    pub interval_ms: Option<u64>,
}

#[derive(Deserialize)]
pub struct DirectionBody {
    pub direction: Direction,
}

#[derive(Deserialize)]
pub struct MeasurementBody {
    pub name: String,
}

#[derive(Deserialize)]
pub struct LocationBody {
    pub id: LocationId,
}

/// Session failure mapped onto an HTTP answer.
pub struct ApiError {
    error: DashboardError,
    login_url: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.error {
            DashboardError::Fetch(e) if e.is_unauthorized() => {
                return Redirect::temporary(&self.login_url).into_response();
            }
            DashboardError::Fetch(_) => StatusCode::BAD_GATEWAY,
            DashboardError::Superseded => StatusCode::CONFLICT,
            DashboardError::SessionClosed => StatusCode::SERVICE_UNAVAILABLE,
        };
        (status, Json(json!({ "error": self.error.to_string() }))).into_response()
    }
}

type CommandResult = Result<Json<ViewSnapshot>, ApiError>;

/// Answer a command with the snapshot it produced.
fn respond(state: &AppState, result: Result<(), DashboardError>) -> CommandResult {
    match result {
        Ok(()) => Ok(Json(state.dashboard.snapshot())),
        Err(error) => {
            tracing::warn!(%error, "dashboard command failed");
            Err(ApiError {
                error,
                login_url: state.login_url.clone(),
            })
        }
    }
}

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "ok"
}

pub async fn list_locations(headers: HeaderMap, State(state): State<Arc<AppState>>) -> Response {
    match json_response(&*state.grid, accepts_brotli(&headers)).await {
        Ok(response) => response,
        Err(status) => status.into_response(),
    }
}

pub async fn current_state(headers: HeaderMap, State(state): State<Arc<AppState>>) -> Response {
    let snapshot = state.dashboard.snapshot();
    match json_response(&snapshot, accepts_brotli(&headers)).await {
        Ok(response) => response,
        Err(status) => status.into_response(),
    }
}

/// Progressive updates: one frame per published snapshot
pub async fn stream_state(headers: HeaderMap, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    stream_from_watch(state.dashboard.subscribe(), accepts_brotli(&headers))
}

pub async fn request_history(
    State(state): State<Arc<AppState>>,
    Json(range): Json<HistoryRange>,
) -> CommandResult {
    let result = state.dashboard.request_history(range).await;
    respond(&state, result)
}

pub async fn request_live(State(state): State<Arc<AppState>>) -> CommandResult {
    let result = state.dashboard.request_live().await;
    respond(&state, result)
}

pub async fn request_prediction(State(state): State<Arc<AppState>>) -> CommandResult {
    let result = state.dashboard.request_prediction().await;
    respond(&state, result)
}

pub async fn seek(State(state): State<Arc<AppState>>, Json(body): Json<SeekBody>) -> CommandResult {
    let result = state.dashboard.seek_to(body.index).await;
    respond(&state, result)
}

pub async fn start_animation(
    State(state): State<Arc<AppState>>,
    Json(body): Json<AnimationBody>,
) -> CommandResult {
    let interval = body.interval_ms.map(Duration::from_millis);
    let result = state.dashboard.start_animation(body.direction, interval).await;
    respond(&state, result)
}

pub async fn stop_animation(State(state): State<Arc<AppState>>) -> CommandResult {
    let result = state.dashboard.stop_animation().await;
    respond(&state, result)
}

pub async fn critical_point(
    State(state): State<Arc<AppState>>,
    Json(body): Json<DirectionBody>,
) -> CommandResult {
    let result = state.dashboard.select_critical_point(body.direction).await;
    respond(&state, result)
}

pub async fn select_measurement(
    State(state): State<Arc<AppState>>,
    Json(body): Json<MeasurementBody>,
) -> CommandResult {
    let result = state.dashboard.select_measurement(body.name).await;
    respond(&state, result)
}

pub async fn toggle_location(
    State(state): State<Arc<AppState>>,
    Json(body): Json<LocationBody>,
) -> CommandResult {
    let result = state.dashboard.toggle_location(body.id).await;
    respond(&state, result)
}

pub async fn clear_locations(State(state): State<Arc<AppState>>) -> CommandResult {
    let result = state.dashboard.clear_selection().await;
    respond(&state, result)
}

pub fn router(state: Arc<AppState>) -> Router {
    // Compression is handled in the response builders; no CompressionLayer.
    Router::new()
        .route("/healthz", get(health_check))
        .route("/locations", get(list_locations))
        .route("/state", get(current_state))
        .route("/state/stream", get(stream_state))
        .route("/commands/history", post(request_history))
        .route("/commands/live", post(request_live))
        .route("/commands/prediction", post(request_prediction))
        .route("/commands/seek", post(seek))
        .route("/commands/animation/start", post(start_animation))
        .route("/commands/animation/stop", post(stop_animation))
        .route("/commands/critical-point", post(critical_point))
        .route("/commands/measurement", post(select_measurement))
        .route("/commands/locations/toggle", post(toggle_location))
        .route("/commands/locations/clear", post(clear_locations))
        .with_state(state)
}

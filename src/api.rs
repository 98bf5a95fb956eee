use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::catalog::Track;
use crate::engine::{EngineError, ShowControl};

#[derive(Clone)]
pub struct AppState {
    pub version: String,
    pub engine: Arc<ShowControl>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(|| async { "OK" }))
        .route("/api/v1/tracks", get(api_tracks))
        .route("/api/v1/play", post(api_play))
        .route("/api/v1/schedule", post(api_schedule))
        .route("/api/v1/upcoming", get(api_upcoming))
        .route("/api/v1/transport/state", get(api_transport_state))
        .route("/api/v1/transport/pause", post(api_transport_pause))
        .route("/api/v1/transport/resume", post(api_transport_resume))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Root endpoint: the control panel UI lives behind a reverse proxy; the
/// engine itself only speaks JSON.
async fn root(State(state): State<AppState>) -> String {
    format!("showrunner engine v{} is running. Try /api/v1/upcoming", state.version)
}

async fn api_tracks(State(state): State<AppState>) -> Json<Vec<Track>> {
    let mut tracks: Vec<Track> = state.engine.catalog().all().cloned().collect();
    tracks.sort_by_key(|t| t.audio_index);
    Json(tracks)
}

#[derive(Deserialize)]
struct PlayReq {
    track_id: String,
}

async fn api_play(
    State(state): State<AppState>,
    Json(req): Json<PlayReq>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    // A manual play always overrides the standing schedule.
    match state.engine.play_track(&req.track_id, true).await {
        Ok(()) => Ok(Json(json!({"ok": true, "track_id": req.track_id}))),
        Err(EngineError::UnknownTrack(_)) => Err(StatusCode::NOT_FOUND),
    }
}

#[derive(Deserialize)]
struct ScheduleReq {
    track_id: String,
    #[serde(default = "default_after_seconds")]
    after_seconds: u64,
}

fn default_after_seconds() -> u64 {
    10
}

async fn api_schedule(
    State(state): State<AppState>,
    Json(req): Json<ScheduleReq>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    match state.engine.schedule_one_shot(&req.track_id, req.after_seconds).await {
        Ok(at) => Ok(Json(json!({
            "ok": true,
            "track_id": req.track_id,
            "fires_at": at.to_rfc3339(),
        }))),
        Err(EngineError::UnknownTrack(_)) => Err(StatusCode::NOT_FOUND),
    }
}

#[derive(Deserialize)]
struct UpcomingParams {
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    20
}

async fn api_upcoming(
    State(state): State<AppState>,
    Query(params): Query<UpcomingParams>,
) -> Json<Vec<serde_json::Value>> {
    let upcoming = state
        .engine
        .upcoming(params.limit)
        .await
        .into_iter()
        .map(|(at, title)| json!({"time": at.format("%H:%M").to_string(), "title": title}))
        .collect();
    Json(upcoming)
}

async fn api_transport_state(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({"state": state.engine.state().await}))
}

async fn api_transport_pause(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.engine.pause().await;
    Json(json!({"ok": true}))
}

async fn api_transport_resume(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.engine.resume().await;
    Json(json!({"ok": true}))
}

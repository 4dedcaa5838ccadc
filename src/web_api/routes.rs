//! API Routes

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::Error;
use crate::models::ApiResponse;
use crate::recorder::types::{Quality, RecorderConfig};
use crate::state::AppState;

/// Create API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health & Status
        .route("/healthz", get(super::health_check))
        .route("/api/status", get(super::device_status))
        // Recordings
        .route("/api/recordings", get(list_recordings))
        .route("/api/recordings/active", get(list_active_sessions))
        .route("/api/recordings/recent", get(list_recent_sessions))
        .route("/api/recordings/manual", post(start_manual_recording))
        .route("/api/recordings/storage", get(get_storage_report))
        .route("/api/recordings/:session_id", delete(stop_recording))
        // Devices
        .route("/api/recordings/devices", get(list_device_statuses))
        .route(
            "/api/recordings/devices/:device_id/resume",
            post(resume_device),
        )
        // Settings
        .route("/api/settings/recording", get(get_recording_config))
        .route("/api/settings/recording", put(update_recording_config))
        .with_state(state)
}

// ========================================
// Recording Handlers
// ========================================

#[derive(Debug, Deserialize)]
struct ListQuery {
    limit: Option<u32>,
}

async fn list_recordings(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, Error> {
    let limit = query.limit.unwrap_or(100).min(1000);
    let recordings = state.recorder.recent_recordings(limit).await?;
    Ok(Json(ApiResponse::success(recordings)))
}

async fn list_active_sessions(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(state.recorder.active_sessions()))
}

async fn list_recent_sessions(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(state.recorder.recent_terminal()))
}

#[derive(Debug, Deserialize)]
struct ManualRecordingRequest {
    device_id: String,
    duration_sec: u32,
    quality: Option<Quality>,
}

async fn start_manual_recording(
    State(state): State<AppState>,
    Json(request): Json<ManualRecordingRequest>,
) -> Result<impl IntoResponse, Error> {
    let quality = request
        .quality
        .unwrap_or_else(|| state.recorder.current_config().quality);
    let snapshot = state
        .recorder
        .start_manual(&request.device_id, request.duration_sec, quality)
        .await?;
    Ok(Json(ApiResponse::success(snapshot)))
}

async fn stop_recording(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, Error> {
    let session_id = Uuid::parse_str(&session_id)
        .map_err(|_| Error::Validation(format!("Invalid session id: {}", session_id)))?;
    state.recorder.stop_session(session_id)?;
    Ok(Json(ApiResponse::success(serde_json::json!({
        "session_id": session_id,
        "stop_requested": true
    }))))
}

async fn get_storage_report(State(state): State<AppState>) -> Result<impl IntoResponse, Error> {
    let report = state.recorder.storage_report().await?;
    Ok(Json(ApiResponse::success(report)))
}

// ========================================
// Device Handlers
// ========================================

async fn list_device_statuses(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(state.recorder.device_statuses()))
}

async fn resume_device(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Result<impl IntoResponse, Error> {
    state.recorder.resume_device(&device_id)?;
    Ok(Json(ApiResponse::success(serde_json::json!({
        "device_id": device_id,
        "resumed": true
    }))))
}

// ========================================
// Settings Handlers
// ========================================

async fn get_recording_config(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(state.recorder.current_config()))
}

async fn update_recording_config(
    State(state): State<AppState>,
    Json(config): Json<RecorderConfig>,
) -> Result<impl IntoResponse, Error> {
    let result = state.recorder.apply_config(config).await?;
    Ok(Json(ApiResponse::success(result)))
}

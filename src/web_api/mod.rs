//! WebAPI - REST API Endpoints
//!
//! ## Responsibilities
//!
//! - HTTP API routes
//! - Request validation
//! - Response formatting

mod routes;

pub use routes::create_router;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::models::HealthResponse;
use crate::state::AppState;

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let db_connected = sqlx::query("SELECT 1")
        .fetch_one(&state.pool)
        .await
        .is_ok();

    // A bare binary name resolves via PATH at spawn time, so only absolute
    // paths can be checked here
    let encoder_bin = std::path::Path::new(&state.config.encoder_bin);
    let encoder_available = if encoder_bin.is_absolute() {
        tokio::fs::metadata(encoder_bin).await.is_ok()
    } else {
        true
    };

    let response = HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        db_connected,
        encoder_available,
        active_sessions: state.recorder.active_count(),
    };

    Json(response)
}

/// Status endpoint (araneaDevices common)
pub async fn device_status(State(_state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "device_type": "ar-is23",
        "firmware_version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    }))
}

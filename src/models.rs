//! Shared data models

use serde::{Deserialize, Serialize};

/// API response wrapper
///
/// Error responses are built by `Error::into_response`, so the success
/// envelope only ever carries data.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
        }
    }
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub db_connected: bool,
    pub encoder_available: bool,
    pub active_sessions: usize,
}

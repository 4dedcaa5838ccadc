//! Error handling for IS23 Recserver

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Device busy (active recording session exists)
    #[error("Device {0} already has an active recording session")]
    DeviceBusy(String),

    /// Device cannot be resolved to connection attributes
    #[error("Device unresolvable: {0}")]
    DeviceUnresolvable(String),

    /// Encoder process error
    #[error("Encoder error: {0}")]
    Encoder(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// SQLx database error
    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self {
            Error::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            Error::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            Error::DeviceBusy(device_id) => (
                StatusCode::CONFLICT,
                "DEVICE_BUSY",
                format!("Device {} already has an active recording session", device_id),
            ),
            Error::DeviceUnresolvable(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "DEVICE_UNRESOLVABLE",
                msg.clone(),
            ),
            Error::Encoder(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "ENCODER_ERROR",
                msg.clone(),
            ),
            Error::Database(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                msg.clone(),
            ),
            Error::Serialization(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "SERIALIZATION_ERROR",
                e.to_string(),
            ),
            Error::Sqlx(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                e.to_string(),
            ),
        };

        let body = Json(json!({
            "ok": false,
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

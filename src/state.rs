//! Application state
//!
//! Holds all shared components and state

use sqlx::MySqlPool;
use std::path::PathBuf;
use std::sync::Arc;

use crate::recorder::types::RecorderOptions;
use crate::recorder::RecorderService;

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Database URL
    pub database_url: String,
    /// Server port
    pub port: u16,
    /// Server host
    pub host: String,
    /// Root directory for recording artifacts
    pub recordings_dir: PathBuf,
    /// Encoder binary (ffmpeg)
    pub encoder_bin: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "mysql://root:mijeos12345@@localhost/camserver".to_string()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8081),
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            recordings_dir: std::env::var("RECORDINGS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/var/lib/is23/recordings")),
            encoder_bin: std::env::var("ENCODER_BIN").unwrap_or_else(|_| "ffmpeg".to_string()),
        }
    }
}

impl AppConfig {
    /// Recorder tunables derived from this config
    pub fn recorder_options(&self) -> RecorderOptions {
        RecorderOptions {
            encoder_bin: self.encoder_bin.clone(),
            recordings_dir: self.recordings_dir.clone(),
            ..RecorderOptions::default()
        }
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database pool
    pub pool: MySqlPool,
    /// Application config
    pub config: AppConfig,
    /// RecorderService (recording orchestration)
    pub recorder: Arc<RecorderService>,
}

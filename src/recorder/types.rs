//! Recorder data types
//!
//! Session state machine states, failure taxonomy, and the recording
//! configuration value object.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

/// Recording session lifecycle state
///
/// A session moves strictly forward and ends in exactly one of
/// `Completed` / `Failed`. Terminal states are never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Encoder spawned, waiting for liveness confirmation
    Starting,
    /// Encoder confirmed alive, chunk is being captured
    Recording,
    /// Graceful stop requested, waiting for process exit
    Stopping,
    /// Process exited, verifying artifact and persisting metadata
    Finalizing,
    /// Artifact verified, metadata persisted
    Completed,
    /// See the attached [`FailureKind`]
    Failed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Starting => "starting",
            SessionState::Recording => "recording",
            SessionState::Stopping => "stopping",
            SessionState::Finalizing => "finalizing",
            SessionState::Completed => "completed",
            SessionState::Failed => "failed",
        }
    }
}

/// What created the session, and whether exit triggers rotation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingKind {
    /// Part of a continuous lineage, rotated by the chunk scheduler
    Continuous,
    /// One-shot recording started by an operator
    Manual,
    /// One-shot recording started by a motion event
    MotionTriggered,
}

impl RecordingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordingKind::Continuous => "continuous",
            RecordingKind::Manual => "manual",
            RecordingKind::MotionTriggered => "motion_triggered",
        }
    }
}

/// Session failure taxonomy
///
/// Failures are data recorded against a session, not transport errors.
/// `EmptyArtifact` is the dominant real-world case (transient network loss
/// to the camera while the encoder keeps running or exits early).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Process could not be spawned (missing binary, malformed source)
    LaunchFailure,
    /// No liveness confirmation within the startup window
    LaunchTimeout,
    /// Process exited but the output file is absent or zero bytes
    EmptyArtifact,
    /// Metadata write still failed after retries
    MetadataPersistFailure,
    /// Device directory has no record or no usable stream URL
    DeviceUnresolvable,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::LaunchFailure => "launch_failure",
            FailureKind::LaunchTimeout => "launch_timeout",
            FailureKind::EmptyArtifact => "empty_artifact",
            FailureKind::MetadataPersistFailure => "metadata_persist_failure",
            FailureKind::DeviceUnresolvable => "device_unresolvable",
        }
    }
}

/// Recording quality preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Low,
    Medium,
    High,
}

impl Default for Quality {
    fn default() -> Self {
        Self::Medium
    }
}

/// Recording configuration (SSoT value object)
///
/// Replaced wholesale by the settings reconciler on every update request,
/// never mutated in place. Persisted in the `settings` table as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecorderConfig {
    pub enabled: bool,
    pub chunk_duration_sec: u32,
    pub quality: Quality,
    pub max_storage_bytes: u64,
    pub retention_days: u32,
    pub enabled_devices: BTreeSet<String>,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            chunk_duration_sec: 600,
            quality: Quality::Medium,
            max_storage_bytes: 50 * 1024 * 1024 * 1024,
            retention_days: 14,
            enabled_devices: BTreeSet::new(),
        }
    }
}

impl RecorderConfig {
    /// Validate the configuration. Invalid configs are rejected
    /// synchronously at apply() time and never partially applied.
    pub fn validate(&self) -> crate::Result<()> {
        if self.chunk_duration_sec == 0 {
            return Err(crate::Error::Validation(
                "chunk_duration_sec must be > 0".to_string(),
            ));
        }
        if self.chunk_duration_sec > 24 * 3600 {
            return Err(crate::Error::Validation(
                "chunk_duration_sec must be at most 86400".to_string(),
            ));
        }
        if self.retention_days == 0 {
            return Err(crate::Error::Validation(
                "retention_days must be > 0".to_string(),
            ));
        }
        for device_id in &self.enabled_devices {
            if device_id.is_empty() || device_id.len() > 64 {
                return Err(crate::Error::Validation(
                    "device ids must be 1-64 characters".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Point-in-time view of one recording session
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub session_id: Uuid,
    pub device_id: String,
    pub kind: RecordingKind,
    /// Position within the continuous lineage; 0 for manual recordings
    pub chunk_index: u32,
    pub state: SessionState,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub planned_duration_sec: u32,
    pub artifact_path: PathBuf,
    pub size_bytes: Option<u64>,
    pub failure: Option<FailureKind>,
}

/// Per-device recording health, surfaced so operators can distinguish
/// "healthy", "actively retrying" and "paused after repeated failure"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceHealth {
    Healthy,
    Retrying,
    Paused,
}

/// Per-device scheduling status for the reporting API
#[derive(Debug, Clone, Serialize)]
pub struct DeviceStatus {
    pub device_id: String,
    pub scheduled: bool,
    pub recording: bool,
    pub health: DeviceHealth,
    pub failure_streak: u32,
    pub last_failure: Option<FailureKind>,
}

/// Result of one reconciliation pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileResult {
    pub started: Vec<String>,
    pub stopped: Vec<String>,
    pub restarted: Vec<String>,
    pub unchanged: usize,
    /// False when the config could not be persisted after the stop/start
    /// requests were issued (live state is still reconciled)
    pub persisted: bool,
}

/// Recorder tunables, loaded once at startup from AppConfig
#[derive(Debug, Clone)]
pub struct RecorderOptions {
    /// Encoder binary (ffmpeg)
    pub encoder_bin: String,
    /// Root directory for recording artifacts
    pub recordings_dir: PathBuf,
    /// Startup window for the encoder liveness confirmation
    pub launch_confirm_timeout: Duration,
    /// Grace window between the graceful stop request and the forceful kill
    pub stop_grace: Duration,
    /// Extra slack past the planned duration before the watchdog issues
    /// a stop (the chunk cutoff is enforced by the encoder itself)
    pub duration_watchdog_margin: Duration,
    /// Bounded wait for a supervisor to drain when a device is disabled
    pub stop_wait: Duration,
    /// Consecutive failures before a device is paused
    pub failure_streak_threshold: u32,
    /// Retry backoff after a failed chunk (doubled per consecutive failure)
    pub backoff_base: Duration,
    /// Backoff upper bound
    pub backoff_cap: Duration,
    /// How long terminal sessions stay visible in the registry
    pub terminal_retention: Duration,
}

impl Default for RecorderOptions {
    fn default() -> Self {
        Self {
            encoder_bin: "ffmpeg".to_string(),
            recordings_dir: PathBuf::from("/var/lib/is23/recordings"),
            launch_confirm_timeout: Duration::from_secs(8),
            stop_grace: Duration::from_secs(5),
            duration_watchdog_margin: Duration::from_secs(10),
            stop_wait: Duration::from_secs(15),
            failure_streak_threshold: 3,
            backoff_base: Duration::from_secs(2),
            backoff_cap: Duration::from_secs(60),
            terminal_retention: Duration::from_secs(300),
        }
    }
}

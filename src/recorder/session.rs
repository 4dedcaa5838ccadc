//! RecordingSession - one time-boxed chunk for one device
//!
//! State machine: Starting -> Recording -> {Stopping, Finalizing} ->
//! {Completed, Failed}. The chunk cutoff is enforced by the encoder itself
//! (`-t`); the session only steps in with a graceful stop when the process
//! overruns, a stop is requested, or the device is reconfigured away.
//!
//! Failures stay local to the session: they are classified, recorded
//! against its metadata, and surfaced through the terminal snapshot. They
//! never propagate to other devices or to the reconciler.

use std::process::ExitStatus;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use tokio::fs;
use tokio::sync::watch;
use tokio::time::timeout;
use uuid::Uuid;

use crate::device_directory::DeviceDirectory;
use crate::encoder::{EncoderHandle, EncoderSpec, StartOutcome};
use crate::metadata::{MetadataRecorder, SessionEndRecord};
use crate::recorder::registry::{SessionRegistry, SessionSlot};
use crate::recorder::types::{
    FailureKind, Quality, RecorderOptions, RecordingKind, SessionSnapshot, SessionState,
};

/// Metadata persistence retry schedule (500ms, 1000ms between attempts)
const METADATA_RETRY_ATTEMPTS: u32 = 3;
const METADATA_RETRY_BASE: Duration = Duration::from_millis(500);

/// Everything a session needs besides its own request
#[derive(Clone)]
pub struct SessionDeps {
    pub registry: Arc<SessionRegistry>,
    pub devices: Arc<dyn DeviceDirectory>,
    pub metadata: Arc<dyn MetadataRecorder>,
    pub opts: Arc<RecorderOptions>,
}

/// Parameters for one chunk
#[derive(Debug, Clone)]
pub struct ChunkRequest {
    pub device_id: String,
    pub kind: RecordingKind,
    pub chunk_index: u32,
    pub duration_sec: u32,
    pub quality: Quality,
}

/// Terminal result of one session
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub snapshot: SessionSnapshot,
}

impl SessionOutcome {
    pub fn is_completed(&self) -> bool {
        self.snapshot.state == SessionState::Completed
    }

    pub fn failure(&self) -> Option<FailureKind> {
        self.snapshot.failure
    }
}

/// A session that holds its registry slot but has not launched yet
///
/// Splitting prepare from run lets callers hand the initial snapshot back
/// to the API before the chunk starts doing real work.
pub struct PreparedSession {
    deps: SessionDeps,
    info: Arc<RwLock<SessionSnapshot>>,
    stop_rx: watch::Receiver<bool>,
    slot: SessionSlot,
    quality: Quality,
}

impl PreparedSession {
    /// Reserve the device slot and build the initial snapshot
    ///
    /// Returns `None` when the device already has a non-terminal session
    /// (the single-flight invariant).
    pub fn prepare(deps: SessionDeps, request: ChunkRequest) -> Option<PreparedSession> {
        let started_at = Utc::now();
        let artifact_path = deps
            .opts
            .recordings_dir
            .join(&request.device_id)
            .join(format!(
                "{}_{:05}.mp4",
                started_at.format("%Y%m%d_%H%M%S"),
                request.chunk_index
            ));

        let info = Arc::new(RwLock::new(SessionSnapshot {
            session_id: Uuid::new_v4(),
            device_id: request.device_id.clone(),
            kind: request.kind,
            chunk_index: request.chunk_index,
            state: SessionState::Starting,
            started_at,
            ended_at: None,
            planned_duration_sec: request.duration_sec,
            artifact_path,
            size_bytes: None,
            failure: None,
        }));

        let (stop_tx, stop_rx) = watch::channel(false);
        let slot = deps.registry.try_acquire(info.clone(), stop_tx)?;

        Some(PreparedSession {
            deps,
            info,
            stop_rx,
            slot,
            quality: request.quality,
        })
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.info.read().unwrap().clone()
    }

    fn set_state(&self, state: SessionState) {
        let mut info = self.info.write().unwrap();
        info.state = state;
        tracing::debug!(
            camera_id = %info.device_id,
            session_id = %info.session_id,
            state = state.as_str(),
            "Session state changed"
        );
    }

    /// Drive the session to a terminal state
    pub async fn run(self) -> SessionOutcome {
        let snapshot = self.snapshot();

        // Every session gets a start row; a failing metadata store must not
        // stall recording, so this is best effort
        if let Err(e) = self.deps.metadata.record_session_start(&snapshot).await {
            tracing::error!(
                camera_id = %snapshot.device_id,
                session_id = %snapshot.session_id,
                error = %e,
                "Failed to persist session start"
            );
        }

        // Resolve connection attributes
        let conn = match self.deps.devices.resolve_device(&snapshot.device_id).await {
            Ok(Some(conn)) => conn,
            Ok(None) => {
                tracing::warn!(
                    camera_id = %snapshot.device_id,
                    "Device not resolvable, session failed"
                );
                return self.finalize(None, Some(FailureKind::DeviceUnresolvable)).await;
            }
            Err(e) => {
                tracing::error!(
                    camera_id = %snapshot.device_id,
                    error = %e,
                    "Device directory lookup failed"
                );
                return self.finalize(None, Some(FailureKind::DeviceUnresolvable)).await;
            }
        };

        // Artifact directory must exist before launch
        if let Some(parent) = snapshot.artifact_path.parent() {
            if let Err(e) = fs::create_dir_all(parent).await {
                tracing::error!(
                    camera_id = %snapshot.device_id,
                    path = %parent.display(),
                    error = %e,
                    "Recording directory not writable"
                );
                return self.finalize(None, Some(FailureKind::LaunchFailure)).await;
            }
        }

        let spec = EncoderSpec {
            source_url: conn.source_url,
            username: conn.username,
            password: conn.password,
            output_path: snapshot.artifact_path.clone(),
            duration_sec: snapshot.planned_duration_sec,
            // Quality is frozen into the launch spec; a running session's
            // parameters are never mutated in place
            quality: self.quality,
        };

        let mut encoder = match EncoderHandle::launch(&self.deps.opts.encoder_bin, &spec) {
            Ok(encoder) => encoder,
            Err(e) => {
                tracing::warn!(
                    camera_id = %snapshot.device_id,
                    error = %e,
                    "Encoder launch failed"
                );
                return self.finalize(None, Some(FailureKind::LaunchFailure)).await;
            }
        };

        // Startup confirmation
        match encoder
            .wait_started(self.deps.opts.launch_confirm_timeout)
            .await
        {
            StartOutcome::Confirmed => {
                self.set_state(SessionState::Recording);
                tracing::info!(
                    camera_id = %snapshot.device_id,
                    session_id = %snapshot.session_id,
                    chunk_index = snapshot.chunk_index,
                    pid = encoder.pid(),
                    "Recording chunk started"
                );
            }
            StartOutcome::Exited(status) => {
                // Exited on its own before confirming; the artifact check
                // decides whether anything useful was written
                tracing::warn!(
                    camera_id = %snapshot.device_id,
                    exit_code = status.code(),
                    "Encoder exited during startup"
                );
                return self.finalize(Some(status), None).await;
            }
            StartOutcome::TimedOut => {
                tracing::warn!(
                    camera_id = %snapshot.device_id,
                    timeout_ms = self.deps.opts.launch_confirm_timeout.as_millis() as u64,
                    "No liveness confirmation within startup window"
                );
                // Drain-then-stop even for a process that never confirmed
                let status = self.stop_process(&mut encoder).await;
                return self.finalize(status, Some(FailureKind::LaunchTimeout)).await;
            }
        }

        // Recording: wait for self-exit, a stop request, or the duration
        // watchdog (planned duration + margin, for encoders that ignore -t)
        let watchdog = Duration::from_secs(u64::from(snapshot.planned_duration_sec))
            + self.deps.opts.duration_watchdog_margin;
        let mut stop_rx = self.stop_rx.clone();

        let status = tokio::select! {
            status = encoder.wait() => {
                tracing::debug!(
                    camera_id = %snapshot.device_id,
                    exit_code = status.as_ref().ok().and_then(|s| s.code()),
                    "Encoder exited at chunk boundary"
                );
                status.ok()
            }
            // A closed channel can only happen during teardown; treat it
            // like a stop request
            _ = async { stop_rx.wait_for(|stop| *stop).await.map(|_| ()) } => {
                tracing::info!(
                    camera_id = %snapshot.device_id,
                    session_id = %snapshot.session_id,
                    "Stop requested, draining session"
                );
                self.stop_process(&mut encoder).await
            }
            _ = tokio::time::sleep(watchdog) => {
                tracing::warn!(
                    camera_id = %snapshot.device_id,
                    planned_duration_sec = snapshot.planned_duration_sec,
                    "Encoder overran planned duration, stopping"
                );
                self.stop_process(&mut encoder).await
            }
        };

        self.finalize(status, None).await
    }

    /// Graceful stop, escalating to a forceful kill after the grace window
    async fn stop_process(&self, encoder: &mut EncoderHandle) -> Option<ExitStatus> {
        self.set_state(SessionState::Stopping);
        encoder.request_graceful_stop().await;

        match timeout(self.deps.opts.stop_grace, encoder.wait()).await {
            Ok(Ok(status)) => Some(status),
            _ => {
                tracing::warn!(
                    grace_ms = self.deps.opts.stop_grace.as_millis() as u64,
                    "Graceful stop expired, killing encoder"
                );
                encoder.force_stop();
                match timeout(Duration::from_secs(2), encoder.wait()).await {
                    Ok(Ok(status)) => Some(status),
                    _ => None,
                }
            }
        }
    }

    /// Verify the artifact, persist metadata, release the slot
    async fn finalize(
        self,
        exit_status: Option<ExitStatus>,
        forced_failure: Option<FailureKind>,
    ) -> SessionOutcome {
        self.set_state(SessionState::Finalizing);

        let artifact_path = self.info.read().unwrap().artifact_path.clone();
        let size_bytes = fs::metadata(&artifact_path)
            .await
            .map(|m| m.len())
            .unwrap_or(0);

        // Zero-byte detection is authoritative: a nonzero exit with a valid
        // partial file is still a usable chunk, and some encoders exit 0
        // while producing nothing
        let mut failure = forced_failure.or(if size_bytes == 0 {
            Some(FailureKind::EmptyArtifact)
        } else {
            None
        });

        let ended_at = Utc::now();
        let (session_id, device_id, started_at) = {
            let info = self.info.read().unwrap();
            (info.session_id, info.device_id.clone(), info.started_at)
        };
        let duration_sec = (ended_at - started_at).num_seconds().max(0) as u32;

        let end = SessionEndRecord {
            ended_at,
            size_bytes,
            duration_sec,
            status: if failure.is_some() {
                "failed".to_string()
            } else {
                "completed".to_string()
            },
            failure,
        };

        if !self.persist_end(session_id, &end).await {
            failure = failure.or(Some(FailureKind::MetadataPersistFailure));
        }

        let terminal = {
            let mut info = self.info.write().unwrap();
            info.state = if failure.is_some() {
                SessionState::Failed
            } else {
                SessionState::Completed
            };
            info.ended_at = Some(ended_at);
            info.size_bytes = Some(size_bytes);
            info.failure = failure;
            info.clone()
        };

        match failure {
            None => tracing::info!(
                camera_id = %device_id,
                session_id = %session_id,
                size_bytes = size_bytes,
                duration_sec = duration_sec,
                exit_code = exit_status.and_then(|s| s.code()),
                "Recording chunk completed"
            ),
            Some(kind) => tracing::warn!(
                camera_id = %device_id,
                session_id = %session_id,
                failure = kind.as_str(),
                size_bytes = size_bytes,
                exit_code = exit_status.and_then(|s| s.code()),
                "Recording chunk failed"
            ),
        }

        self.slot.release(terminal.clone());

        SessionOutcome { snapshot: terminal }
    }

    /// Persist the end record with bounded retries; metadata failures are
    /// recorded, never allowed to stall the scheduler
    async fn persist_end(&self, session_id: Uuid, end: &SessionEndRecord) -> bool {
        for attempt in 0..METADATA_RETRY_ATTEMPTS {
            match self.deps.metadata.record_session_end(session_id, end).await {
                Ok(()) => return true,
                Err(e) => {
                    tracing::warn!(
                        session_id = %session_id,
                        attempt = attempt + 1,
                        error = %e,
                        "Session end persist failed"
                    );
                    if attempt + 1 < METADATA_RETRY_ATTEMPTS {
                        tokio::time::sleep(METADATA_RETRY_BASE * (attempt + 1)).await;
                    }
                }
            }
        }
        false
    }
}

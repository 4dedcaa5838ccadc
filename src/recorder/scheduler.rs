//! ChunkScheduler - per-device continuous recording supervisors
//!
//! ## Responsibilities
//!
//! - One supervisor task per enabled device, no global lock across devices
//! - Gapless rotation: the next chunk starts as soon as the previous one
//!   finalizes (chunk N+1 never launches before chunk N left Recording,
//!   because the supervisor drives chunks sequentially and the registry
//!   slot is only free after finalize)
//! - Capped exponential backoff after a failed chunk
//! - Pause after a failure streak instead of retrying forever
//!
//! Rotation policy note: the alternative fixed-interval-with-overlap-guard
//! cadence was rejected for this deployment; it tolerates slow finalization
//! but leaves a gap of guard length on every rotation.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::recorder::session::{ChunkRequest, PreparedSession, SessionDeps};
use crate::recorder::types::{DeviceHealth, DeviceStatus, FailureKind, Quality, RecordingKind};

struct DeviceSupervisor {
    enabled_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
    duration_sec: u32,
    quality: Quality,
}

#[derive(Debug, Clone, Default)]
struct DeviceHealthState {
    failure_streak: u32,
    last_failure: Option<FailureKind>,
    paused: bool,
}

/// Owns the per-device supervisor tasks
pub struct ChunkScheduler {
    deps: SessionDeps,
    supervisors: Mutex<HashMap<String, DeviceSupervisor>>,
    health: Arc<RwLock<HashMap<String, DeviceHealthState>>>,
}

impl ChunkScheduler {
    /// Create new scheduler
    pub fn new(deps: SessionDeps) -> Self {
        Self {
            deps,
            supervisors: Mutex::new(HashMap::new()),
            health: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Start continuous recording for a device
    ///
    /// Returns false when a supervisor for the device is already running.
    pub fn start_device(&self, device_id: &str, duration_sec: u32, quality: Quality) -> bool {
        let mut supervisors = self.supervisors.lock().unwrap();

        if let Some(existing) = supervisors.get(device_id) {
            if !existing.join.is_finished() {
                tracing::warn!(camera_id = %device_id, "Supervisor already running");
                return false;
            }
        }

        self.health
            .write()
            .unwrap()
            .insert(device_id.to_string(), DeviceHealthState::default());

        let (enabled_tx, enabled_rx) = watch::channel(true);
        let join = tokio::spawn(supervise_device(
            self.deps.clone(),
            self.health.clone(),
            device_id.to_string(),
            duration_sec,
            quality,
            enabled_rx,
        ));

        supervisors.insert(
            device_id.to_string(),
            DeviceSupervisor {
                enabled_tx,
                join,
                duration_sec,
                quality,
            },
        );

        tracing::info!(
            camera_id = %device_id,
            chunk_duration_sec = duration_sec,
            "Continuous recording scheduled"
        );
        true
    }

    /// Stop scheduling for a device and drain its active session
    ///
    /// No further chunks are scheduled after this returns; a mid-flight
    /// session is allowed to finalize normally within the bounded wait.
    pub async fn stop_device(&self, device_id: &str) -> bool {
        let supervisor = {
            let mut supervisors = self.supervisors.lock().unwrap();
            supervisors.remove(device_id)
        };

        let supervisor = match supervisor {
            Some(supervisor) => supervisor,
            None => return false,
        };

        supervisor.enabled_tx.send_replace(false);
        self.health.write().unwrap().remove(device_id);

        // The stop request is re-issued until the supervisor joins: a chunk
        // that passed the enabled check but had not yet acquired its slot
        // when the disable landed would miss a one-shot signal and run to
        // its full duration
        let mut join = supervisor.join;
        let deadline = tokio::time::Instant::now() + self.deps.opts.stop_wait;
        loop {
            self.deps.registry.request_stop_device(device_id);
            tokio::select! {
                _ = &mut join => break,
                _ = tokio::time::sleep(Duration::from_millis(50)) => {}
            }
            if tokio::time::Instant::now() >= deadline {
                tracing::error!(
                    camera_id = %device_id,
                    wait_ms = self.deps.opts.stop_wait.as_millis() as u64,
                    "Supervisor did not drain in time, aborting task"
                );
                join.abort();
                break;
            }
        }

        tracing::info!(camera_id = %device_id, "Continuous recording unscheduled");
        true
    }

    /// Restart a device that was paused after repeated failures
    pub fn resume_device(&self, device_id: &str) -> crate::Result<()> {
        let (duration_sec, quality) = {
            let supervisors = self.supervisors.lock().unwrap();
            let supervisor = supervisors.get(device_id).ok_or_else(|| {
                crate::Error::NotFound(format!("Device {} is not scheduled", device_id))
            })?;

            let paused = self
                .health
                .read()
                .unwrap()
                .get(device_id)
                .map(|h| h.paused)
                .unwrap_or(false);
            if !paused {
                return Err(crate::Error::Validation(format!(
                    "Device {} is not paused",
                    device_id
                )));
            }
            (supervisor.duration_sec, supervisor.quality)
        };

        // The paused supervisor task has already finished; replace it
        {
            let mut supervisors = self.supervisors.lock().unwrap();
            supervisors.remove(device_id);
        }
        self.start_device(device_id, duration_sec, quality);
        tracing::info!(camera_id = %device_id, "Recording resumed after pause");
        Ok(())
    }

    /// Devices currently under scheduling (including paused ones)
    pub fn scheduled_devices(&self) -> BTreeSet<String> {
        self.supervisors.lock().unwrap().keys().cloned().collect()
    }

    /// Per-device reporting view
    pub fn statuses(&self) -> Vec<DeviceStatus> {
        let supervisors = self.supervisors.lock().unwrap();
        let health = self.health.read().unwrap();

        supervisors
            .keys()
            .map(|device_id| {
                let state = health.get(device_id).cloned().unwrap_or_default();
                let health = if state.paused {
                    DeviceHealth::Paused
                } else if state.failure_streak > 0 {
                    DeviceHealth::Retrying
                } else {
                    DeviceHealth::Healthy
                };
                DeviceStatus {
                    device_id: device_id.clone(),
                    scheduled: true,
                    recording: self.deps.registry.active_session_for(device_id).is_some(),
                    health,
                    failure_streak: state.failure_streak,
                    last_failure: state.last_failure,
                }
            })
            .collect()
    }

    /// Stop everything (process shutdown)
    pub async fn shutdown(&self) {
        let device_ids: Vec<String> = self.scheduled_devices().into_iter().collect();
        for device_id in device_ids {
            self.stop_device(&device_id).await;
        }
    }
}

/// One device's supervisor loop: run a chunk, rotate or back off, stop on
/// disable or failure-streak pause
async fn supervise_device(
    deps: SessionDeps,
    health: Arc<RwLock<HashMap<String, DeviceHealthState>>>,
    device_id: String,
    duration_sec: u32,
    quality: Quality,
    mut enabled_rx: watch::Receiver<bool>,
) {
    let threshold = deps.opts.failure_streak_threshold;
    let mut chunk_index: u32 = 0;

    tracing::info!(camera_id = %device_id, "Recording supervisor started");

    loop {
        if !*enabled_rx.borrow() {
            break;
        }

        let request = ChunkRequest {
            device_id: device_id.clone(),
            kind: RecordingKind::Continuous,
            chunk_index,
            duration_sec,
            quality,
        };

        let prepared = match PreparedSession::prepare(deps.clone(), request) {
            Some(prepared) => prepared,
            None => {
                // A manual session (or a slow drain) holds the slot
                tracing::warn!(camera_id = %device_id, "Device slot busy, retrying shortly");
                if wait_or_disabled(&mut enabled_rx, Duration::from_millis(500)).await {
                    break;
                }
                continue;
            }
        };

        let outcome = prepared.run().await;
        chunk_index += 1;

        if outcome.is_completed() {
            if let Some(state) = health.write().unwrap().get_mut(&device_id) {
                state.failure_streak = 0;
                state.last_failure = None;
            }
            // Gapless policy: rotate immediately
            continue;
        }

        let streak = {
            let mut health = health.write().unwrap();
            let state = health.entry(device_id.clone()).or_default();
            state.failure_streak += 1;
            state.last_failure = outcome.failure();
            state.failure_streak
        };

        if streak >= threshold {
            if let Some(state) = health.write().unwrap().get_mut(&device_id) {
                state.paused = true;
            }
            tracing::error!(
                camera_id = %device_id,
                failure_streak = streak,
                last_failure = ?outcome.failure(),
                "Recording paused after repeated failures, waiting for explicit resume"
            );
            break;
        }

        let backoff = backoff_delay(deps.opts.backoff_base, deps.opts.backoff_cap, streak);
        tracing::warn!(
            camera_id = %device_id,
            failure_streak = streak,
            backoff_ms = backoff.as_millis() as u64,
            "Chunk failed, backing off before retry"
        );
        if wait_or_disabled(&mut enabled_rx, backoff).await {
            break;
        }
    }

    tracing::info!(camera_id = %device_id, "Recording supervisor stopped");
}

/// Sleep for `delay`, returning early (true) when the device is disabled
async fn wait_or_disabled(enabled_rx: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => false,
        // A closed channel means the scheduler dropped us; stop either way
        _ = enabled_rx.wait_for(|enabled| !*enabled) => true,
    }
}

/// Capped exponential backoff: base * 2^(streak-1), bounded by cap
fn backoff_delay(base: Duration, cap: Duration, streak: u32) -> Duration {
    let exp = streak.saturating_sub(1).min(6);
    std::cmp::min(base * 2u32.pow(exp), cap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device_directory::{DeviceConnection, MemoryDeviceDirectory};
    use crate::metadata::MemoryMetadataRecorder;
    use crate::recorder::registry::SessionRegistry;
    use crate::recorder::types::RecorderOptions;
    use crate::testutil::{self, FakeEncoderBehavior};
    use std::time::Instant;

    fn scheduler_with(
        behavior: Option<FakeEncoderBehavior>,
        dir: &std::path::Path,
    ) -> (Arc<ChunkScheduler>, Arc<MemoryMetadataRecorder>) {
        let opts = match behavior {
            Some(behavior) => {
                let bin = testutil::fake_encoder(dir, behavior);
                testutil::test_options(&bin, &dir.join("rec"))
            }
            // Missing binary: every launch fails
            None => RecorderOptions {
                encoder_bin: "/nonexistent/encoder-bin".to_string(),
                recordings_dir: dir.join("rec"),
                ..testutil::test_options(std::path::Path::new("x"), &dir.join("rec"))
            },
        };

        let devices = Arc::new(MemoryDeviceDirectory::new());
        devices.insert(DeviceConnection {
            device_id: "cam-001".to_string(),
            source_url: "rtsp://192.168.3.50/stream1".to_string(),
            username: None,
            password: None,
        });
        let metadata = Arc::new(MemoryMetadataRecorder::new());
        let deps = SessionDeps {
            registry: Arc::new(SessionRegistry::new(Duration::from_secs(60))),
            devices,
            metadata: metadata.clone(),
            opts: Arc::new(opts),
        };
        (Arc::new(ChunkScheduler::new(deps)), metadata)
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let base = Duration::from_secs(2);
        let cap = Duration::from_secs(60);
        assert_eq!(backoff_delay(base, cap, 1), Duration::from_secs(2));
        assert_eq!(backoff_delay(base, cap, 2), Duration::from_secs(4));
        assert_eq!(backoff_delay(base, cap, 3), Duration::from_secs(8));
        assert_eq!(backoff_delay(base, cap, 10), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_gapless_rotation_increments_chunk_index() {
        let dir = tempfile::tempdir().unwrap();
        let (scheduler, metadata) =
            scheduler_with(Some(FakeEncoderBehavior::WriteAndExit), dir.path());

        assert!(scheduler.start_device("cam-001", 5, Quality::High));

        // Wait for at least two rotated chunks
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if metadata.records().len() >= 2 {
                break;
            }
            assert!(Instant::now() < deadline, "rotation never happened");
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        scheduler.stop_device("cam-001").await;

        let records = metadata.records();
        assert_eq!(records[0].chunk_index, 0);
        assert_eq!(records[1].chunk_index, 1);
        assert!(records.iter().take(2).all(|r| r.status == "completed"));
    }

    #[tokio::test]
    async fn test_failure_streak_pauses_device() {
        let dir = tempfile::tempdir().unwrap();
        let (scheduler, metadata) = scheduler_with(None, dir.path());

        assert!(scheduler.start_device("cam-001", 5, Quality::High));

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let statuses = scheduler.statuses();
            if statuses
                .iter()
                .any(|s| s.device_id == "cam-001" && s.health == DeviceHealth::Paused)
            {
                break;
            }
            assert!(Instant::now() < deadline, "device never paused");
            tokio::time::sleep(Duration::from_millis(30)).await;
        }

        // Exactly threshold failures, then nothing more is scheduled
        let failed = metadata.records().len();
        assert_eq!(failed as u32, scheduler.deps.opts.failure_streak_threshold);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(metadata.records().len(), failed);

        let status = scheduler
            .statuses()
            .into_iter()
            .find(|s| s.device_id == "cam-001")
            .unwrap();
        assert_eq!(status.failure_streak, 3);
        assert_eq!(status.last_failure, Some(FailureKind::LaunchFailure));
        assert!(!status.recording);
    }

    #[tokio::test]
    async fn test_resume_requires_paused_device() {
        let dir = tempfile::tempdir().unwrap();
        let (scheduler, _metadata) =
            scheduler_with(Some(FakeEncoderBehavior::Hang), dir.path());

        assert!(matches!(
            scheduler.resume_device("cam-001"),
            Err(crate::Error::NotFound(_))
        ));

        scheduler.start_device("cam-001", 5, Quality::High);
        assert!(matches!(
            scheduler.resume_device("cam-001"),
            Err(crate::Error::Validation(_))
        ));
        scheduler.stop_device("cam-001").await;
    }

    #[tokio::test]
    async fn test_stop_immediately_after_start_still_drains() {
        let dir = tempfile::tempdir().unwrap();
        let (scheduler, _metadata) =
            scheduler_with(Some(FakeEncoderBehavior::Hang), dir.path());
        let registry = scheduler.deps.registry.clone();

        // Stop before the first chunk has acquired its slot; the session
        // that registers afterwards must still be drained, not left to run
        // out its planned duration
        scheduler.start_device("cam-001", 5, Quality::High);
        let stop_issued = Instant::now();
        assert!(scheduler.stop_device("cam-001").await);

        assert!(
            stop_issued.elapsed() < Duration::from_secs(2),
            "drain took the full chunk duration"
        );
        assert_eq!(registry.active_count(), 0);
        assert!(scheduler.scheduled_devices().is_empty());
    }

    #[tokio::test]
    async fn test_stop_device_drains_active_session() {
        let dir = tempfile::tempdir().unwrap();
        let (scheduler, _metadata) =
            scheduler_with(Some(FakeEncoderBehavior::Hang), dir.path());
        let registry = scheduler.deps.registry.clone();

        scheduler.start_device("cam-001", 5, Quality::High);

        let deadline = Instant::now() + Duration::from_secs(2);
        while registry.active_count() == 0 {
            assert!(Instant::now() < deadline, "session never became active");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        assert!(scheduler.stop_device("cam-001").await);
        assert_eq!(registry.active_count(), 0);
        assert!(scheduler.scheduled_devices().is_empty());
    }
}

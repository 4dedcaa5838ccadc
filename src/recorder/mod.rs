//! Recording orchestration
//!
//! ## 構成
//!
//! - types: 状態機械・設定・失敗分類
//! - registry: デバイス単位の single-flight
//! - session: 1 チャンクの録画セッション
//! - scheduler: デバイス毎の連続録画スーパーバイザ
//! - reconciler: 設定差分の適用
//! - storage: 使用量レポート
//!
//! `RecorderService` is the single entry point the web layer talks to.

pub mod reconciler;
pub mod registry;
pub mod scheduler;
pub mod session;
pub mod storage;
pub mod types;

use std::sync::Arc;

use uuid::Uuid;

use crate::error::{Error, Result};
use crate::metadata::RecordingRecord;
use crate::recorder::reconciler::SettingsReconciler;
use crate::recorder::scheduler::ChunkScheduler;
use crate::recorder::session::{ChunkRequest, PreparedSession, SessionDeps};
use crate::recorder::storage::{StorageAccountant, StorageReport};
use crate::recorder::types::{
    DeviceStatus, Quality, RecorderConfig, ReconcileResult, RecordingKind, SessionSnapshot,
};
use crate::settings_store::SettingsRepository;

/// Facade over the recording subsystem
pub struct RecorderService {
    deps: SessionDeps,
    scheduler: Arc<ChunkScheduler>,
    reconciler: SettingsReconciler,
    storage: StorageAccountant,
}

impl RecorderService {
    pub fn new(
        deps: SessionDeps,
        settings: Arc<dyn SettingsRepository>,
        initial: RecorderConfig,
    ) -> Self {
        let scheduler = Arc::new(ChunkScheduler::new(deps.clone()));
        let reconciler = SettingsReconciler::new(scheduler.clone(), settings, initial);
        let storage = StorageAccountant::new(deps.metadata.clone());
        Self {
            deps,
            scheduler,
            reconciler,
            storage,
        }
    }

    /// Start a one-shot recording outside the continuous schedule
    ///
    /// Returns the initial snapshot; the session runs to its terminal state
    /// in the background. Conflicts with the device's continuous session
    /// surface as `DeviceBusy`, unknown or stream-less devices as
    /// `DeviceUnresolvable`.
    pub async fn start_manual(
        &self,
        device_id: &str,
        duration_sec: u32,
        quality: Quality,
    ) -> Result<SessionSnapshot> {
        if duration_sec == 0 || duration_sec > 24 * 3600 {
            return Err(Error::Validation(
                "duration_sec must be between 1 and 86400".to_string(),
            ));
        }

        // Manual requests fail fast as a client error instead of spawning a
        // session that is doomed to fail
        if self.deps.devices.resolve_device(device_id).await?.is_none() {
            return Err(Error::DeviceUnresolvable(format!(
                "Device {} is unknown or has no usable stream",
                device_id
            )));
        }

        let request = ChunkRequest {
            device_id: device_id.to_string(),
            kind: RecordingKind::Manual,
            chunk_index: 0,
            duration_sec,
            quality,
        };

        let prepared = PreparedSession::prepare(self.deps.clone(), request)
            .ok_or_else(|| Error::DeviceBusy(device_id.to_string()))?;
        let snapshot = prepared.snapshot();

        tokio::spawn(prepared.run());

        tracing::info!(
            camera_id = %device_id,
            session_id = %snapshot.session_id,
            duration_sec = duration_sec,
            "Manual recording started"
        );
        Ok(snapshot)
    }

    /// Request a graceful stop for a specific session
    pub fn stop_session(&self, session_id: Uuid) -> Result<()> {
        if self.deps.registry.request_stop_session(session_id) {
            Ok(())
        } else {
            Err(Error::NotFound(format!(
                "No active session {}",
                session_id
            )))
        }
    }

    /// Apply a new recording configuration (validated, diffed, persisted)
    pub async fn apply_config(&self, config: RecorderConfig) -> Result<ReconcileResult> {
        self.reconciler.apply(config).await
    }

    pub fn current_config(&self) -> RecorderConfig {
        self.reconciler.current_config()
    }

    pub fn active_sessions(&self) -> Vec<SessionSnapshot> {
        self.deps.registry.all_active()
    }

    pub fn recent_terminal(&self) -> Vec<SessionSnapshot> {
        self.deps.registry.recent_terminal()
    }

    pub fn active_count(&self) -> usize {
        self.deps.registry.active_count()
    }

    pub fn device_statuses(&self) -> Vec<DeviceStatus> {
        self.scheduler.statuses()
    }

    /// Restart a device that paused after repeated failures
    pub fn resume_device(&self, device_id: &str) -> Result<()> {
        self.scheduler.resume_device(device_id)
    }

    pub async fn storage_report(&self) -> Result<StorageReport> {
        let max = self.current_config().max_storage_bytes;
        self.storage.report(max).await
    }

    pub async fn recent_recordings(&self, limit: u32) -> Result<Vec<RecordingRecord>> {
        self.deps.metadata.recent_recordings(limit).await
    }

    /// Drain everything for process shutdown
    ///
    /// Unschedules all devices, signals any remaining sessions (manual
    /// included) and waits a bounded time for them to finalize.
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
        let signalled = self.deps.registry.request_stop_all();
        if signalled > 0 {
            tracing::info!(sessions = signalled, "Draining remaining sessions");
        }

        let deadline = tokio::time::Instant::now() + self.deps.opts.stop_wait;
        while self.deps.registry.active_count() > 0 {
            if tokio::time::Instant::now() >= deadline {
                tracing::error!(
                    remaining = self.deps.registry.active_count(),
                    "Sessions did not drain before shutdown deadline"
                );
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device_directory::{DeviceConnection, MemoryDeviceDirectory};
    use crate::metadata::MemoryMetadataRecorder;
    use crate::recorder::registry::SessionRegistry;
    use crate::recorder::types::SessionState;
    use crate::settings_store::MemorySettingsRepository;
    use crate::testutil::{self, FakeEncoderBehavior};
    use std::time::{Duration, Instant};

    fn service(
        behavior: FakeEncoderBehavior,
        dir: &std::path::Path,
    ) -> (RecorderService, Arc<MemoryMetadataRecorder>) {
        let bin = testutil::fake_encoder(dir, behavior);
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
            opts: Arc::new(testutil::test_options(&bin, &dir.join("rec"))),
        };
        let service = RecorderService::new(
            deps,
            Arc::new(MemorySettingsRepository::new()),
            RecorderConfig::default(),
        );
        (service, metadata)
    }

    #[tokio::test]
    async fn test_manual_recording_runs_to_completion() {
        let dir = tempfile::tempdir().unwrap();
        let (service, metadata) = service(FakeEncoderBehavior::WriteAndExit, dir.path());

        let snapshot = service
            .start_manual("cam-001", 5, Quality::High)
            .await
            .unwrap();
        assert_eq!(snapshot.state, SessionState::Starting);
        assert_eq!(snapshot.kind, RecordingKind::Manual);

        let deadline = Instant::now() + Duration::from_secs(3);
        while service.active_count() > 0 {
            assert!(Instant::now() < deadline, "session never finished");
            tokio::time::sleep(Duration::from_millis(30)).await;
        }

        let terminal = service.recent_terminal();
        assert_eq!(terminal.len(), 1);
        assert_eq!(terminal[0].state, SessionState::Completed);
        assert_eq!(metadata.records().len(), 1);
    }

    #[tokio::test]
    async fn test_manual_conflict_is_device_busy() {
        let dir = tempfile::tempdir().unwrap();
        let (service, _metadata) = service(FakeEncoderBehavior::Hang, dir.path());

        service
            .start_manual("cam-001", 5, Quality::High)
            .await
            .unwrap();
        assert!(matches!(
            service.start_manual("cam-001", 5, Quality::High).await,
            Err(Error::DeviceBusy(_))
        ));
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_manual_start_unknown_device_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (service, _metadata) = service(FakeEncoderBehavior::WriteAndExit, dir.path());

        assert!(matches!(
            service.start_manual("cam-404", 5, Quality::High).await,
            Err(Error::DeviceUnresolvable(_))
        ));
        assert_eq!(service.active_count(), 0);
    }

    #[tokio::test]
    async fn test_stop_session_by_id() {
        let dir = tempfile::tempdir().unwrap();
        let (service, _metadata) = service(FakeEncoderBehavior::Hang, dir.path());

        let snapshot = service
            .start_manual("cam-001", 5, Quality::High)
            .await
            .unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        while service.active_sessions().is_empty()
            || service.active_sessions()[0].state != SessionState::Recording
        {
            assert!(Instant::now() < deadline, "session never started");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        service.stop_session(snapshot.session_id).unwrap();
        let deadline = Instant::now() + Duration::from_secs(3);
        while service.active_count() > 0 {
            assert!(Instant::now() < deadline, "session never drained");
            tokio::time::sleep(Duration::from_millis(30)).await;
        }

        assert!(matches!(
            service.stop_session(snapshot.session_id),
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_manual_duration_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (service, _metadata) = service(FakeEncoderBehavior::WriteAndExit, dir.path());
        assert!(matches!(
            service.start_manual("cam-001", 0, Quality::High).await,
            Err(Error::Validation(_))
        ));
    }
}

//! SettingsReconciler - config changes become scheduler actions
//!
//! ## 目的
//!
//! - 設定 (RecorderConfig) と実際のスケジュール状態の差分を解消
//! - 適用は直列化（同時に 2 つの reconcile が走らない）
//! - 影響を受けないデバイスの録画は中断しない
//!
//! Apply order per pass: validate, diff against the scheduler, stop
//! removed devices, restart retained devices whose recording parameters
//! changed, start added devices, then persist. A persistence failure does
//! not roll back the live state; the result carries `persisted: false`.

use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};

use crate::recorder::scheduler::ChunkScheduler;
use crate::recorder::types::{RecorderConfig, ReconcileResult};
use crate::settings_store::SettingsRepository;

pub struct SettingsReconciler {
    scheduler: Arc<ChunkScheduler>,
    settings: Arc<dyn SettingsRepository>,
    current: RwLock<RecorderConfig>,
    // Serializes apply passes; concurrent update requests queue here
    apply_lock: tokio::sync::Mutex<()>,
}

impl SettingsReconciler {
    pub fn new(
        scheduler: Arc<ChunkScheduler>,
        settings: Arc<dyn SettingsRepository>,
        initial: RecorderConfig,
    ) -> Self {
        Self {
            scheduler,
            settings,
            current: RwLock::new(initial),
            apply_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// The config as of the last completed apply
    pub fn current_config(&self) -> RecorderConfig {
        self.current.read().unwrap().clone()
    }

    /// Apply a new configuration
    ///
    /// Invalid configs are rejected before any device is touched. Valid
    /// configs are applied as a diff: devices present in both old and new
    /// sets keep recording uninterrupted unless the chunk duration or
    /// quality changed, in which case they are restarted.
    pub async fn apply(&self, config: RecorderConfig) -> crate::Result<ReconcileResult> {
        config.validate()?;

        let _guard = self.apply_lock.lock().await;

        let previous = self.current_config();
        let scheduled = self.scheduler.scheduled_devices();
        let desired: BTreeSet<String> = if config.enabled {
            config.enabled_devices.clone()
        } else {
            BTreeSet::new()
        };

        let params_changed = config.chunk_duration_sec != previous.chunk_duration_sec
            || config.quality != previous.quality;

        let to_stop: Vec<String> = scheduled.difference(&desired).cloned().collect();
        let to_start: Vec<String> = desired.difference(&scheduled).cloned().collect();
        let retained: Vec<String> = desired.intersection(&scheduled).cloned().collect();
        let to_restart: Vec<String> = if params_changed {
            retained.clone()
        } else {
            Vec::new()
        };

        tracing::info!(
            enabled = config.enabled,
            chunk_duration_sec = config.chunk_duration_sec,
            stop = to_stop.len(),
            start = to_start.len(),
            restart = to_restart.len(),
            "Applying recording configuration"
        );

        for device_id in &to_stop {
            self.scheduler.stop_device(device_id).await;
        }
        for device_id in &to_restart {
            self.scheduler.stop_device(device_id).await;
        }
        for device_id in to_start.iter().chain(to_restart.iter()) {
            self.scheduler
                .start_device(device_id, config.chunk_duration_sec, config.quality);
        }

        *self.current.write().unwrap() = config.clone();

        // An unchanged config (boot-time re-apply of the persisted one, or
        // an idempotent PUT) needs no settings write
        let persisted = if config == previous {
            true
        } else {
            match self.settings.save(&config).await {
                Ok(()) => true,
                Err(e) => {
                    tracing::error!(error = %e, "Config applied but could not be persisted");
                    false
                }
            }
        };

        Ok(ReconcileResult {
            started: to_start,
            stopped: to_stop,
            restarted: to_restart,
            unchanged: if params_changed { 0 } else { retained.len() },
            persisted,
        })
    }
}

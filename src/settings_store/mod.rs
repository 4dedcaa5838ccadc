//! SettingsStore - recorder configuration persistence
//!
//! The recorder config lives in the shared `settings` table under
//! `setting_key = 'recording'` as a JSON document, the same shape the IS22
//! config store uses for its policies. It is loaded once at startup and
//! rewritten by the settings reconciler after each successful apply.

use async_trait::async_trait;
use sqlx::{MySqlPool, Row};

use crate::error::Result;
use crate::recorder::types::RecorderConfig;

const SETTING_KEY: &str = "recording";

/// Persisted recorder configuration
#[async_trait]
pub trait SettingsRepository: Send + Sync {
    /// Load the last applied config, `None` on first boot
    async fn load(&self) -> Result<Option<RecorderConfig>>;

    async fn save(&self, config: &RecorderConfig) -> Result<()>;
}

/// SettingsRepository backed by the shared `settings` table
pub struct SqlSettingsRepository {
    pool: MySqlPool,
}

impl SqlSettingsRepository {
    /// Create new repository on the shared pool
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SettingsRepository for SqlSettingsRepository {
    async fn load(&self) -> Result<Option<RecorderConfig>> {
        let row = sqlx::query("SELECT setting_json FROM settings WHERE setting_key = ?")
            .bind(SETTING_KEY)
            .fetch_optional(&self.pool)
            .await?;

        let row = match row {
            Some(row) => row,
            None => return Ok(None),
        };

        let raw: String = row.get("setting_json");
        match serde_json::from_str::<RecorderConfig>(&raw) {
            Ok(config) => Ok(Some(config)),
            Err(e) => {
                // Malformed persisted config falls back to defaults rather
                // than blocking startup
                tracing::error!(error = %e, "Malformed settings.recording, ignoring");
                Ok(None)
            }
        }
    }

    async fn save(&self, config: &RecorderConfig) -> Result<()> {
        let json = serde_json::to_string(config)?;

        sqlx::query(
            "INSERT INTO settings (setting_key, setting_json, updated_at) \
             VALUES (?, ?, NOW()) \
             ON DUPLICATE KEY UPDATE setting_json = VALUES(setting_json), updated_at = NOW()",
        )
        .bind(SETTING_KEY)
        .bind(json)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// In-memory repository for tests and development
pub struct MemorySettingsRepository {
    config: std::sync::Mutex<Option<RecorderConfig>>,
    fail_writes: std::sync::atomic::AtomicBool,
}

impl MemorySettingsRepository {
    pub fn new() -> Self {
        Self {
            config: std::sync::Mutex::new(None),
            fail_writes: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Make subsequent saves fail (simulated persistence outage)
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }
}

impl Default for MemorySettingsRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SettingsRepository for MemorySettingsRepository {
    async fn load(&self) -> Result<Option<RecorderConfig>> {
        Ok(self.config.lock().unwrap().clone())
    }

    async fn save(&self, config: &RecorderConfig) -> Result<()> {
        if self.fail_writes.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(crate::Error::Database(
                "settings store unavailable".to_string(),
            ));
        }
        *self.config.lock().unwrap() = Some(config.clone());
        Ok(())
    }
}

//! DeviceDirectory - camera connection attribute resolution
//!
//! ## Responsibilities
//!
//! - Resolve a device id to its stream URL and credentials
//! - Read-only view of the `cameras` table (owned by IS22)
//!
//! The recorder never mutates device records.

use async_trait::async_trait;
use sqlx::{MySqlPool, Row};

use crate::error::Result;

/// Connection attributes for one camera
#[derive(Debug, Clone)]
pub struct DeviceConnection {
    pub device_id: String,
    /// RTSP URL of the stream to record (main stream preferred)
    pub source_url: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Resolves device ids to connection attributes
#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    /// Resolve a device. Returns `Ok(None)` when the device is unknown,
    /// disabled, or has no usable stream URL.
    async fn resolve_device(&self, device_id: &str) -> Result<Option<DeviceConnection>>;
}

/// DeviceDirectory backed by the shared `cameras` table
pub struct SqlDeviceDirectory {
    pool: MySqlPool,
}

impl SqlDeviceDirectory {
    /// Create new directory on the shared pool
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeviceDirectory for SqlDeviceDirectory {
    async fn resolve_device(&self, device_id: &str) -> Result<Option<DeviceConnection>> {
        let row = sqlx::query(
            "SELECT camera_id, rtsp_main, rtsp_sub, rtsp_username, rtsp_password \
             FROM cameras WHERE camera_id = ? AND enabled = 1 AND deleted_at IS NULL",
        )
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await?;

        let row = match row {
            Some(row) => row,
            None => return Ok(None),
        };

        let rtsp_main: Option<String> = row.get("rtsp_main");
        let rtsp_sub: Option<String> = row.get("rtsp_sub");

        // Main stream preferred, sub stream as fallback
        let source_url = match rtsp_main.filter(|u| !u.is_empty()).or(rtsp_sub) {
            Some(url) if !url.is_empty() => url,
            _ => {
                tracing::warn!(
                    camera_id = %device_id,
                    "Camera has no RTSP URL, cannot record"
                );
                return Ok(None);
            }
        };

        Ok(Some(DeviceConnection {
            device_id: row.get("camera_id"),
            source_url,
            username: row.get("rtsp_username"),
            password: row.get("rtsp_password"),
        }))
    }
}

/// In-memory directory for tests and development
pub struct MemoryDeviceDirectory {
    devices: std::sync::RwLock<std::collections::HashMap<String, DeviceConnection>>,
}

impl MemoryDeviceDirectory {
    pub fn new() -> Self {
        Self {
            devices: std::sync::RwLock::new(std::collections::HashMap::new()),
        }
    }

    pub fn insert(&self, conn: DeviceConnection) {
        self.devices
            .write()
            .unwrap()
            .insert(conn.device_id.clone(), conn);
    }
}

impl Default for MemoryDeviceDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeviceDirectory for MemoryDeviceDirectory {
    async fn resolve_device(&self, device_id: &str) -> Result<Option<DeviceConnection>> {
        Ok(self.devices.read().unwrap().get(device_id).cloned())
    }
}

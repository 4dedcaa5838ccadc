//! MetadataRecorder - recording metadata persistence
//!
//! ## Responsibilities
//!
//! - Persist session start/end records into the `recordings` table
//! - Aggregate recorded bytes for the storage accountant
//! - List recent recordings for the API
//!
//! The orchestrator calls this interface, it never queries it for control
//! decisions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{MySqlPool, Row};
use uuid::Uuid;

use crate::error::Result;
use crate::recorder::types::{FailureKind, SessionSnapshot};

/// Terminal attributes of a finished session
#[derive(Debug, Clone)]
pub struct SessionEndRecord {
    pub ended_at: DateTime<Utc>,
    pub size_bytes: u64,
    pub duration_sec: u32,
    /// "completed" or "failed"
    pub status: String,
    pub failure: Option<FailureKind>,
}

/// Aggregate recorded storage, computed from metadata (not a filesystem
/// walk, so it stays correct if files are removed out-of-band)
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct StorageUsage {
    pub total_bytes: u64,
    pub file_count: u64,
}

/// One persisted recording row
#[derive(Debug, Clone, Serialize)]
pub struct RecordingRecord {
    pub session_id: String,
    pub device_id: String,
    pub kind: String,
    pub chunk_index: u32,
    pub status: String,
    pub failure: Option<String>,
    pub artifact_path: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub size_bytes: u64,
    pub duration_sec: u32,
}

/// Persists recording session metadata
#[async_trait]
pub trait MetadataRecorder: Send + Sync {
    async fn record_session_start(&self, session: &SessionSnapshot) -> Result<()>;

    async fn record_session_end(&self, session_id: Uuid, end: &SessionEndRecord) -> Result<()>;

    /// Sum of recorded sizes over all persisted sessions
    async fn usage(&self) -> Result<StorageUsage>;

    async fn recent_recordings(&self, limit: u32) -> Result<Vec<RecordingRecord>>;
}

/// MetadataRecorder backed by the shared `recordings` table
pub struct SqlMetadataRecorder {
    pool: MySqlPool,
}

impl SqlMetadataRecorder {
    /// Create new recorder on the shared pool
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MetadataRecorder for SqlMetadataRecorder {
    async fn record_session_start(&self, session: &SessionSnapshot) -> Result<()> {
        sqlx::query(
            "INSERT INTO recordings \
             (session_id, camera_id, kind, chunk_index, status, artifact_path, started_at, size_bytes, duration_sec) \
             VALUES (?, ?, ?, ?, ?, ?, ?, 0, 0)",
        )
        .bind(session.session_id.to_string())
        .bind(&session.device_id)
        .bind(session.kind.as_str())
        .bind(session.chunk_index)
        .bind(session.state.as_str())
        .bind(session.artifact_path.to_string_lossy().to_string())
        .bind(session.started_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn record_session_end(&self, session_id: Uuid, end: &SessionEndRecord) -> Result<()> {
        sqlx::query(
            "UPDATE recordings \
             SET status = ?, failure = ?, ended_at = ?, size_bytes = ?, duration_sec = ? \
             WHERE session_id = ?",
        )
        .bind(&end.status)
        .bind(end.failure.map(|f| f.as_str()))
        .bind(end.ended_at)
        .bind(end.size_bytes)
        .bind(end.duration_sec)
        .bind(session_id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn usage(&self) -> Result<StorageUsage> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(size_bytes), 0) AS total_bytes, COUNT(*) AS file_count \
             FROM recordings WHERE size_bytes > 0",
        )
        .fetch_one(&self.pool)
        .await?;

        let total_bytes: u64 = row.try_get::<i64, _>("total_bytes").unwrap_or(0).max(0) as u64;
        let file_count: u64 = row.try_get::<i64, _>("file_count").unwrap_or(0).max(0) as u64;

        Ok(StorageUsage {
            total_bytes,
            file_count,
        })
    }

    async fn recent_recordings(&self, limit: u32) -> Result<Vec<RecordingRecord>> {
        let rows = sqlx::query(
            "SELECT session_id, camera_id, kind, chunk_index, status, failure, \
                    artifact_path, started_at, ended_at, size_bytes, duration_sec \
             FROM recordings ORDER BY started_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let records = rows
            .into_iter()
            .map(|row| RecordingRecord {
                session_id: row.get("session_id"),
                device_id: row.get("camera_id"),
                kind: row.get("kind"),
                chunk_index: row.get("chunk_index"),
                status: row.get("status"),
                failure: row.get("failure"),
                artifact_path: row.get("artifact_path"),
                started_at: row.get("started_at"),
                ended_at: row.get("ended_at"),
                size_bytes: row.get::<i64, _>("size_bytes").max(0) as u64,
                duration_sec: row.get::<i64, _>("duration_sec").max(0) as u32,
            })
            .collect();

        Ok(records)
    }
}

/// In-memory recorder for tests and development
pub struct MemoryMetadataRecorder {
    records: std::sync::Mutex<Vec<RecordingRecord>>,
    /// When set, record calls fail (for MetadataPersistFailure tests)
    fail_writes: std::sync::atomic::AtomicBool,
}

impl MemoryMetadataRecorder {
    pub fn new() -> Self {
        Self {
            records: std::sync::Mutex::new(Vec::new()),
            fail_writes: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn records(&self) -> Vec<RecordingRecord> {
        self.records.lock().unwrap().clone()
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(crate::Error::Database(
                "metadata store unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for MemoryMetadataRecorder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetadataRecorder for MemoryMetadataRecorder {
    async fn record_session_start(&self, session: &SessionSnapshot) -> Result<()> {
        self.check_writable()?;
        self.records.lock().unwrap().push(RecordingRecord {
            session_id: session.session_id.to_string(),
            device_id: session.device_id.clone(),
            kind: session.kind.as_str().to_string(),
            chunk_index: session.chunk_index,
            status: session.state.as_str().to_string(),
            failure: None,
            artifact_path: session.artifact_path.to_string_lossy().to_string(),
            started_at: session.started_at,
            ended_at: None,
            size_bytes: 0,
            duration_sec: 0,
        });
        Ok(())
    }

    async fn record_session_end(&self, session_id: Uuid, end: &SessionEndRecord) -> Result<()> {
        self.check_writable()?;
        let mut records = self.records.lock().unwrap();
        let id = session_id.to_string();
        if let Some(record) = records.iter_mut().find(|r| r.session_id == id) {
            record.status = end.status.clone();
            record.failure = end.failure.map(|f| f.as_str().to_string());
            record.ended_at = Some(end.ended_at);
            record.size_bytes = end.size_bytes;
            record.duration_sec = end.duration_sec;
        }
        Ok(())
    }

    async fn usage(&self) -> Result<StorageUsage> {
        let records = self.records.lock().unwrap();
        let recorded: Vec<_> = records.iter().filter(|r| r.size_bytes > 0).collect();
        Ok(StorageUsage {
            total_bytes: recorded.iter().map(|r| r.size_bytes).sum(),
            file_count: recorded.len() as u64,
        })
    }

    async fn recent_recordings(&self, limit: u32) -> Result<Vec<RecordingRecord>> {
        let mut records = self.records.lock().unwrap().clone();
        records.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        records.truncate(limit as usize);
        Ok(records)
    }
}

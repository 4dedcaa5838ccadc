//! StorageAccountant - metadata-derived storage usage and quota headroom

use std::sync::Arc;

use serde::Serialize;

use crate::error::Result;
use crate::metadata::MetadataRecorder;

/// Usage report for the reporting API
#[derive(Debug, Clone, Serialize)]
pub struct StorageReport {
    pub total_bytes: u64,
    pub file_count: u64,
    pub max_storage_bytes: u64,
    /// Zero when usage already exceeds the configured ceiling
    pub quota_remaining_bytes: u64,
}

/// Answers "how much space do recordings take" from recording metadata,
/// not from walking the filesystem
pub struct StorageAccountant {
    metadata: Arc<dyn MetadataRecorder>,
}

impl StorageAccountant {
    pub fn new(metadata: Arc<dyn MetadataRecorder>) -> Self {
        Self { metadata }
    }

    pub async fn report(&self, max_storage_bytes: u64) -> Result<StorageReport> {
        let usage = self.metadata.usage().await?;
        Ok(StorageReport {
            total_bytes: usage.total_bytes,
            file_count: usage.file_count,
            max_storage_bytes,
            quota_remaining_bytes: max_storage_bytes.saturating_sub(usage.total_bytes),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{MemoryMetadataRecorder, MetadataRecorder, SessionEndRecord};
    use crate::recorder::types::{RecordingKind, SessionSnapshot, SessionState};
    use chrono::Utc;
    use std::path::PathBuf;
    use uuid::Uuid;

    async fn record_completed(metadata: &MemoryMetadataRecorder, size_bytes: u64) {
        let snapshot = SessionSnapshot {
            session_id: Uuid::new_v4(),
            device_id: "cam-001".to_string(),
            kind: RecordingKind::Continuous,
            chunk_index: 0,
            state: SessionState::Starting,
            started_at: Utc::now(),
            ended_at: None,
            planned_duration_sec: 60,
            artifact_path: PathBuf::from("/tmp/out.mp4"),
            size_bytes: None,
            failure: None,
        };
        metadata.record_session_start(&snapshot).await.unwrap();
        metadata
            .record_session_end(
                snapshot.session_id,
                &SessionEndRecord {
                    ended_at: Utc::now(),
                    size_bytes,
                    duration_sec: 60,
                    status: "completed".to_string(),
                    failure: None,
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_report_sums_completed_recordings() {
        let metadata = Arc::new(MemoryMetadataRecorder::new());
        record_completed(&metadata, 1000).await;
        record_completed(&metadata, 2000).await;

        let accountant = StorageAccountant::new(metadata);
        let report = accountant.report(10_000).await.unwrap();
        assert_eq!(report.total_bytes, 3000);
        assert_eq!(report.file_count, 2);
        assert_eq!(report.quota_remaining_bytes, 7000);
    }

    #[tokio::test]
    async fn test_quota_remaining_clamps_at_zero() {
        let metadata = Arc::new(MemoryMetadataRecorder::new());
        record_completed(&metadata, 5000).await;

        let accountant = StorageAccountant::new(metadata);
        let report = accountant.report(1000).await.unwrap();
        assert_eq!(report.quota_remaining_bytes, 0);
    }
}

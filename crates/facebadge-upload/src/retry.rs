//! Replays the backup store against the endpoint.

use crate::backup::{BackupError, BackupStore, PendingUploadRecord, RecordStatus};
use crate::client::Deliver;
use crate::payload::format_time;
use chrono::Utc;

#[derive(Debug, Default)]
pub struct RetrySummary {
    /// Pending records a delivery was attempted for.
    pub attempted: usize,
    pub uploaded: Vec<PendingUploadRecord>,
    pub still_pending: Vec<PendingUploadRecord>,
    /// Records left in the store afterwards, including any the kiosk added
    /// while the pass ran.
    pub backlog: usize,
}

/// Retry every pending record once.
///
/// Delivered records are marked uploaded and their image copies deleted.
/// The store is then re-read under its lock and only the delivered records
/// are removed from it; it is deleted once nothing is left. An empty or
/// absent store is left untouched.
pub async fn retry_pending<D: Deliver>(store: &BackupStore, delivery: &D) -> Result<RetrySummary, BackupError> {
    let records = store.load().await?;
    if records.is_empty() {
        tracing::info!(store = %store.store_path().display(), "no pending uploads");
        return Ok(RetrySummary::default());
    }

    let total = records.len();
    let mut summary = RetrySummary::default();
    for (idx, mut record) in records.into_iter().enumerate() {
        if record.status != RecordStatus::Pending {
            continue;
        }
        summary.attempted += 1;
        tracing::info!(
            progress = %format!("{}/{total}", idx + 1),
            name = %record.name,
            action = record.action.as_str(),
            time = %record.time,
            "retrying upload"
        );

        let result = match record.payload().await {
            Ok(payload) => delivery.deliver(&payload).await.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        match result {
            Ok(()) => {
                record.status = RecordStatus::Uploaded;
                record.uploaded_at = Some(format_time(Utc::now()));
                for path in record.image_paths() {
                    if let Err(e) = tokio::fs::remove_file(path).await {
                        tracing::debug!(path = %path.display(), error = %e, "backup image cleanup failed");
                    }
                }
                tracing::info!(name = %record.name, "upload succeeded");
                summary.uploaded.push(record);
            }
            Err(error) => {
                tracing::warn!(name = %record.name, %error, "upload still failing");
                record.error = error;
                summary.still_pending.push(record);
            }
        }
    }

    summary.backlog = store.settle(&summary.uploaded, &summary.still_pending).await?.len();
    tracing::info!(
        uploaded = summary.uploaded.len(),
        still_pending = summary.still_pending.len(),
        backlog = summary.backlog,
        "retry finished"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::DeliveryError;
    use crate::event::UploadEvent;
    use crate::payload::{EncodedImage, Payload};
    use facebadge_core::Action;
    use std::collections::HashSet;

    /// Fails every payload whose name is in `failing`.
    struct Selective {
        failing: HashSet<String>,
    }

    impl Deliver for Selective {
        async fn deliver(&self, payload: &Payload) -> Result<(), DeliveryError> {
            if self.failing.contains(payload.name()) {
                Err(DeliveryError::Status(500))
            } else {
                Ok(())
            }
        }
    }

    fn logout(id: &str) -> UploadEvent {
        UploadEvent {
            action: Action::Logout,
            identity_id: id.to_string(),
            timestamp: Utc::now(),
            current_frame: None,
            reference_image: None,
        }
    }

    #[tokio::test]
    async fn test_partial_success_keeps_failures() {
        let dir = tempfile::tempdir().unwrap();
        let store = BackupStore::new(dir.path());
        store.persist(&logout("alice"), "HTTP 500").await.unwrap();
        store.persist(&logout("bob"), "HTTP 500").await.unwrap();

        let delivery = Selective {
            failing: HashSet::from(["bob".to_string()]),
        };
        let summary = retry_pending(&store, &delivery).await.unwrap();
        assert_eq!(summary.attempted, 2);
        assert_eq!(summary.uploaded.len(), 1);
        assert_eq!(summary.uploaded[0].status, RecordStatus::Uploaded);
        assert!(summary.uploaded[0].uploaded_at.is_some());

        let left = store.load().await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].name, "bob");
        assert_eq!(left[0].status, RecordStatus::Pending);
        assert_eq!(left[0].error, "endpoint answered HTTP 500");
    }

    #[tokio::test]
    async fn test_uploaded_records_are_skipped_and_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let store = BackupStore::new(dir.path().join("failed_uploads"));
        let mut record = store.persist(&logout("carol"), "x").await.unwrap();
        record.status = RecordStatus::Uploaded;
        std::fs::write(store.store_path(), serde_json::to_vec(&[record]).unwrap()).unwrap();

        let delivery = Selective {
            failing: HashSet::new(),
        };
        let summary = retry_pending(&store, &delivery).await.unwrap();
        assert_eq!(summary.attempted, 0);
        assert_eq!(summary.backlog, 0);
        assert!(!store.store_path().exists());
    }

    /// Persists a record through a second store on the same root while
    /// delivering, the way the running kiosk does.
    struct KioskMeanwhile {
        kiosk: BackupStore,
    }

    impl Deliver for KioskMeanwhile {
        async fn deliver(&self, _payload: &Payload) -> Result<(), DeliveryError> {
            self.kiosk.persist(&logout("bob"), "endpoint down").await.unwrap();
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_records_persisted_during_retry_survive() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("failed_uploads");
        let tool = BackupStore::new(&root);
        let mut first = logout("alice");
        first.timestamp = Utc::now() - chrono::Duration::minutes(5);
        tool.persist(&first, "HTTP 500").await.unwrap();

        let delivery = KioskMeanwhile {
            kiosk: BackupStore::new(&root),
        };
        let summary = retry_pending(&tool, &delivery).await.unwrap();
        assert_eq!(summary.uploaded.len(), 1);
        assert_eq!(summary.backlog, 1);

        let left = tool.load().await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].name, "bob");
        assert_eq!(left[0].status, RecordStatus::Pending);
    }

    #[tokio::test]
    async fn test_missing_backup_image_stays_pending() {
        let dir = tempfile::tempdir().unwrap();
        let store = BackupStore::new(dir.path().join("failed_uploads"));
        let event = UploadEvent {
            action: Action::Login,
            identity_id: "alice".into(),
            timestamp: Utc::now(),
            current_frame: Some(EncodedImage::jpeg(b"f".to_vec())),
            reference_image: Some(EncodedImage::jpeg(b"r".to_vec())),
        };
        let record = store.persist(&event, "timeout").await.unwrap();
        std::fs::remove_file(record.current_image_path.as_ref().unwrap()).unwrap();

        let delivery = Selective {
            failing: HashSet::new(),
        };
        let summary = retry_pending(&store, &delivery).await.unwrap();
        assert_eq!(summary.still_pending.len(), 1);
        assert!(summary.still_pending[0].error.starts_with("failed to read image"));
        assert_eq!(store.load().await.unwrap().len(), 1);
    }
}

//! Durable store of failed deliveries.
//!
//! Layout under the backup root:
//!   pending_uploads.json   JSON array of records
//!   images/                copies of every image a record references
//!
//! The kiosk and the retry tool are separate processes sharing this
//! directory. Every read-modify-write of the store file holds an exclusive
//! `flock` on the backup root; inside one process an async mutex keeps
//! tasks from blocking each other on that lock.

use crate::event::UploadEvent;
use crate::payload::{EncodedImage, Payload, PayloadError};
use chrono::Utc;
use facebadge_core::Action;
use nix::fcntl::{Flock, FlockArg};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::ErrorKind;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::Mutex;

pub const STORE_FILE: &str = "pending_uploads.json";
pub const IMAGE_DIR: &str = "images";

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("backup i/o on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed backup store: {0}")]
    Json(#[from] serde_json::Error),
    #[error("store lock task: {0}")]
    Lock(#[from] tokio::task::JoinError),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> BackupError + '_ {
    move |source| BackupError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Pending,
    Uploaded,
}

/// A delivery that failed and awaits retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingUploadRecord {
    pub action: Action,
    /// Identity id, sent as the payload `name`.
    pub name: String,
    /// Event time as sent on the wire.
    pub time: String,
    /// Compact event stamp used in backup image names.
    pub timestamp: String,
    pub current_image_path: Option<PathBuf>,
    pub known_face_path: Option<PathBuf>,
    pub error: String,
    pub status: RecordStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploaded_at: Option<String>,
}

impl PendingUploadRecord {
    /// Rebuild the exact payload the original delivery would have sent.
    pub async fn payload(&self) -> Result<Payload, PayloadError> {
        Payload::from_files(
            self.action,
            &self.name,
            &self.time,
            self.current_image_path.as_deref(),
            self.known_face_path.as_deref(),
        )
        .await
    }

    pub fn image_paths(&self) -> impl Iterator<Item = &Path> {
        self.current_image_path
            .iter()
            .chain(self.known_face_path.iter())
            .map(PathBuf::as_path)
    }

    /// One event per identity, action and wire time.
    fn same_event(&self, other: &PendingUploadRecord) -> bool {
        self.action == other.action && self.name == other.name && self.time == other.time
    }
}

pub struct BackupStore {
    root: PathBuf,
    lock: Mutex<()>,
}

impl BackupStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn store_path(&self) -> PathBuf {
        self.root.join(STORE_FILE)
    }

    /// Write the event's images into the backup area and append a pending record.
    ///
    /// A store that no longer parses is moved aside and a fresh one started.
    /// Nothing is left in `images/` when the record could not be saved.
    pub async fn persist(&self, event: &UploadEvent, error: &str) -> Result<PendingUploadRecord, BackupError> {
        let _guard = self.lock.lock().await;
        let _flock = self.lock_root(true).await?;

        let mut records = match self.read().await {
            Ok(records) => records,
            Err(BackupError::Json(e)) => {
                self.quarantine(&e).await?;
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        let stamp = event.timestamp.format("%Y%m%d_%H%M%S_%3f").to_string();
        let base = format!("{}_{stamp}", sanitize(&event.identity_id));
        let mut written = Vec::new();
        let result = async {
            let current_image_path = match &event.current_frame {
                Some(image) => Some(self.write_image(image, &format!("{base}_current"), &mut written).await?),
                None => None,
            };
            let known_face_path = match &event.reference_image {
                Some(image) => Some(self.write_image(image, &format!("{base}_known"), &mut written).await?),
                None => None,
            };

            let record = PendingUploadRecord {
                action: event.action,
                name: event.identity_id.clone(),
                time: crate::payload::format_time(event.timestamp),
                timestamp: stamp.clone(),
                current_image_path,
                known_face_path,
                error: error.to_string(),
                status: RecordStatus::Pending,
                uploaded_at: None,
            };
            records.push(record.clone());
            self.write(&records).await?;
            Ok::<_, BackupError>(record)
        }
        .await;

        match result {
            Ok(record) => {
                tracing::info!(
                    name = %record.name,
                    action = record.action.as_str(),
                    backlog = records.len(),
                    "delivery backed up"
                );
                Ok(record)
            }
            Err(e) => {
                for path in &written {
                    if let Err(err) = tokio::fs::remove_file(path).await {
                        tracing::debug!(path = %path.display(), error = %err, "backup image cleanup failed");
                    }
                }
                Err(e)
            }
        }
    }

    /// All records; an absent store is empty.
    pub async fn load(&self) -> Result<Vec<PendingUploadRecord>, BackupError> {
        let _guard = self.lock.lock().await;
        let Some(_flock) = self.lock_root(false).await? else {
            return Ok(Vec::new());
        };
        self.read().await
    }

    /// Fold a retry pass back into the store.
    ///
    /// Re-reads the store under the lock, drops the `uploaded` records and
    /// anything not pending, and records the new error on `failed` ones.
    /// Records added since the pass started are kept. Returns what is left;
    /// when nothing is, the store and any emptied directories are removed.
    pub async fn settle(
        &self,
        uploaded: &[PendingUploadRecord],
        failed: &[PendingUploadRecord],
    ) -> Result<Vec<PendingUploadRecord>, BackupError> {
        let _guard = self.lock.lock().await;
        let Some(_flock) = self.lock_root(false).await? else {
            return Ok(Vec::new());
        };

        let remaining: Vec<PendingUploadRecord> = self
            .read()
            .await?
            .into_iter()
            .filter(|r| r.status == RecordStatus::Pending)
            .filter(|r| !uploaded.iter().any(|u| u.same_event(r)))
            .map(|r| match failed.iter().find(|f| f.same_event(&r)) {
                Some(f) => PendingUploadRecord {
                    error: f.error.clone(),
                    ..r
                },
                None => r,
            })
            .collect();

        if remaining.is_empty() {
            self.clear().await?;
        } else {
            self.write(&remaining).await?;
        }
        Ok(remaining)
    }

    /// Exclusive lock on the backup root, shared with other processes.
    ///
    /// Without `create`, an absent root yields `None`. The lock is retaken if
    /// the directory was replaced while waiting for it.
    async fn lock_root(&self, create: bool) -> Result<Option<Flock<File>>, BackupError> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || loop {
            if create {
                std::fs::create_dir_all(&root).map_err(io_err(&root))?;
            }
            let dir = match File::open(&root) {
                Ok(dir) => dir,
                Err(e) if e.kind() == ErrorKind::NotFound && !create => return Ok(None),
                Err(e) => return Err(io_err(&root)(e)),
            };
            let locked = Flock::lock(dir, FlockArg::LockExclusive)
                .map_err(|(_, errno)| io_err(&root)(std::io::Error::from(errno)))?;
            let held = locked.metadata().map_err(io_err(&root))?;
            match std::fs::metadata(&root) {
                Ok(now) if now.dev() == held.dev() && now.ino() == held.ino() => return Ok(Some(locked)),
                Ok(_) => continue,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    if create {
                        continue;
                    }
                    return Ok(None);
                }
                Err(e) => return Err(io_err(&root)(e)),
            }
        })
        .await?
    }

    /// Move an unparseable store aside so later failures are still kept.
    async fn quarantine(&self, cause: &serde_json::Error) -> Result<(), BackupError> {
        let path = self.store_path();
        let aside = self
            .root
            .join(format!("{STORE_FILE}.corrupt-{}", Utc::now().format("%Y%m%d_%H%M%S_%3f")));
        tokio::fs::rename(&path, &aside).await.map_err(io_err(&path))?;
        tracing::error!(
            store = %path.display(),
            moved_to = %aside.display(),
            error = %cause,
            "backup store is malformed; starting a new one"
        );
        Ok(())
    }

    /// Delete the store file, then the backup directories if nothing else is left.
    async fn clear(&self) -> Result<(), BackupError> {
        let path = self.store_path();
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(io_err(&path)(e)),
        }
        // Best effort: remove_dir refuses non-empty directories.
        for dir in [self.root.join(IMAGE_DIR), self.root.clone()] {
            if let Err(e) = tokio::fs::remove_dir(&dir).await {
                tracing::debug!(dir = %dir.display(), error = %e, "backup directory kept");
            }
        }
        Ok(())
    }

    async fn write_image(
        &self,
        image: &EncodedImage,
        stem: &str,
        written: &mut Vec<PathBuf>,
    ) -> Result<PathBuf, BackupError> {
        let dir = self.root.join(IMAGE_DIR);
        tokio::fs::create_dir_all(&dir).await.map_err(io_err(&dir))?;
        let dest = dir.join(format!("{stem}.{}", image.extension()));
        tokio::fs::write(&dest, image.bytes()).await.map_err(io_err(&dest))?;
        written.push(dest.clone());
        Ok(dest)
    }

    async fn read(&self) -> Result<Vec<PendingUploadRecord>, BackupError> {
        let path = self.store_path();
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err(&path)(e)),
        };
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_slice(&raw)?)
    }

    /// Write via a temp file and rename so a crash never leaves a torn store.
    async fn write(&self, records: &[PendingUploadRecord]) -> Result<(), BackupError> {
        tokio::fs::create_dir_all(&self.root).await.map_err(io_err(&self.root))?;
        let path = self.store_path();
        let tmp = self.root.join(format!("{STORE_FILE}.tmp"));
        let json = serde_json::to_vec_pretty(records)?;
        tokio::fs::write(&tmp, json).await.map_err(io_err(&tmp))?;
        tokio::fs::rename(&tmp, &path).await.map_err(io_err(&path))?;
        Ok(())
    }
}

/// Keep identity ids usable as file name components.
fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn event(action: Action, id: &str) -> UploadEvent {
        let (current_frame, reference_image) = match action {
            Action::Login => (
                Some(EncodedImage::jpeg(b"frame".to_vec())),
                Some(EncodedImage::jpeg(b"reference".to_vec())),
            ),
            Action::Logout => (None, None),
        };
        UploadEvent {
            action,
            identity_id: id.to_string(),
            timestamp: Utc.with_ymd_and_hms(2026, 3, 1, 8, 15, 2).unwrap(),
            current_frame,
            reference_image,
        }
    }

    fn image_count(root: &Path) -> usize {
        std::fs::read_dir(root.join(IMAGE_DIR)).map(|d| d.count()).unwrap_or(0)
    }

    #[tokio::test]
    async fn test_load_absent_store_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = BackupStore::new(dir.path().join("failed_uploads"));
        assert!(store.load().await.unwrap().is_empty());
        assert!(!store.root().exists());
    }

    #[tokio::test]
    async fn test_persist_writes_images_and_appends() {
        let dir = tempfile::tempdir().unwrap();
        let store = BackupStore::new(dir.path().join("failed_uploads"));

        let record = store.persist(&event(Action::Login, "alice"), "HTTP 500").await.unwrap();
        store.persist(&event(Action::Logout, "bob"), "timeout").await.unwrap();

        let current = record.current_image_path.clone().unwrap();
        assert!(current.starts_with(store.root().join(IMAGE_DIR)));
        assert_eq!(
            current.file_name().unwrap().to_str().unwrap(),
            "alice_20260301_081502_000_current.jpg"
        );
        assert_eq!(std::fs::read(&current).unwrap(), b"frame");
        assert_eq!(std::fs::read(record.known_face_path.as_ref().unwrap()).unwrap(), b"reference");

        let records = store.load().await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], record);
        assert_eq!(records[1].action, Action::Logout);
        assert_eq!(records[1].status, RecordStatus::Pending);
        assert!(records[1].current_image_path.is_none());
    }

    #[tokio::test]
    async fn test_store_file_shape() {
        let dir = tempfile::tempdir().unwrap();
        let store = BackupStore::new(dir.path());
        store.persist(&event(Action::Logout, "bob"), "HTTP 502").await.unwrap();

        let raw = std::fs::read_to_string(store.store_path()).unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let entry = &json[0];
        assert_eq!(entry["action"], "logout");
        assert_eq!(entry["name"], "bob");
        assert_eq!(entry["time"], "2026-03-01T08:15:02.000Z");
        assert_eq!(entry["status"], "pending");
        assert_eq!(entry["error"], "HTTP 502");
        assert!(entry["current_image_path"].is_null());
        assert!(entry.get("uploaded_at").is_none());
    }

    #[tokio::test]
    async fn test_concurrent_persist_loses_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(BackupStore::new(dir.path().join("backup")));

        let mut tasks = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            let ev = event(Action::Logout, &format!("user{i}"));
            tasks.push(tokio::spawn(async move { store.persist(&ev, "down").await }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(store.load().await.unwrap().len(), 8);
    }

    #[tokio::test]
    async fn test_two_stores_on_one_root_share_the_lock() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("backup");
        let kiosk = std::sync::Arc::new(BackupStore::new(&root));
        let tool = std::sync::Arc::new(BackupStore::new(&root));

        let mut tasks = Vec::new();
        for i in 0..6 {
            let store = if i % 2 == 0 { kiosk.clone() } else { tool.clone() };
            let ev = event(Action::Logout, &format!("user{i}"));
            tasks.push(tokio::spawn(async move { store.persist(&ev, "down").await }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(kiosk.load().await.unwrap().len(), 6);
        assert_eq!(tool.load().await.unwrap().len(), 6);
    }

    #[tokio::test]
    async fn test_settle_keeps_records_added_meanwhile() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("failed_uploads");
        let tool = BackupStore::new(&root);
        let kiosk = BackupStore::new(&root);
        tool.persist(&event(Action::Logout, "alice"), "x").await.unwrap();
        tool.persist(&event(Action::Logout, "bob"), "x").await.unwrap();
        let snapshot = tool.load().await.unwrap();

        let mut later = event(Action::Logout, "carol");
        later.timestamp = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        kiosk.persist(&later, "down").await.unwrap();

        let mut failed = snapshot[1].clone();
        failed.error = "HTTP 503".into();
        let left = tool.settle(&snapshot[..1], &[failed]).await.unwrap();

        let names: Vec<_> = left.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["bob", "carol"]);
        assert_eq!(left[0].error, "HTTP 503");
        assert_eq!(kiosk.load().await.unwrap(), left);
    }

    #[tokio::test]
    async fn test_settle_everything_removes_store_and_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("failed_uploads");
        let store = BackupStore::new(&root);
        let record = store.persist(&event(Action::Login, "alice"), "x").await.unwrap();
        for path in record.image_paths() {
            std::fs::remove_file(path).unwrap();
        }

        let left = store.settle(&[record], &[]).await.unwrap();
        assert!(left.is_empty());
        assert!(!root.exists());
    }

    #[tokio::test]
    async fn test_settle_keeps_dirs_with_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("failed_uploads");
        let store = BackupStore::new(&root);
        let record = store.persist(&event(Action::Login, "alice"), "x").await.unwrap();

        store.settle(&[record], &[]).await.unwrap();
        assert!(!store.store_path().exists());
        assert!(root.join(IMAGE_DIR).exists());
    }

    #[tokio::test]
    async fn test_malformed_store_is_an_error_on_load() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(STORE_FILE), "{not json").unwrap();
        let store = BackupStore::new(dir.path());
        assert!(matches!(store.load().await, Err(BackupError::Json(_))));
    }

    #[tokio::test]
    async fn test_persist_moves_malformed_store_aside() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("failed_uploads");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join(STORE_FILE), "{truncated").unwrap();
        let store = BackupStore::new(&root);

        for id in ["alice", "bob", "carol"] {
            store.persist(&event(Action::Login, id), "down").await.unwrap();
        }

        let records = store.load().await.unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(image_count(&root), 6);
        let aside: Vec<_> = std::fs::read_dir(&root)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("pending_uploads.json.corrupt-"))
            .collect();
        assert_eq!(aside.len(), 1);
        assert_eq!(std::fs::read_to_string(aside[0].path()).unwrap(), "{truncated");
    }

    #[tokio::test]
    async fn test_failed_persist_leaves_no_images() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("failed_uploads");
        // A directory where the temp store file goes: the images land, the store write fails.
        std::fs::create_dir_all(root.join(format!("{STORE_FILE}.tmp"))).unwrap();
        let store = BackupStore::new(&root);

        assert!(store.persist(&event(Action::Login, "alice"), "down").await.is_err());
        assert_eq!(image_count(&root), 0);
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("alice"), "alice");
        assert_eq!(sanitize("../evil name"), "___evil_name");
    }
}

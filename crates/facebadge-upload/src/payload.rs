//! JSON body posted to the attendance endpoint.

use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};
use facebadge_core::Action;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PayloadError {
    #[error("login payload is missing the {0} image")]
    MissingImage(&'static str),
    #[error("failed to read image {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Wire form of one attendance event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum Payload {
    Login {
        name: String,
        time: String,
        /// Data URI of the frame captured at recognition time.
        user_current_image: String,
        /// Data URI of the enrolled reference photo.
        user_badge_image: String,
    },
    Logout {
        name: String,
        time: String,
    },
}

/// Image bytes ready to embed in a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    mime: &'static str,
    bytes: Vec<u8>,
}

impl EncodedImage {
    pub fn jpeg(bytes: Vec<u8>) -> Self {
        Self {
            mime: "image/jpeg",
            bytes,
        }
    }

    /// Read an image file; the MIME type follows the extension.
    pub async fn read(path: &Path) -> Result<Self, PayloadError> {
        let bytes = tokio::fs::read(path).await.map_err(|source| PayloadError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            mime: mime_type(path),
            bytes,
        })
    }

    pub fn mime(&self) -> &'static str {
        self.mime
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// File extension matching the MIME type.
    pub fn extension(&self) -> &'static str {
        match self.mime {
            "image/png" => "png",
            _ => "jpg",
        }
    }

    /// `data:<mime>;base64,...`
    pub fn data_uri(&self) -> String {
        let encoded = base64::engine::general_purpose::STANDARD.encode(&self.bytes);
        format!("data:{};base64,{encoded}", self.mime)
    }
}

impl Payload {
    /// Build a payload from images already in memory. Logout ignores both.
    pub fn build(
        action: Action,
        name: &str,
        time: &str,
        current_image: Option<&EncodedImage>,
        badge_image: Option<&EncodedImage>,
    ) -> Result<Self, PayloadError> {
        match action {
            Action::Login => {
                let current = current_image.ok_or(PayloadError::MissingImage("current"))?;
                let badge = badge_image.ok_or(PayloadError::MissingImage("badge"))?;
                Ok(Payload::Login {
                    name: name.to_string(),
                    time: time.to_string(),
                    user_current_image: current.data_uri(),
                    user_badge_image: badge.data_uri(),
                })
            }
            Action::Logout => Ok(Payload::Logout {
                name: name.to_string(),
                time: time.to_string(),
            }),
        }
    }

    /// Like [`Payload::build`], reading a login's images from disk.
    pub async fn from_files(
        action: Action,
        name: &str,
        time: &str,
        current_image: Option<&Path>,
        badge_image: Option<&Path>,
    ) -> Result<Self, PayloadError> {
        if action == Action::Logout {
            return Self::build(action, name, time, None, None);
        }
        let current = match current_image {
            Some(path) => Some(EncodedImage::read(path).await?),
            None => None,
        };
        let badge = match badge_image {
            Some(path) => Some(EncodedImage::read(path).await?),
            None => None,
        };
        Self::build(action, name, time, current.as_ref(), badge.as_ref())
    }

    pub fn action(&self) -> Action {
        match self {
            Payload::Login { .. } => Action::Login,
            Payload::Logout { .. } => Action::Logout,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Payload::Login { name, .. } | Payload::Logout { name, .. } => name,
        }
    }
}

/// ISO-8601 UTC with millisecond precision, e.g. `2026-03-01T08:15:02.120Z`.
pub fn format_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn mime_type(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        _ => "image/jpeg",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_time() {
        let t = Utc.with_ymd_and_hms(2026, 3, 1, 8, 15, 2).unwrap();
        assert_eq!(format_time(t), "2026-03-01T08:15:02.000Z");
    }

    #[test]
    fn test_logout_wire_shape() {
        let payload = Payload::Logout {
            name: "alice".into(),
            time: "2026-03-01T08:15:02.000Z".into(),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"action": "logout", "name": "alice", "time": "2026-03-01T08:15:02.000Z"})
        );
    }

    #[tokio::test]
    async fn test_login_encodes_images() {
        let dir = tempfile::tempdir().unwrap();
        let current = dir.path().join("frame.jpg");
        let badge = dir.path().join("alice.PNG");
        std::fs::write(&current, b"abc").unwrap();
        std::fs::write(&badge, b"xyz").unwrap();

        let payload = Payload::from_files(Action::Login, "alice", "t", Some(&current), Some(&badge))
            .await
            .unwrap();
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["action"], "login");
        assert_eq!(json["user_current_image"], "data:image/jpeg;base64,YWJj");
        assert_eq!(json["user_badge_image"], "data:image/png;base64,eHl6");
    }

    #[test]
    fn test_login_requires_images() {
        let err = Payload::build(Action::Login, "alice", "t", None, None).unwrap_err();
        assert!(matches!(err, PayloadError::MissingImage("current")));
        let frame = EncodedImage::jpeg(vec![1]);
        let err = Payload::build(Action::Login, "alice", "t", Some(&frame), None).unwrap_err();
        assert!(matches!(err, PayloadError::MissingImage("badge")));
    }

    #[test]
    fn test_in_memory_jpeg() {
        let frame = EncodedImage::jpeg(b"abc".to_vec());
        assert_eq!(frame.extension(), "jpg");
        assert_eq!(frame.data_uri(), "data:image/jpeg;base64,YWJj");
    }

    #[tokio::test]
    async fn test_login_unreadable_image() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("gone.jpg");
        let err = Payload::from_files(Action::Login, "alice", "t", Some(&missing), Some(&missing))
            .await
            .unwrap_err();
        assert!(matches!(err, PayloadError::Read { .. }));
    }

    #[tokio::test]
    async fn test_logout_ignores_images() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("gone.jpg");
        let payload = Payload::from_files(Action::Logout, "bob", "t", Some(&missing), None)
            .await
            .unwrap();
        assert_eq!(payload.action(), Action::Logout);
        assert_eq!(payload.name(), "bob");
    }
}

use crate::payload::{format_time, EncodedImage, Payload, PayloadError};
use chrono::{DateTime, Utc};
use facebadge_core::Action;

/// One attendance event on its way to the endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadEvent {
    pub action: Action,
    pub identity_id: String,
    pub timestamp: DateTime<Utc>,
    /// JPEG of the recognition frame (login only). Never written to disk
    /// unless the delivery is backed up.
    pub current_frame: Option<EncodedImage>,
    /// Enrolled reference photo (login only).
    pub reference_image: Option<EncodedImage>,
}

impl UploadEvent {
    pub fn payload(&self) -> Result<Payload, PayloadError> {
        Payload::build(
            self.action,
            &self.identity_id,
            &format_time(self.timestamp),
            self.current_frame.as_ref(),
            self.reference_image.as_ref(),
        )
    }
}

//! Background delivery of attendance events.
//!
//! The detection thread only pushes a [`DispatchRequest`] onto an unbounded
//! channel. A task on the tokio runtime drains it and runs each delivery as
//! its own task, bounded by a semaphore.

use crate::backup::BackupStore;
use crate::client::Deliver;
use crate::event::UploadEvent;
use crate::payload::EncodedImage;
use chrono::{DateTime, Utc};
use facebadge_core::Action;
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};

const CAPTURE_JPEG_QUALITY: u8 = 90;

#[derive(Error, Debug)]
enum CaptureError {
    #[error("encode: {0}")]
    Encode(#[from] image::ImageError),
    #[error("encoder task: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// A decision handed off by the detection loop.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub action: Action,
    pub identity_id: String,
    pub timestamp: DateTime<Utc>,
    /// Frame the identity was recognized in; only used for login.
    pub frame: Option<RgbImage>,
    pub reference_image: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered,
    BackedUp,
    /// Delivery and backup both failed; the event is gone.
    Lost,
}

/// Cheap, cloneable sender side used from the detection thread.
#[derive(Debug, Clone)]
pub struct DispatcherHandle {
    tx: mpsc::UnboundedSender<DispatchRequest>,
}

impl DispatcherHandle {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<DispatchRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue a request without blocking. Returns false if the dispatcher is gone.
    pub fn dispatch(&self, request: DispatchRequest) -> bool {
        match self.tx.send(request) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(name = %e.0.identity_id, "dispatcher stopped; event dropped");
                false
            }
        }
    }
}

pub struct Dispatcher<D> {
    delivery: Arc<D>,
    backup: Arc<BackupStore>,
}

impl<D: Deliver> Dispatcher<D> {
    pub fn new(delivery: Arc<D>, backup: Arc<BackupStore>) -> Self {
        Self { delivery, backup }
    }

    /// Start draining requests on `runtime`, at most `max_in_flight` at once.
    pub fn spawn(self, runtime: &tokio::runtime::Handle, max_in_flight: usize) -> DispatcherHandle {
        let (handle, mut rx) = DispatcherHandle::channel();
        let dispatcher = Arc::new(self);
        let permits = Arc::new(Semaphore::new(max_in_flight.max(1)));

        runtime.spawn(async move {
            while let Some(request) = rx.recv().await {
                let Ok(permit) = permits.clone().acquire_owned().await else {
                    break;
                };
                let dispatcher = dispatcher.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    dispatcher.handle(request).await;
                });
            }
            tracing::debug!("dispatch channel closed");
        });

        handle
    }

    /// Deliver one request; on failure fall back to the backup store.
    ///
    /// The login frame is encoded in memory and only reaches the disk as a
    /// backup copy.
    pub async fn handle(&self, request: DispatchRequest) -> DispatchOutcome {
        let (current_frame, reference_image) = match request.action {
            Action::Login => (
                self.encode_frame(&request.identity_id, request.frame).await,
                self.read_reference(&request.identity_id, request.reference_image).await,
            ),
            Action::Logout => (None, None),
        };

        let event = UploadEvent {
            action: request.action,
            identity_id: request.identity_id,
            timestamp: request.timestamp,
            current_frame,
            reference_image,
        };

        let result = match event.payload() {
            Ok(payload) => self.delivery.deliver(&payload).await.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        match result {
            Ok(()) => {
                tracing::info!(name = %event.identity_id, action = event.action.as_str(), "attendance delivered");
                DispatchOutcome::Delivered
            }
            Err(error) => {
                tracing::warn!(name = %event.identity_id, action = event.action.as_str(), %error, "delivery failed");
                match self.backup.persist(&event, &error).await {
                    Ok(_) => DispatchOutcome::BackedUp,
                    Err(e) => {
                        tracing::error!(
                            name = %event.identity_id,
                            action = event.action.as_str(),
                            time = %event.timestamp,
                            error = %e,
                            "backup write failed; attendance event lost"
                        );
                        DispatchOutcome::Lost
                    }
                }
            }
        }
    }

    async fn encode_frame(&self, name: &str, frame: Option<RgbImage>) -> Option<EncodedImage> {
        let frame = frame?;
        match encode_jpeg(frame).await {
            Ok(image) => Some(image),
            Err(e) => {
                tracing::warn!(%name, error = %e, "failed to encode capture");
                None
            }
        }
    }

    async fn read_reference(&self, name: &str, path: Option<PathBuf>) -> Option<EncodedImage> {
        let path = path?;
        match EncodedImage::read(&path).await {
            Ok(image) => Some(image),
            Err(e) => {
                tracing::warn!(%name, error = %e, "failed to read reference photo");
                None
            }
        }
    }
}

async fn encode_jpeg(frame: RgbImage) -> Result<EncodedImage, CaptureError> {
    let bytes = tokio::task::spawn_blocking(move || {
        let mut bytes = Vec::new();
        JpegEncoder::new_with_quality(&mut bytes, CAPTURE_JPEG_QUALITY).encode_image(&frame)?;
        Ok::<_, image::ImageError>(bytes)
    })
    .await??;
    Ok(EncodedImage::jpeg(bytes))
}

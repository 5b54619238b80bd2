//! facebadge-upload: attendance event delivery.
//!
//! Login/Logout decisions leave the detection thread through a
//! [`DispatcherHandle`]; background tasks post them to the remote endpoint
//! and fall back to the on-disk [`BackupStore`] when delivery fails. The
//! retry tool replays that store with the same delivery routine.

pub mod backup;
pub mod client;
pub mod dispatcher;
pub mod event;
pub mod payload;
pub mod retry;

pub use backup::{BackupError, BackupStore, PendingUploadRecord, RecordStatus};
pub use client::{Deliver, DeliveryError, HttpDelivery};
pub use dispatcher::{DispatchOutcome, DispatchRequest, Dispatcher, DispatcherHandle};
pub use event::UploadEvent;
pub use payload::{format_time, EncodedImage, Payload, PayloadError};
pub use retry::{retry_pending, RetrySummary};

//! facebadge-hw: camera capture and LCD framebuffer output.
//!
//! V4L2 capture yields RGB frames for the detection loop; the framebuffer
//! side pushes composed screens to the kiosk panel.

pub mod camera;
pub mod display;
pub mod frame;

pub use camera::{Camera, CameraError, PixelFormat};
pub use display::{DisplayError, Framebuffer, PanelFormat};
pub use frame::FrameError;

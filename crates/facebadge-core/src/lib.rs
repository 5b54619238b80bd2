//! facebadge-core: Face matching, attendance sessions, and the kiosk detection cycle.
//!
//! The detection state machine and the session tracker are pure logic. Face
//! detection and embedding sit behind the [`FaceMatcher`] seam; the ONNX
//! implementation (SCRFD + ArcFace) lives in [`onnx`].

pub mod detection;
pub mod detector;
pub mod matcher;
pub mod onnx;
pub mod recognizer;
pub mod roster;
pub mod session;
pub mod source;
pub mod types;

pub use detection::{DetectionConfig, DetectionMachine, DetectionState, Screen, Transition};
pub use matcher::{FaceMatcher, MatcherError};
pub use onnx::OnnxFaceMatcher;
pub use roster::{Roster, RosterError};
pub use session::{Action, BadgeMessage, Decision, SessionTracker};
pub use source::FrameSource;
pub use types::{BoundingBox, Candidate, Embedding, Identity, MatchOutcome, RecognitionSample};

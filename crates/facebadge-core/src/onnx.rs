//! [`FaceMatcher`] backed by the SCRFD detector and ArcFace recognizer.

use crate::detector::FaceDetector;
use crate::matcher::{FaceMatcher, MatcherError};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{BoundingBox, RecognitionSample};
use image::RgbImage;
use std::path::{Path, PathBuf};

pub const DETECTOR_MODEL: &str = "det_10g.onnx";
pub const RECOGNIZER_MODEL: &str = "w600k_r50.onnx";

/// Default model directory: `$XDG_DATA_HOME/facebadge/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facebadge/models")
}

pub struct OnnxFaceMatcher {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxFaceMatcher {
    /// Load both models from `model_dir`. Fails fast if either is missing.
    pub fn load(model_dir: &Path) -> Result<Self, MatcherError> {
        let detector = FaceDetector::load(&model_dir.join(DETECTOR_MODEL))?;
        let recognizer = FaceRecognizer::load(&model_dir.join(RECOGNIZER_MODEL))?;
        Ok(Self { detector, recognizer })
    }
}

impl FaceMatcher for OnnxFaceMatcher {
    fn locate(&mut self, frame: &RgbImage) -> Result<Vec<BoundingBox>, MatcherError> {
        Ok(self.detector.detect(frame)?)
    }

    fn samples(&mut self, frame: &RgbImage) -> Result<Vec<RecognitionSample>, MatcherError> {
        let faces = self.detector.detect(frame)?;
        let mut samples = Vec::with_capacity(faces.len());
        for face in faces {
            let embedding = match self.recognizer.extract(frame, &face) {
                Ok(embedding) => embedding,
                Err(RecognizerError::EmptyCrop) => continue,
                Err(e) => return Err(e.into()),
            };
            samples.push(RecognitionSample {
                embedding,
                bounding_box: face,
            });
        }
        Ok(samples)
    }
}

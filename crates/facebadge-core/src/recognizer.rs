//! ArcFace face recognizer via ONNX Runtime.
//!
//! Crops a square around each detected face, resizes it to 112x112 and
//! extracts an L2-normalized 512-dimensional embedding (w600k_r50).

use crate::types::{BoundingBox, Embedding};
use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const ARCFACE_INPUT_SIZE: u32 = 112;
const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5;
const ARCFACE_EMBEDDING_DIM: usize = 512;
/// Crop side relative to the larger bbox side; SCRFD boxes are tight.
const CROP_MARGIN: f32 = 1.2;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face box lies outside the frame")]
    EmptyCrop,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// ArcFace-based face recognizer.
pub struct FaceRecognizer {
    session: Session,
}

impl FaceRecognizer {
    pub fn load(model_path: &Path) -> Result<Self, RecognizerError> {
        if !model_path.exists() {
            return Err(RecognizerError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(path = %model_path.display(), "loaded ArcFace model");
        Ok(Self { session })
    }

    /// Embed one detected face of an RGB frame.
    pub fn extract(&mut self, frame: &RgbImage, face: &BoundingBox) -> Result<Embedding, RecognizerError> {
        let crop = crop_face(frame, face).ok_or(RecognizerError::EmptyCrop)?;
        let input = preprocess(&crop);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.len() != ARCFACE_EMBEDDING_DIM {
            return Err(RecognizerError::InferenceFailed(format!(
                "expected {ARCFACE_EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        Ok(Embedding::new(l2_normalize(raw)))
    }
}

/// Square crop centred on the face, clamped to the frame, resized to the model input.
fn crop_face(frame: &RgbImage, face: &BoundingBox) -> Option<RgbImage> {
    let side = face.width.max(face.height) * CROP_MARGIN;
    let cx = face.x + face.width / 2.0;
    let cy = face.y + face.height / 2.0;

    let x0 = (cx - side / 2.0).max(0.0) as u32;
    let y0 = (cy - side / 2.0).max(0.0) as u32;
    let x1 = ((cx + side / 2.0).max(0.0) as u32).min(frame.width());
    let y1 = ((cy + side / 2.0).max(0.0) as u32).min(frame.height());
    if x1 <= x0 || y1 <= y0 {
        return None;
    }

    let view = image::imageops::crop_imm(frame, x0, y0, x1 - x0, y1 - y0).to_image();
    Some(image::imageops::resize(
        &view,
        ARCFACE_INPUT_SIZE,
        ARCFACE_INPUT_SIZE,
        FilterType::Triangle,
    ))
}

fn preprocess(crop: &RgbImage) -> Array4<f32> {
    let size = ARCFACE_INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in crop.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - ARCFACE_MEAN) / ARCFACE_STD;
        }
    }
    tensor
}

fn l2_normalize(raw: &[f32]) -> Vec<f32> {
    let norm = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.iter().map(|x| x / norm).collect()
    } else {
        raw.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face(x: f32, y: f32, w: f32, h: f32) -> BoundingBox {
        BoundingBox { x, y, width: w, height: h, confidence: 0.9 }
    }

    #[test]
    fn test_crop_face_output_size() {
        let frame = RgbImage::new(640, 480);
        let crop = crop_face(&frame, &face(100.0, 100.0, 80.0, 120.0)).unwrap();
        assert_eq!(crop.dimensions(), (ARCFACE_INPUT_SIZE, ARCFACE_INPUT_SIZE));
    }

    #[test]
    fn test_crop_face_clamps_to_frame_edge() {
        let frame = RgbImage::new(100, 100);
        assert!(crop_face(&frame, &face(-20.0, -20.0, 50.0, 50.0)).is_some());
    }

    #[test]
    fn test_crop_face_outside_frame() {
        let frame = RgbImage::new(100, 100);
        assert!(crop_face(&frame, &face(500.0, 500.0, 20.0, 20.0)).is_none());
    }

    #[test]
    fn test_preprocess_normalization() {
        let crop = RgbImage::from_pixel(ARCFACE_INPUT_SIZE, ARCFACE_INPUT_SIZE, image::Rgb([255, 0, 128]));
        let tensor = preprocess(&crop);
        assert_eq!(tensor.shape(), &[1, 3, 112, 112]);
        assert!((tensor[[0, 0, 5, 5]] - 1.0).abs() < 1e-6);
        assert!((tensor[[0, 1, 5, 5]] + 1.0).abs() < 1e-6);
        assert!((tensor[[0, 2, 5, 5]] - (0.5 / 127.5)).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalize() {
        let v = l2_normalize(&[3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
        assert_eq!(l2_normalize(&[0.0, 0.0]), vec![0.0, 0.0]);
    }
}
